//! Outcome records handed from the match engine to the router.
//!
//! `Outcome` is a closed union: the variant set is fixed by the domain and
//! handled exhaustively at the router. Outcomes are transient; the engine
//! routes them once and never persists them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{AuctionKey, BidSnapshot, MicroUsd, UserIds};

/// How a loss was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossKind {
    /// An explicit LOSS notification. Only simulation harnesses send these;
    /// production losses are inferred.
    Explicit,
    /// Inferred by the sweeper after the loss deadline passed.
    Implicit,
}

/// A win matched against its pending auction. Also the record retained in
/// the win history so later campaign events can attach to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedWin {
    pub key: AuctionKey,
    pub snapshot: BidSnapshot,
    pub win_price: MicroUsd,
    pub win_meta: serde_json::Value,
    pub user_ids: UserIds,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedLoss {
    pub key: AuctionKey,
    pub snapshot: BidSnapshot,
    pub kind: LossKind,
    pub resolved_at: DateTime<Utc>,
}

/// A campaign event (click, conversion, ...) attributed to a prior win.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedCampaignEvent {
    pub label: String,
    pub key: AuctionKey,
    pub event_meta: serde_json::Value,
    pub user_ids: UserIds,
    pub resolved_at: DateTime<Utc>,
    /// The win this event attaches to.
    pub win: MatchedWin,
}

/// Which notification kind failed to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedKind {
    Win,
    Loss,
    CampaignEvent,
}

/// A notification with no live entry to match: already resolved, expired,
/// or never known. Expected in steady state; diagnostic only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnmatchedEvent {
    pub kind: UnmatchedKind,
    pub key: AuctionKey,
    pub event_timestamp: DateTime<Utc>,
    pub detail: String,
}

/// Malformed or inconsistent input, converted into a diagnostic record
/// rather than silently dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    /// Processing stage that rejected the event.
    pub context: String,
    pub cause: String,
    pub key: Option<AuctionKey>,
    pub at: DateTime<Utc>,
}

/// One authoritative outcome record per matched or expired event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Win(MatchedWin),
    Loss(MatchedLoss),
    CampaignEvent(MatchedCampaignEvent),
    Unmatched(UnmatchedEvent),
    Error(ErrorEvent),
}

impl Outcome {
    pub fn key(&self) -> Option<&AuctionKey> {
        match self {
            Outcome::Win(w) => Some(&w.key),
            Outcome::Loss(l) => Some(&l.key),
            Outcome::CampaignEvent(c) => Some(&c.key),
            Outcome::Unmatched(u) => Some(&u.key),
            Outcome::Error(e) => e.key.as_ref(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Win(_) => "win",
            Outcome::Loss(_) => "loss",
            Outcome::CampaignEvent(_) => "campaign_event",
            Outcome::Unmatched(_) => "unmatched",
            Outcome::Error(_) => "error",
        }
    }
}

/// Messages delivered to the agent that placed the bid.
///
/// Each variant has a fixed, documented field set; the router serializes
/// these as tagged JSON for the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentMessage {
    Win {
        auction_id: String,
        ad_spot_id: String,
        win_price: MicroUsd,
        bid_price: MicroUsd,
        resolved_at: DateTime<Utc>,
        user_ids: UserIds,
        win_meta: serde_json::Value,
        bid_meta: serde_json::Value,
    },
    Loss {
        auction_id: String,
        ad_spot_id: String,
        implicit: bool,
        bid_price: MicroUsd,
        resolved_at: DateTime<Utc>,
    },
    CampaignEvent {
        label: String,
        auction_id: String,
        ad_spot_id: String,
        event_meta: serde_json::Value,
        user_ids: UserIds,
        win_price: MicroUsd,
        resolved_at: DateTime<Utc>,
    },
}

impl AgentMessage {
    pub fn for_win(win: &MatchedWin) -> Self {
        AgentMessage::Win {
            auction_id: win.key.auction_id.clone(),
            ad_spot_id: win.key.ad_spot_id.clone(),
            win_price: win.win_price,
            bid_price: win.snapshot.bid_price,
            resolved_at: win.resolved_at,
            user_ids: win.user_ids.clone(),
            win_meta: win.win_meta.clone(),
            bid_meta: win.snapshot.meta.clone(),
        }
    }

    pub fn for_loss(loss: &MatchedLoss) -> Self {
        AgentMessage::Loss {
            auction_id: loss.key.auction_id.clone(),
            ad_spot_id: loss.key.ad_spot_id.clone(),
            implicit: loss.kind == LossKind::Implicit,
            bid_price: loss.snapshot.bid_price,
            resolved_at: loss.resolved_at,
        }
    }

    pub fn for_campaign_event(ev: &MatchedCampaignEvent) -> Self {
        AgentMessage::CampaignEvent {
            label: ev.label.clone(),
            auction_id: ev.win.key.auction_id.clone(),
            ad_spot_id: ev.win.key.ad_spot_id.clone(),
            event_meta: ev.event_meta.clone(),
            user_ids: ev.user_ids.clone(),
            win_price: ev.win.win_price,
            resolved_at: ev.resolved_at,
        }
    }
}
