//! Event intake queues.
//!
//! Producers (connection handlers decoding exchange notifications) hand
//! events to the consumer through bounded per-kind queues. Injection is
//! fire-and-forget: a full queue rejects the event with a diagnostic instead
//! of ever blocking the producer.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::warn;

use super::stats::ReconcilerStats;
use crate::models::{AuctionKey, BidSnapshot, MicroUsd, UserIds};

/// An auction transferred into the post-auction loop after it was submitted
/// with a non-empty bid.
#[derive(Debug, Clone)]
pub struct SubmittedAuctionEvent {
    pub key: AuctionKey,
    pub snapshot: BidSnapshot,
    /// Per-auction loss deadline override; the configured win timeout
    /// applies when absent.
    pub loss_timeout: Option<Duration>,
    /// When the submission was injected. The loss deadline counts from here.
    pub submitted_at: DateTime<Utc>,
}

/// Asynchronous post-auction notifications: wins, losses, campaign events.
/// One queue for all three: they come from the same class of sources and
/// their relative arrival order is meaningful.
#[derive(Debug, Clone)]
pub enum PostAuctionEvent {
    Win {
        key: AuctionKey,
        win_price: MicroUsd,
        timestamp: DateTime<Utc>,
        win_meta: serde_json::Value,
        user_ids: UserIds,
        account: String,
        bid_timestamp: DateTime<Utc>,
    },
    Loss {
        key: AuctionKey,
        timestamp: DateTime<Utc>,
        loss_meta: serde_json::Value,
        account: String,
        bid_timestamp: DateTime<Utc>,
    },
    CampaignEvent {
        label: String,
        key: AuctionKey,
        timestamp: DateTime<Utc>,
        event_meta: serde_json::Value,
        user_ids: UserIds,
    },
}

impl PostAuctionEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            PostAuctionEvent::Win { .. } => "win",
            PostAuctionEvent::Loss { .. } => "loss",
            PostAuctionEvent::CampaignEvent { .. } => "campaign_event",
        }
    }

    pub fn key(&self) -> &AuctionKey {
        match self {
            PostAuctionEvent::Win { key, .. }
            | PostAuctionEvent::Loss { key, .. }
            | PostAuctionEvent::CampaignEvent { key, .. } => key,
        }
    }
}

/// Receiver ends, owned by the consumer task.
#[derive(Debug)]
pub struct IntakeQueues {
    pub submissions: mpsc::Receiver<SubmittedAuctionEvent>,
    pub events: mpsc::Receiver<PostAuctionEvent>,
}

/// Cloneable, non-blocking producer handle.
#[derive(Debug, Clone)]
pub struct Injector {
    submissions: mpsc::Sender<SubmittedAuctionEvent>,
    events: mpsc::Sender<PostAuctionEvent>,
    stats: Arc<ReconcilerStats>,
}

impl Injector {
    /// Enqueue a submitted auction. Returns false if the queue was full or
    /// the engine is shutting down; the submission is dropped and counted.
    pub fn submit(&self, event: SubmittedAuctionEvent) -> bool {
        use std::sync::atomic::Ordering;
        match self.submissions.try_send(event) {
            Ok(()) => true,
            Err(err) => {
                self.stats
                    .submission_queue_rejects
                    .fetch_add(1, Ordering::Relaxed);
                warn!(key = %rejected_submission_key(&err), "submission rejected, queue full or closed");
                false
            }
        }
    }

    /// Enqueue a win/loss/campaign event. Same drop-with-diagnostic policy.
    pub fn inject(&self, event: PostAuctionEvent) -> bool {
        use std::sync::atomic::Ordering;
        match self.events.try_send(event) {
            Ok(()) => true,
            Err(err) => {
                self.stats
                    .event_queue_rejects
                    .fetch_add(1, Ordering::Relaxed);
                let ev = rejected_event(&err);
                warn!(kind = ev.kind(), key = %ev.key(), "notification rejected, queue full or closed");
                false
            }
        }
    }
}

fn rejected_submission_key(
    err: &mpsc::error::TrySendError<SubmittedAuctionEvent>,
) -> &AuctionKey {
    match err {
        mpsc::error::TrySendError::Full(ev) | mpsc::error::TrySendError::Closed(ev) => &ev.key,
    }
}

fn rejected_event(err: &mpsc::error::TrySendError<PostAuctionEvent>) -> &PostAuctionEvent {
    match err {
        mpsc::error::TrySendError::Full(ev) | mpsc::error::TrySendError::Closed(ev) => ev,
    }
}

/// Build the intake pair: one injector handle for producers, one set of
/// receivers for the consumer.
pub fn intake(
    submission_capacity: usize,
    event_capacity: usize,
    stats: Arc<ReconcilerStats>,
) -> (Injector, IntakeQueues) {
    let (submissions_tx, submissions_rx) = mpsc::channel(submission_capacity);
    let (events_tx, events_rx) = mpsc::channel(event_capacity);
    (
        Injector {
            submissions: submissions_tx,
            events: events_tx,
            stats,
        },
        IntakeQueues {
            submissions: submissions_rx,
            events: events_rx,
        },
    )
}
