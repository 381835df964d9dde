use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bid/win amounts in micro-dollars (1_000_000 = $1.00).
///
/// Exchange notifications quote CPM prices with sub-cent precision;
/// integer micros avoid accumulating float error in billing calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MicroUsd(pub i64);

impl MicroUsd {
    pub fn from_dollars(d: f64) -> Self {
        Self((d * 1_000_000.0).round() as i64)
    }

    pub fn as_dollars(&self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for MicroUsd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${:.6}", self.as_dollars())
    }
}

/// Identity of one bid opportunity: an auction plus the ad spot within it.
///
/// `ad_spot_id` is empty only in campaign-event lookups, where it means
/// "every spot of this auction".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AuctionKey {
    pub auction_id: String,
    pub ad_spot_id: String,
}

impl AuctionKey {
    pub fn new(auction_id: impl Into<String>, ad_spot_id: impl Into<String>) -> Self {
        Self {
            auction_id: auction_id.into(),
            ad_spot_id: ad_spot_id.into(),
        }
    }

    /// True when the spot id is empty (wildcard campaign-event lookup).
    pub fn is_wildcard(&self) -> bool {
        self.ad_spot_id.is_empty()
    }
}

impl fmt::Display for AuctionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ad_spot_id.is_empty() {
            write!(f, "{}:*", self.auction_id)
        } else {
            write!(f, "{}:{}", self.auction_id, self.ad_spot_id)
        }
    }
}

/// User identifiers carried on win and campaign-event notifications,
/// echoed back to the owning agent for frequency capping / attribution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIds {
    pub exchange_id: Option<String>,
    pub provider_id: Option<String>,
}

impl UserIds {
    pub fn exchange(id: impl Into<String>) -> Self {
        Self {
            exchange_id: Some(id.into()),
            provider_id: None,
        }
    }
}

/// Snapshot of the bid response taken when the auction was submitted.
///
/// This is everything the engine keeps about a bid while it waits for an
/// outcome; notifications are validated and settled against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidSnapshot {
    /// Price the agent bid (reserved against the account at bid time).
    pub bid_price: MicroUsd,
    /// Billing account the bid was placed under.
    pub account: String,
    /// When the bid was placed, per the bidder.
    pub bid_timestamp: DateTime<Utc>,
    /// Opaque bid metadata (creative id, augmentations) echoed to the agent.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub meta: serde_json::Value,
}

impl BidSnapshot {
    pub fn new(
        bid_price: MicroUsd,
        account: impl Into<String>,
        bid_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            bid_price,
            account: account.into(),
            bid_timestamp,
            meta: serde_json::Value::Null,
        }
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = meta;
        self
    }
}
