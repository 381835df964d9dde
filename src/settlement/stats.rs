//! Diagnostics counters.
//!
//! The engine has no persisted state of its own, so these counters plus the
//! log stream are the primary operational signal. Producers bump the queue
//! counters, the consumer task bumps everything else.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};

/// Counters for the reconciliation engine.
#[derive(Debug, Default)]
pub struct ReconcilerStats {
    pub auctions_submitted: AtomicU64,
    pub duplicate_auctions: AtomicU64,
    pub wins_matched: AtomicU64,
    pub losses_explicit: AtomicU64,
    pub losses_implicit: AtomicU64,
    pub campaign_events_matched: AtomicU64,
    pub unmatched_wins: AtomicU64,
    pub unmatched_losses: AtomicU64,
    pub unmatched_campaign_events: AtomicU64,
    pub malformed_events: AtomicU64,
    pub billing_failures: AtomicU64,
    pub delivery_failures: AtomicU64,
    pub agent_unresolved: AtomicU64,
    pub submission_queue_rejects: AtomicU64,
    pub event_queue_rejects: AtomicU64,
    pub discarded_on_shutdown: AtomicU64,
    pub sweeps_run: AtomicU64,
    pub last_sweep_expired: AtomicU64,
    pub wins_evicted: AtomicU64,
    /// Gauges maintained by the consumer loop for the health pull.
    pub pending_auctions: AtomicU64,
    pub retained_wins: AtomicU64,
    /// Millisecond timestamps of the last processed win/loss and campaign
    /// event, for staleness indicators.
    pub last_win_loss_ms: AtomicI64,
    pub last_campaign_event_ms: AtomicI64,
}

impl ReconcilerStats {
    pub fn mark_win_loss(&self, at: DateTime<Utc>) {
        self.last_win_loss_ms
            .store(at.timestamp_millis(), Ordering::Relaxed);
    }

    pub fn mark_campaign_event(&self, at: DateTime<Utc>) {
        self.last_campaign_event_ms
            .store(at.timestamp_millis(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ReconcilerStatsSnapshot {
        ReconcilerStatsSnapshot {
            auctions_submitted: self.auctions_submitted.load(Ordering::Relaxed),
            duplicate_auctions: self.duplicate_auctions.load(Ordering::Relaxed),
            wins_matched: self.wins_matched.load(Ordering::Relaxed),
            losses_explicit: self.losses_explicit.load(Ordering::Relaxed),
            losses_implicit: self.losses_implicit.load(Ordering::Relaxed),
            campaign_events_matched: self.campaign_events_matched.load(Ordering::Relaxed),
            unmatched_wins: self.unmatched_wins.load(Ordering::Relaxed),
            unmatched_losses: self.unmatched_losses.load(Ordering::Relaxed),
            unmatched_campaign_events: self.unmatched_campaign_events.load(Ordering::Relaxed),
            malformed_events: self.malformed_events.load(Ordering::Relaxed),
            billing_failures: self.billing_failures.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            agent_unresolved: self.agent_unresolved.load(Ordering::Relaxed),
            submission_queue_rejects: self.submission_queue_rejects.load(Ordering::Relaxed),
            event_queue_rejects: self.event_queue_rejects.load(Ordering::Relaxed),
            discarded_on_shutdown: self.discarded_on_shutdown.load(Ordering::Relaxed),
            sweeps_run: self.sweeps_run.load(Ordering::Relaxed),
            last_sweep_expired: self.last_sweep_expired.load(Ordering::Relaxed),
            wins_evicted: self.wins_evicted.load(Ordering::Relaxed),
            pending_auctions: self.pending_auctions.load(Ordering::Relaxed),
            retained_wins: self.retained_wins.load(Ordering::Relaxed),
            last_win_loss_ms: self.last_win_loss_ms.load(Ordering::Relaxed),
            last_campaign_event_ms: self.last_campaign_event_ms.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ReconcilerStatsSnapshot {
    pub auctions_submitted: u64,
    pub duplicate_auctions: u64,
    pub wins_matched: u64,
    pub losses_explicit: u64,
    pub losses_implicit: u64,
    pub campaign_events_matched: u64,
    pub unmatched_wins: u64,
    pub unmatched_losses: u64,
    pub unmatched_campaign_events: u64,
    pub malformed_events: u64,
    pub billing_failures: u64,
    pub delivery_failures: u64,
    pub agent_unresolved: u64,
    pub submission_queue_rejects: u64,
    pub event_queue_rejects: u64,
    pub discarded_on_shutdown: u64,
    pub sweeps_run: u64,
    pub last_sweep_expired: u64,
    pub wins_evicted: u64,
    pub pending_auctions: u64,
    pub retained_wins: u64,
    pub last_win_loss_ms: i64,
    pub last_campaign_event_ms: i64,
}

impl ReconcilerStatsSnapshot {
    /// Total terminal outcomes settled against billing.
    pub fn settlements(&self) -> u64 {
        self.wins_matched + self.losses_explicit + self.losses_implicit
    }
}
