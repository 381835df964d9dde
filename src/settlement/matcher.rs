//! The match/timeout state machine.
//!
//! Per identity the states are implicit in structure membership: pending
//! (in the ledger) → won (in the win history) or lost (gone). The matcher
//! owns both structures and is driven exclusively by the consumer task, in
//! dequeue order. Processing order, not event-timestamp order, is
//! authoritative: a win dequeued after its entry was swept is unmatched,
//! even when the win's own timestamp predates the deadline.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::config::ReconcilerConfig;
use super::intake::{PostAuctionEvent, SubmittedAuctionEvent};
use super::ledger::PendingLedger;
use super::outcome::{
    ErrorEvent, LossKind, MatchedCampaignEvent, MatchedLoss, MatchedWin, Outcome, UnmatchedEvent,
    UnmatchedKind,
};
use super::stats::ReconcilerStats;
use super::win_history::WinHistory;
use crate::models::{AuctionKey, MicroUsd, UserIds};

pub struct EventMatcher {
    ledger: PendingLedger,
    history: WinHistory,
    stats: Arc<ReconcilerStats>,
    default_loss_timeout: chrono::Duration,
}

impl EventMatcher {
    pub fn new(config: &ReconcilerConfig, stats: Arc<ReconcilerStats>) -> Self {
        Self {
            ledger: PendingLedger::new(),
            history: WinHistory::new(config.auction_timeout),
            stats,
            default_loss_timeout: chrono::Duration::from_std(config.win_timeout)
                .unwrap_or_else(|_| chrono::Duration::MAX),
        }
    }

    /// Track a submitted auction until its outcome arrives or its deadline
    /// passes. Duplicates are reported and discarded; the original entry is
    /// never overwritten.
    pub fn submit(&mut self, event: SubmittedAuctionEvent) {
        let timeout = event
            .loss_timeout
            .and_then(|t| chrono::Duration::from_std(t).ok())
            .unwrap_or(self.default_loss_timeout);
        let deadline = event
            .submitted_at
            .checked_add_signed(timeout)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        match self
            .ledger
            .insert(event.key.clone(), event.snapshot, event.submitted_at, deadline)
        {
            Ok(()) => {
                self.stats.auctions_submitted.fetch_add(1, Ordering::Relaxed);
                debug!(key = %event.key, %deadline, "auction pending");
            }
            Err(err) => {
                self.stats.duplicate_auctions.fetch_add(1, Ordering::Relaxed);
                warn!(key = %event.key, %err, "duplicate submission discarded");
            }
        }
        self.sync_gauges();
    }

    /// Apply one dequeued notification, producing the outcomes to route.
    pub fn apply(&mut self, event: PostAuctionEvent) -> Vec<Outcome> {
        let outcomes = match event {
            PostAuctionEvent::Win {
                key,
                win_price,
                timestamp,
                win_meta,
                user_ids,
                account,
                bid_timestamp: _,
            } => vec![self.win(key, win_price, timestamp, win_meta, user_ids, account)],
            PostAuctionEvent::Loss {
                key,
                timestamp,
                loss_meta: _,
                account,
                bid_timestamp: _,
            } => vec![self.loss(key, timestamp, account)],
            PostAuctionEvent::CampaignEvent {
                label,
                key,
                timestamp,
                event_meta,
                user_ids,
            } => self.campaign_event(label, key, timestamp, event_meta, user_ids),
        };
        self.sync_gauges();
        outcomes
    }

    fn win(
        &mut self,
        key: AuctionKey,
        win_price: MicroUsd,
        timestamp: DateTime<Utc>,
        win_meta: serde_json::Value,
        user_ids: UserIds,
        account: String,
    ) -> Outcome {
        if key.is_wildcard() {
            return self.error("win", "win notification without a spot id", Some(key));
        }
        if win_price.value() < 0 {
            return self.error("win", format!("negative win price {win_price}"), Some(key));
        }

        // Validate against the stored bid before consuming the entry: a win
        // for the wrong account leaves the auction pending so it still
        // resolves exactly once (by expiry if nothing else arrives).
        if let Some(entry) = self.ledger.get(&key) {
            if entry.snapshot.account != account {
                let cause = format!(
                    "win for account {account} but bid was placed under {}",
                    entry.snapshot.account
                );
                return self.error("win", cause, Some(key));
            }
        }

        match self.ledger.take(&key) {
            Some(entry) => {
                let win = MatchedWin {
                    key: entry.key,
                    snapshot: entry.snapshot,
                    win_price,
                    win_meta,
                    user_ids,
                    resolved_at: timestamp,
                };
                self.history.insert(win.clone());
                self.stats.mark_win_loss(Utc::now());
                Outcome::Win(win)
            }
            None => Outcome::Unmatched(UnmatchedEvent {
                kind: UnmatchedKind::Win,
                key,
                event_timestamp: timestamp,
                detail: "no pending auction (already resolved, expired, or unknown)".to_string(),
            }),
        }
    }

    fn loss(&mut self, key: AuctionKey, timestamp: DateTime<Utc>, account: String) -> Outcome {
        if key.is_wildcard() {
            return self.error("loss", "loss notification without a spot id", Some(key));
        }

        if let Some(entry) = self.ledger.get(&key) {
            if entry.snapshot.account != account {
                let cause = format!(
                    "loss for account {account} but bid was placed under {}",
                    entry.snapshot.account
                );
                return self.error("loss", cause, Some(key));
            }
        }

        match self.ledger.take(&key) {
            Some(entry) => {
                self.stats.mark_win_loss(Utc::now());
                // A loss retains nothing: there is no win for a campaign
                // event to attach to.
                Outcome::Loss(MatchedLoss {
                    key: entry.key,
                    snapshot: entry.snapshot,
                    kind: LossKind::Explicit,
                    resolved_at: timestamp,
                })
            }
            None => Outcome::Unmatched(UnmatchedEvent {
                kind: UnmatchedKind::Loss,
                key,
                event_timestamp: timestamp,
                detail: "no pending auction (already resolved, expired, or unknown)".to_string(),
            }),
        }
    }

    fn campaign_event(
        &mut self,
        label: String,
        key: AuctionKey,
        timestamp: DateTime<Utc>,
        event_meta: serde_json::Value,
        user_ids: UserIds,
    ) -> Vec<Outcome> {
        if label.is_empty() {
            return vec![self.error("campaign_event", "empty event label", Some(key))];
        }
        self.stats.mark_campaign_event(Utc::now());

        let wins: Vec<MatchedWin> = if key.is_wildcard() {
            // Broadcast policy: an event with no spot id is attributed to
            // every winning spot of the auction.
            self.history
                .wins_for_auction(&key.auction_id)
                .into_iter()
                .cloned()
                .collect()
        } else {
            self.history.get(&key).cloned().into_iter().collect()
        };

        if wins.is_empty() {
            return vec![Outcome::Unmatched(UnmatchedEvent {
                kind: UnmatchedKind::CampaignEvent,
                key,
                event_timestamp: timestamp,
                detail: format!("no retained win for {label}"),
            })];
        }

        wins.into_iter()
            .map(|win| {
                Outcome::CampaignEvent(MatchedCampaignEvent {
                    label: label.clone(),
                    key: key.clone(),
                    event_meta: event_meta.clone(),
                    user_ids: user_ids.clone(),
                    resolved_at: timestamp,
                    win,
                })
            })
            .collect()
    }

    /// Expire every pending auction whose deadline has passed, synthesizing
    /// implicit losses, and age out retained wins.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<Outcome> {
        let expired = self.ledger.sweep_expired(now);
        self.stats.sweeps_run.fetch_add(1, Ordering::Relaxed);
        self.stats
            .last_sweep_expired
            .store(expired.len() as u64, Ordering::Relaxed);
        if !expired.is_empty() {
            self.stats.mark_win_loss(now);
            debug!(count = expired.len(), "sweep expired pending auctions");
        }

        let evicted = self.history.evict_expired(now);
        if evicted > 0 {
            self.stats
                .wins_evicted
                .fetch_add(evicted as u64, Ordering::Relaxed);
        }

        let outcomes = expired
            .into_iter()
            .map(|entry| {
                Outcome::Loss(MatchedLoss {
                    key: entry.key,
                    snapshot: entry.snapshot,
                    kind: LossKind::Implicit,
                    resolved_at: now,
                })
            })
            .collect();
        self.sync_gauges();
        outcomes
    }

    fn error(
        &self,
        context: &str,
        cause: impl Into<String>,
        key: Option<AuctionKey>,
    ) -> Outcome {
        Outcome::Error(ErrorEvent {
            context: context.to_string(),
            cause: cause.into(),
            key,
            at: Utc::now(),
        })
    }

    pub fn pending_count(&self) -> usize {
        self.ledger.len()
    }

    pub fn retained_wins(&self) -> usize {
        self.history.len()
    }

    /// Earliest pending deadline, for the health indicator.
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.ledger.next_deadline()
    }

    fn sync_gauges(&self) {
        self.stats
            .pending_auctions
            .store(self.ledger.len() as u64, Ordering::Relaxed);
        self.stats
            .retained_wins
            .store(self.history.len() as u64, Ordering::Relaxed);
    }
}
