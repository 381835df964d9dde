//! Pending-auction ledger.
//!
//! The authoritative in-memory store of auctions awaiting an outcome. The
//! ledger itself carries no locking: all mutation happens on the single
//! consumer task that also drives the sweeper, and that discipline is what
//! makes the win-vs-expiry tie-break deterministic.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use super::error::LedgerError;
use crate::models::{AuctionKey, BidSnapshot};

/// One auction awaiting its outcome. Entries are always pending; removal
/// (match or expiry) is the only terminal transition.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAuction {
    pub key: AuctionKey,
    pub snapshot: BidSnapshot,
    pub submitted_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct PendingLedger {
    entries: HashMap<AuctionKey, PendingAuction>,
    // Deadline-ordered view of `entries`, ties broken by identity so sweeps
    // are deterministic. Kept in lockstep with the map.
    by_deadline: BTreeSet<(DateTime<Utc>, AuctionKey)>,
}

impl PendingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new pending auction. A duplicate identity is rejected and
    /// the original entry kept untouched.
    pub fn insert(
        &mut self,
        key: AuctionKey,
        snapshot: BidSnapshot,
        submitted_at: DateTime<Utc>,
        deadline: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        if self.entries.contains_key(&key) {
            return Err(LedgerError::DuplicateAuction(key));
        }
        self.by_deadline.insert((deadline, key.clone()));
        self.entries.insert(
            key.clone(),
            PendingAuction {
                key,
                snapshot,
                submitted_at,
                deadline,
            },
        );
        Ok(())
    }

    /// Atomically remove and return the entry for `key`, if present.
    pub fn take(&mut self, key: &AuctionKey) -> Option<PendingAuction> {
        let entry = self.entries.remove(key)?;
        self.by_deadline.remove(&(entry.deadline, entry.key.clone()));
        Some(entry)
    }

    /// Borrow the entry for `key` without removing it.
    pub fn get(&self, key: &AuctionKey) -> Option<&PendingAuction> {
        self.entries.get(key)
    }

    /// Remove and return every entry whose deadline is at or before `now`,
    /// in deadline order (ties by identity).
    pub fn sweep_expired(&mut self, now: DateTime<Utc>) -> Vec<PendingAuction> {
        let mut expired = Vec::new();
        while let Some((deadline, key)) = self.by_deadline.first().cloned() {
            if deadline > now {
                break;
            }
            self.by_deadline.remove(&(deadline, key.clone()));
            if let Some(entry) = self.entries.remove(&key) {
                expired.push(entry);
            }
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Earliest deadline currently pending, if any.
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.by_deadline.first().map(|(d, _)| *d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MicroUsd;
    use chrono::Duration;

    fn snapshot() -> BidSnapshot {
        BidSnapshot::new(MicroUsd::from_dollars(1.0), "acct", Utc::now())
    }

    #[test]
    fn duplicate_insert_keeps_the_original() {
        let mut ledger = PendingLedger::new();
        let key = AuctionKey::new("a1", "s1");
        let t0 = Utc::now();
        let original = BidSnapshot::new(MicroUsd::from_dollars(2.0), "acct-original", t0);

        ledger
            .insert(key.clone(), original.clone(), t0, t0 + Duration::seconds(5))
            .unwrap();

        let err = ledger
            .insert(key.clone(), snapshot(), t0, t0 + Duration::seconds(9))
            .unwrap_err();
        assert_eq!(err, LedgerError::DuplicateAuction(key.clone()));

        let kept = ledger.take(&key).expect("original entry present");
        assert_eq!(kept.snapshot, original, "duplicate must not overwrite");
        assert_eq!(kept.deadline, t0 + Duration::seconds(5));
    }

    #[test]
    fn take_removes_exactly_once() {
        let mut ledger = PendingLedger::new();
        let key = AuctionKey::new("a1", "s1");
        let t0 = Utc::now();
        ledger
            .insert(key.clone(), snapshot(), t0, t0 + Duration::seconds(5))
            .unwrap();

        assert!(ledger.take(&key).is_some());
        assert!(ledger.take(&key).is_none(), "second take must miss");
        assert!(ledger.is_empty());
        assert_eq!(ledger.next_deadline(), None);
    }

    #[test]
    fn sweep_returns_expired_in_deadline_order_with_identity_tiebreak() {
        let mut ledger = PendingLedger::new();
        let t0 = Utc::now();

        // Same deadline for b and a: identity order must decide.
        ledger
            .insert(AuctionKey::new("b", "s1"), snapshot(), t0, t0 + Duration::seconds(2))
            .unwrap();
        ledger
            .insert(AuctionKey::new("a", "s1"), snapshot(), t0, t0 + Duration::seconds(2))
            .unwrap();
        ledger
            .insert(AuctionKey::new("c", "s1"), snapshot(), t0, t0 + Duration::seconds(1))
            .unwrap();
        ledger
            .insert(AuctionKey::new("d", "s1"), snapshot(), t0, t0 + Duration::seconds(60))
            .unwrap();

        let expired = ledger.sweep_expired(t0 + Duration::seconds(3));
        let order: Vec<_> = expired.iter().map(|e| e.key.auction_id.as_str()).collect();
        assert_eq!(order, vec!["c", "a", "b"]);
        assert_eq!(ledger.len(), 1, "unexpired entry stays");

        // Nothing left at or before the cutoff.
        assert!(ledger.sweep_expired(t0 + Duration::seconds(3)).is_empty());
    }

    #[test]
    fn sweep_is_inclusive_of_the_exact_deadline() {
        let mut ledger = PendingLedger::new();
        let t0 = Utc::now();
        let deadline = t0 + Duration::seconds(5);
        ledger
            .insert(AuctionKey::new("a1", "s1"), snapshot(), t0, deadline)
            .unwrap();

        assert!(ledger.sweep_expired(deadline - Duration::milliseconds(1)).is_empty());
        assert_eq!(ledger.sweep_expired(deadline).len(), 1);
    }
}
