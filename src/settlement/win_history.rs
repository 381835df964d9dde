//! Time-windowed retention of matched wins.
//!
//! Campaign events arrive after the win, once the pending entry is already
//! gone, so wins are kept around just long enough to plausibly receive them.
//! Lookups come in two shapes: exact (auction + spot) and wildcard (every
//! winning spot of an auction). Single-writer, same discipline as the
//! pending ledger.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::outcome::MatchedWin;
use crate::models::AuctionKey;

#[derive(Debug)]
pub struct WinHistory {
    retention: chrono::Duration,
    by_key: HashMap<AuctionKey, MatchedWin>,
    // Wildcard index: auction id -> winning spot keys, in win order.
    by_auction: HashMap<String, Vec<AuctionKey>>,
    // Eviction queue in insertion order. Resolution timestamps are assigned
    // by the single consumer, so insertion order is resolution order.
    eviction: VecDeque<(DateTime<Utc>, AuctionKey)>,
}

impl WinHistory {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention: chrono::Duration::from_std(retention)
                .unwrap_or_else(|_| chrono::Duration::MAX),
            by_key: HashMap::new(),
            by_auction: HashMap::new(),
            eviction: VecDeque::new(),
        }
    }

    /// Retain a matched win for later campaign-event attribution.
    pub fn insert(&mut self, win: MatchedWin) {
        let key = win.key.clone();
        self.eviction.push_back((win.resolved_at, key.clone()));
        let spots = self.by_auction.entry(key.auction_id.clone()).or_default();
        if !spots.contains(&key) {
            spots.push(key.clone());
        }
        self.by_key.insert(key, win);
    }

    /// Exact lookup for a non-wildcard identity.
    pub fn get(&self, key: &AuctionKey) -> Option<&MatchedWin> {
        self.by_key.get(key)
    }

    /// Wildcard lookup: every retained win of this auction, in win order.
    pub fn wins_for_auction(&self, auction_id: &str) -> Vec<&MatchedWin> {
        self.by_auction
            .get(auction_id)
            .map(|keys| keys.iter().filter_map(|k| self.by_key.get(k)).collect())
            .unwrap_or_default()
    }

    /// Drop every win whose retention horizon has passed. Returns the number
    /// evicted.
    pub fn evict_expired(&mut self, now: DateTime<Utc>) -> usize {
        let mut evicted = 0;
        while let Some((resolved_at, key)) = self.eviction.front().cloned() {
            // Saturating horizon: an unrepresentable deadline never expires.
            let horizon = resolved_at
                .checked_add_signed(self.retention)
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            if horizon > now {
                break;
            }
            self.eviction.pop_front();
            // A stale queue entry (win replaced or already evicted) is
            // skipped without touching the live entry.
            let live = self
                .by_key
                .get(&key)
                .map(|w| w.resolved_at == resolved_at)
                .unwrap_or(false);
            if !live {
                continue;
            }
            self.by_key.remove(&key);
            if let Some(spots) = self.by_auction.get_mut(&key.auction_id) {
                spots.retain(|k| k != &key);
                if spots.is_empty() {
                    self.by_auction.remove(&key.auction_id);
                }
            }
            evicted += 1;
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BidSnapshot, MicroUsd, UserIds};
    use chrono::Duration as ChronoDuration;

    fn win(auction: &str, spot: &str, resolved_at: DateTime<Utc>) -> MatchedWin {
        MatchedWin {
            key: AuctionKey::new(auction, spot),
            snapshot: BidSnapshot::new(MicroUsd::from_dollars(1.0), "acct", resolved_at),
            win_price: MicroUsd::from_dollars(0.8),
            win_meta: serde_json::Value::Null,
            user_ids: UserIds::default(),
            resolved_at,
        }
    }

    #[test]
    fn wildcard_lookup_returns_every_spot_in_win_order() {
        let mut history = WinHistory::new(Duration::from_secs(60));
        let t0 = Utc::now();
        history.insert(win("a1", "s2", t0));
        history.insert(win("a1", "s1", t0 + ChronoDuration::seconds(1)));
        history.insert(win("a2", "s1", t0));

        let wins = history.wins_for_auction("a1");
        let spots: Vec<_> = wins.iter().map(|w| w.key.ad_spot_id.as_str()).collect();
        assert_eq!(spots, vec!["s2", "s1"]);
        assert!(history.get(&AuctionKey::new("a1", "s1")).is_some());
        assert!(history.get(&AuctionKey::new("a1", "s9")).is_none());
    }

    #[test]
    fn eviction_past_the_horizon() {
        let mut history = WinHistory::new(Duration::from_secs(10));
        let t0 = Utc::now();
        history.insert(win("a1", "s1", t0));
        history.insert(win("a2", "s1", t0 + ChronoDuration::seconds(8)));

        assert_eq!(history.evict_expired(t0 + ChronoDuration::seconds(9)), 0);

        let evicted = history.evict_expired(t0 + ChronoDuration::seconds(12));
        assert_eq!(evicted, 1);
        assert!(history.get(&AuctionKey::new("a1", "s1")).is_none());
        assert!(history.wins_for_auction("a1").is_empty());
        assert_eq!(history.len(), 1);

        assert_eq!(history.evict_expired(t0 + ChronoDuration::seconds(30)), 1);
        assert!(history.is_empty());
    }
}
