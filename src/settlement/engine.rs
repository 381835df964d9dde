//! The post-auction consumer task and its injection façade.
//!
//! One task owns the matcher (ledger + win history) and the sweep timer, so
//! every mutation is serialized and the win-vs-expiry tie-break is decided
//! purely by dequeue order. Interleaving policy, fixed and relied on by
//! tests: shutdown first, then submissions, then post-auction events, then
//! the sweep tick (`biased` select in that order).

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::agents::{AgentDirectory, AgentTransport};
use super::banker::{Banker, BankerHandle};
use super::config::ReconcilerConfig;
use super::error::ConfigError;
use super::intake::{intake, Injector, IntakeQueues, PostAuctionEvent, SubmittedAuctionEvent};
use super::matcher::EventMatcher;
use super::outcome::Outcome;
use super::router::OutcomeRouter;
use super::stats::{ReconcilerStats, ReconcilerStatsSnapshot};
use crate::models::{AuctionKey, BidSnapshot, MicroUsd, UserIds};

/// Pull-style health snapshot for the monitoring collaborator.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthIndicator {
    pub ok: bool,
    pub pending_auctions: u64,
    pub retained_wins: u64,
    /// Milliseconds since the last processed win/loss, if any yet.
    pub last_win_loss_age_ms: Option<i64>,
    /// Milliseconds since the last processed campaign event, if any yet.
    pub last_campaign_event_age_ms: Option<i64>,
}

/// The consumer half: owns the queues and all mutable matching state.
pub struct PostAuctionEngine {
    config: ReconcilerConfig,
    matcher: EventMatcher,
    router: OutcomeRouter,
    queues: IntakeQueues,
    stats: Arc<ReconcilerStats>,
    shutdown_rx: broadcast::Receiver<()>,
}

/// Cloneable façade handed to producers and operators. Injection calls
/// enqueue and return immediately; they never block and never suspend.
#[derive(Debug, Clone)]
pub struct PostAuctionHandle {
    injector: Injector,
    stats: Arc<ReconcilerStats>,
    banker: BankerHandle,
    listeners: broadcast::Sender<Outcome>,
    shutdown: broadcast::Sender<()>,
}

impl PostAuctionEngine {
    /// Build the engine and its handle. The configuration is validated
    /// here; a bad config refuses to construct rather than misbehave later.
    pub fn new(
        config: ReconcilerConfig,
        banker: Arc<dyn Banker>,
        directory: Arc<dyn AgentDirectory>,
        transport: Arc<dyn AgentTransport>,
    ) -> Result<(Self, PostAuctionHandle), ConfigError> {
        config.validate()?;

        let stats = Arc::new(ReconcilerStats::default());
        let (injector, queues) = intake(
            config.submission_queue_size,
            config.event_queue_size,
            stats.clone(),
        );
        let (listeners, _) = broadcast::channel(config.outcome_channel_size);
        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let banker = BankerHandle::new(banker);

        let matcher = EventMatcher::new(&config, stats.clone());
        let router = OutcomeRouter::new(
            banker.clone(),
            directory,
            transport,
            listeners.clone(),
            stats.clone(),
        );

        let engine = Self {
            config,
            matcher,
            router,
            queues,
            stats: stats.clone(),
            shutdown_rx,
        };
        let handle = PostAuctionHandle {
            injector,
            stats,
            banker,
            listeners,
            shutdown,
        };
        Ok((engine, handle))
    }

    /// Run the consumer loop until shutdown. Spawn this on the runtime:
    /// `tokio::spawn(engine.run())`.
    pub async fn run(mut self) {
        info!(
            sweep_interval_ms = self.config.sweep_interval.as_millis() as u64,
            win_timeout_ms = self.config.win_timeout.as_millis() as u64,
            auction_timeout_ms = self.config.auction_timeout.as_millis() as u64,
            "post-auction engine started"
        );

        let mut sweep = tokio::time::interval(self.config.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.recv() => {
                    self.drain().await;
                    break;
                }

                Some(submission) = self.queues.submissions.recv() => {
                    self.matcher.submit(submission);
                }

                Some(event) = self.queues.events.recv() => {
                    self.process_event(event).await;
                }

                _ = sweep.tick() => {
                    self.run_sweep(Utc::now()).await;
                }
            }
        }

        info!("post-auction engine stopped");
    }

    async fn process_event(&mut self, event: PostAuctionEvent) {
        for outcome in self.matcher.apply(event) {
            self.router.route(outcome).await;
        }
    }

    async fn run_sweep(&mut self, now: DateTime<Utc>) {
        for outcome in self.matcher.sweep(now) {
            self.router.route(outcome).await;
        }
    }

    /// Bounded shutdown drain: keep processing already-queued events for at
    /// most the drain window, then discard the rest with a diagnostic.
    /// Sweep ticks stop immediately; auctions still pending at process
    /// death are not made durable here.
    async fn drain(&mut self) {
        // Closing the receivers stops producers from adding more work and
        // lets recv() report exhaustion instead of waiting.
        self.queues.submissions.close();
        self.queues.events.close();

        let deadline = tokio::time::Instant::now() + self.config.drain_window;
        let mut submissions_open = true;
        let mut events_open = true;

        while submissions_open || events_open {
            tokio::select! {
                biased;

                _ = tokio::time::sleep_until(deadline) => break,

                submission = self.queues.submissions.recv(), if submissions_open => {
                    match submission {
                        Some(s) => self.matcher.submit(s),
                        None => submissions_open = false,
                    }
                }

                event = self.queues.events.recv(), if events_open => {
                    match event {
                        Some(e) => self.process_event(e).await,
                        None => events_open = false,
                    }
                }
            }
        }

        let mut discarded: u64 = 0;
        while self.queues.submissions.try_recv().is_ok() {
            discarded += 1;
        }
        while self.queues.events.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            self.stats
                .discarded_on_shutdown
                .fetch_add(discarded, Ordering::Relaxed);
            warn!(discarded, "shutdown drain window elapsed, discarding queued events");
        }
        debug!(
            pending = self.matcher.pending_count(),
            "drain complete; remaining pending auctions are abandoned"
        );
    }
}

impl PostAuctionHandle {
    /// Transfer a submitted auction into the post-auction loop. Assumes the
    /// auction was submitted with a non-empty bid. The loss deadline counts
    /// from now; `loss_timeout` falls back to the configured win timeout.
    pub fn submit_auction(
        &self,
        auction_id: impl Into<String>,
        ad_spot_id: impl Into<String>,
        snapshot: BidSnapshot,
        loss_timeout: Option<Duration>,
    ) -> bool {
        self.injector.submit(SubmittedAuctionEvent {
            key: AuctionKey::new(auction_id, ad_spot_id),
            snapshot,
            loss_timeout,
            submitted_at: Utc::now(),
        })
    }

    /// Inject a WIN notification. Thread safe and asynchronous.
    #[allow(clippy::too_many_arguments)]
    pub fn inject_win(
        &self,
        auction_id: impl Into<String>,
        ad_spot_id: impl Into<String>,
        win_price: MicroUsd,
        timestamp: DateTime<Utc>,
        win_meta: serde_json::Value,
        user_ids: UserIds,
        account: impl Into<String>,
        bid_timestamp: DateTime<Utc>,
    ) -> bool {
        self.injector.inject(PostAuctionEvent::Win {
            key: AuctionKey::new(auction_id, ad_spot_id),
            win_price,
            timestamp,
            win_meta,
            user_ids,
            account: account.into(),
            bid_timestamp,
        })
    }

    /// Inject a LOSS notification. Only useful for simulations; production
    /// losses are inferred by the sweeper.
    pub fn inject_loss(
        &self,
        auction_id: impl Into<String>,
        ad_spot_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        loss_meta: serde_json::Value,
        account: impl Into<String>,
        bid_timestamp: DateTime<Utc>,
    ) -> bool {
        self.injector.inject(PostAuctionEvent::Loss {
            key: AuctionKey::new(auction_id, ad_spot_id),
            timestamp,
            loss_meta,
            account: account.into(),
            bid_timestamp,
        })
    }

    /// Inject a campaign event. An empty `ad_spot_id` attributes the event
    /// to every winning spot of the auction.
    pub fn inject_campaign_event(
        &self,
        label: impl Into<String>,
        auction_id: impl Into<String>,
        ad_spot_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        event_meta: serde_json::Value,
        user_ids: UserIds,
    ) -> bool {
        self.injector.inject(PostAuctionEvent::CampaignEvent {
            label: label.into(),
            key: AuctionKey::new(auction_id, ad_spot_id),
            timestamp,
            event_meta,
            user_ids,
        })
    }

    /// Subscribe to matched outcomes (wins, losses, campaign events).
    pub fn subscribe_outcomes(&self) -> broadcast::Receiver<Outcome> {
        self.listeners.subscribe()
    }

    pub fn stats(&self) -> ReconcilerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Replace the billing collaborator at runtime.
    pub fn swap_banker(&self, banker: Arc<dyn Banker>) {
        self.banker.swap(banker);
    }

    /// Health snapshot for the monitoring collaborator's periodic pull.
    pub fn health_indicator(&self) -> HealthIndicator {
        let snap = self.stats.snapshot();
        let now_ms = Utc::now().timestamp_millis();
        let age = |ts_ms: i64| (ts_ms > 0).then(|| now_ms - ts_ms);
        HealthIndicator {
            ok: true,
            pending_auctions: snap.pending_auctions,
            retained_wins: snap.retained_wins,
            last_win_loss_age_ms: age(snap.last_win_loss_ms),
            last_campaign_event_age_ms: age(snap.last_campaign_event_ms),
        }
    }

    /// Signal the consumer to drain and stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }
}
