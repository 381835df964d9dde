//! Outcome routing.
//!
//! Exhaustive dispatch over the closed outcome union: wins and losses settle
//! against billing exactly once (the matcher removed the pending entry
//! before handing the outcome over), then go to the owning agent; campaign
//! events go to the agent of the referenced win without touching billing;
//! unmatched and error records are diagnostics only. A collaborator failure
//! is logged and counted, never propagated; the consumer loop keeps going.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::agents::{AgentDirectory, AgentTransport};
use super::banker::{BankerHandle, SettleDirection};
use super::outcome::{AgentMessage, MatchedCampaignEvent, MatchedLoss, MatchedWin, Outcome};
use super::stats::ReconcilerStats;
use crate::models::MicroUsd;

pub struct OutcomeRouter {
    banker: BankerHandle,
    directory: Arc<dyn AgentDirectory>,
    transport: Arc<dyn AgentTransport>,
    /// Matched outcomes are republished here for interested listeners
    /// (loggers, analytics). Lagging or absent listeners are ignored.
    listeners: broadcast::Sender<Outcome>,
    stats: Arc<ReconcilerStats>,
}

impl OutcomeRouter {
    pub fn new(
        banker: BankerHandle,
        directory: Arc<dyn AgentDirectory>,
        transport: Arc<dyn AgentTransport>,
        listeners: broadcast::Sender<Outcome>,
        stats: Arc<ReconcilerStats>,
    ) -> Self {
        Self {
            banker,
            directory,
            transport,
            listeners,
            stats,
        }
    }

    pub async fn route(&self, outcome: Outcome) {
        match outcome {
            Outcome::Win(win) => self.route_win(win).await,
            Outcome::Loss(loss) => self.route_loss(loss).await,
            Outcome::CampaignEvent(ev) => self.route_campaign_event(ev).await,
            Outcome::Unmatched(unmatched) => {
                use super::outcome::UnmatchedKind;
                let counter = match unmatched.kind {
                    UnmatchedKind::Win => &self.stats.unmatched_wins,
                    UnmatchedKind::Loss => &self.stats.unmatched_losses,
                    UnmatchedKind::CampaignEvent => &self.stats.unmatched_campaign_events,
                };
                counter.fetch_add(1, Ordering::Relaxed);
                debug!(
                    kind = ?unmatched.kind,
                    key = %unmatched.key,
                    detail = %unmatched.detail,
                    "unmatched event"
                );
            }
            Outcome::Error(err) => {
                self.stats.malformed_events.fetch_add(1, Ordering::Relaxed);
                error!(context = %err.context, cause = %err.cause, key = ?err.key, "event error");
            }
        }
    }

    async fn route_win(&self, win: MatchedWin) {
        self.stats.wins_matched.fetch_add(1, Ordering::Relaxed);
        info!(key = %win.key, price = %win.win_price, account = %win.snapshot.account, "auction won");

        self.settle(&win.snapshot.account, win.win_price, SettleDirection::Charge)
            .await;
        self.deliver(&win.snapshot.account, AgentMessage::for_win(&win))
            .await;
        let _ = self.listeners.send(Outcome::Win(win));
    }

    async fn route_loss(&self, loss: MatchedLoss) {
        use super::outcome::LossKind;
        match loss.kind {
            LossKind::Explicit => self.stats.losses_explicit.fetch_add(1, Ordering::Relaxed),
            LossKind::Implicit => self.stats.losses_implicit.fetch_add(1, Ordering::Relaxed),
        };
        debug!(key = %loss.key, kind = ?loss.kind, account = %loss.snapshot.account, "auction lost");

        self.settle(
            &loss.snapshot.account,
            loss.snapshot.bid_price,
            SettleDirection::Release,
        )
        .await;
        self.deliver(&loss.snapshot.account, AgentMessage::for_loss(&loss))
            .await;
        let _ = self.listeners.send(Outcome::Loss(loss));
    }

    async fn route_campaign_event(&self, ev: MatchedCampaignEvent) {
        self.stats
            .campaign_events_matched
            .fetch_add(1, Ordering::Relaxed);
        debug!(label = %ev.label, key = %ev.win.key, "campaign event attributed");

        // Billing already happened at win time; only the agent hears this.
        self.deliver(&ev.win.snapshot.account, AgentMessage::for_campaign_event(&ev))
            .await;
        let _ = self.listeners.send(Outcome::CampaignEvent(ev));
    }

    async fn settle(&self, account: &str, amount: MicroUsd, direction: SettleDirection) {
        if let Err(err) = self.banker.current().settle(account, amount, direction).await {
            self.stats.billing_failures.fetch_add(1, Ordering::Relaxed);
            error!(account, %amount, ?direction, %err, "billing settlement failed");
        }
    }

    async fn deliver(&self, account: &str, message: AgentMessage) {
        let Some(address) = self.directory.resolve(account) else {
            self.stats.agent_unresolved.fetch_add(1, Ordering::Relaxed);
            debug!(account, "no agent registered for account");
            return;
        };
        if let Err(err) = self.transport.deliver(&address, message).await {
            // Best-effort: the settlement above stands regardless.
            self.stats.delivery_failures.fetch_add(1, Ordering::Relaxed);
            warn!(account, address, %err, "agent delivery failed");
        }
    }
}
