//! End-to-end tests for the post-auction engine: spawn the consumer task,
//! drive the injection façade like a producer would, and observe billing,
//! agent delivery, and diagnostics through recording collaborators.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use postauction_backend::models::{BidSnapshot, MicroUsd, UserIds};
use postauction_backend::settlement::{
    AgentMessage, AgentTransport, DeliveryError, LossKind, Outcome, PaperBanker,
    PostAuctionEngine, PostAuctionHandle, ReconcilerConfig, StaticAgentDirectory,
};

#[derive(Default)]
struct RecordingTransport {
    delivered: Mutex<Vec<(String, AgentMessage)>>,
}

impl RecordingTransport {
    fn messages(&self) -> Vec<AgentMessage> {
        self.delivered.lock().iter().map(|(_, m)| m.clone()).collect()
    }
}

#[async_trait]
impl AgentTransport for RecordingTransport {
    async fn deliver(&self, address: &str, message: AgentMessage) -> Result<(), DeliveryError> {
        self.delivered.lock().push((address.to_string(), message));
        Ok(())
    }
}

struct Harness {
    handle: PostAuctionHandle,
    consumer: JoinHandle<()>,
    banker: Arc<PaperBanker>,
    transport: Arc<RecordingTransport>,
}

fn spawn_engine(config: ReconcilerConfig) -> Harness {
    let banker = Arc::new(PaperBanker::new());
    let directory = Arc::new(StaticAgentDirectory::new());
    directory.register("acct-1", "tcp://agent-1:9100");
    let transport = Arc::new(RecordingTransport::default());

    let (engine, handle) =
        PostAuctionEngine::new(config, banker.clone(), directory, transport.clone())
            .expect("valid config");
    let consumer = tokio::spawn(engine.run());
    Harness {
        handle,
        consumer,
        banker,
        transport,
    }
}

fn fast_config() -> ReconcilerConfig {
    let mut config = ReconcilerConfig::default();
    config.win_timeout = Duration::from_millis(400);
    config.sweep_interval = Duration::from_millis(50);
    config.drain_window = Duration::from_millis(500);
    config
}

fn snapshot(price_dollars: f64, account: &str) -> BidSnapshot {
    BidSnapshot::new(MicroUsd::from_dollars(price_dollars), account, Utc::now())
}

/// Poll until `check` passes or the timeout elapses.
async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn win_before_deadline_matches_and_bills_exactly_once() {
    let h = spawn_engine(ReconcilerConfig::default());
    let mut outcomes = h.handle.subscribe_outcomes();

    let t0 = Utc::now();
    assert!(h.handle.submit_auction(
        "A1",
        "S1",
        snapshot(2.0, "acct-1"),
        Some(Duration::from_secs(5)),
    ));
    assert!(h.handle.inject_win(
        "A1",
        "S1",
        MicroUsd::from_dollars(1.50),
        t0 + ChronoDuration::seconds(2),
        serde_json::json!({"exchange": "ex-1"}),
        UserIds::exchange("u-1"),
        "acct-1",
        t0,
    ));

    let outcome = outcomes.recv().await.expect("outcome broadcast");
    match outcome {
        Outcome::Win(win) => {
            assert_eq!(win.key.auction_id, "A1");
            assert_eq!(win.key.ad_spot_id, "S1");
            assert_eq!(win.win_price, MicroUsd::from_dollars(1.50));
        }
        other => panic!("expected win, got {other:?}"),
    }

    // Exactly one billing call: the win price, charged.
    assert_eq!(h.banker.balance("acct-1"), 1_500_000);
    let stats = h.handle.stats();
    assert_eq!(stats.wins_matched, 1);
    assert_eq!(stats.unmatched_wins, 0);

    let messages = h.transport.messages();
    assert_eq!(messages.len(), 1);
    assert!(matches!(messages[0], AgentMessage::Win { .. }));

    h.handle.shutdown();
    h.consumer.await.unwrap();
}

#[tokio::test]
async fn unresolved_auction_expires_to_exactly_one_implicit_loss() {
    let h = spawn_engine(fast_config());
    let mut outcomes = h.handle.subscribe_outcomes();

    assert!(h.handle.submit_auction(
        "A2",
        "S1",
        snapshot(2.0, "acct-1"),
        Some(Duration::from_millis(300)),
    ));

    let resolved = wait_until(Duration::from_secs(5), || {
        h.handle.stats().losses_implicit == 1
    })
    .await;
    assert!(resolved, "sweeper should infer the loss");

    match outcomes.recv().await.expect("loss broadcast") {
        Outcome::Loss(loss) => {
            assert_eq!(loss.key.auction_id, "A2");
            assert_eq!(loss.kind, LossKind::Implicit);
        }
        other => panic!("expected implicit loss, got {other:?}"),
    }

    // The reserved bid price is released, once.
    assert_eq!(h.banker.balance("acct-1"), -2_000_000);

    // Give the sweeper several more cycles: still exactly one loss.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let stats = h.handle.stats();
    assert_eq!(stats.losses_implicit, 1);
    assert_eq!(stats.settlements(), 1);
    assert_eq!(stats.pending_auctions, 0);

    h.handle.shutdown();
    h.consumer.await.unwrap();
}

#[tokio::test]
async fn win_after_expiry_is_unmatched_and_never_double_settles() {
    let h = spawn_engine(fast_config());

    let t0 = Utc::now();
    h.handle.submit_auction(
        "A4",
        "S1",
        snapshot(2.0, "acct-1"),
        Some(Duration::from_millis(200)),
    );
    assert!(
        wait_until(Duration::from_secs(5), || {
            h.handle.stats().losses_implicit == 1
        })
        .await
    );
    let settled_after_loss = h.banker.balance("acct-1");

    // The win's own timestamp is before the deadline, but it is processed
    // after the sweep: processing order is authoritative.
    h.handle.inject_win(
        "A4",
        "S1",
        MicroUsd::from_dollars(1.0),
        t0 + ChronoDuration::milliseconds(100),
        serde_json::Value::Null,
        UserIds::default(),
        "acct-1",
        t0,
    );

    assert!(
        wait_until(Duration::from_secs(5), || {
            h.handle.stats().unmatched_wins == 1
        })
        .await
    );
    let stats = h.handle.stats();
    assert_eq!(stats.wins_matched, 0);
    assert_eq!(stats.settlements(), 1, "only the implicit loss settled");
    assert_eq!(
        h.banker.balance("acct-1"),
        settled_after_loss,
        "no billing on the unmatched win"
    );

    h.handle.shutdown();
    h.consumer.await.unwrap();
}

#[tokio::test]
async fn wildcard_campaign_event_reaches_every_winning_spot() {
    let h = spawn_engine(ReconcilerConfig::default());

    let t0 = Utc::now();
    for spot in ["S1", "S2"] {
        h.handle
            .submit_auction("A3", spot, snapshot(1.0, "acct-1"), None);
        h.handle.inject_win(
            "A3",
            spot,
            MicroUsd::from_dollars(0.8),
            t0,
            serde_json::Value::Null,
            UserIds::default(),
            "acct-1",
            t0,
        );
    }
    assert!(
        wait_until(Duration::from_secs(5), || {
            h.handle.stats().wins_matched == 2
        })
        .await
    );

    // Click with no spot id, long after the wins: broadcast attribution.
    h.handle.inject_campaign_event(
        "click",
        "A3",
        "",
        t0 + ChronoDuration::seconds(10),
        serde_json::json!({"pos": 1}),
        UserIds::exchange("u-3"),
    );

    assert!(
        wait_until(Duration::from_secs(5), || {
            h.handle.stats().campaign_events_matched == 2
        })
        .await,
        "one matched campaign event per winning spot"
    );

    let campaign_spots: Vec<String> = h
        .transport
        .messages()
        .into_iter()
        .filter_map(|m| match m {
            AgentMessage::CampaignEvent {
                label, ad_spot_id, ..
            } => {
                assert_eq!(label, "click");
                Some(ad_spot_id)
            }
            _ => None,
        })
        .collect();
    assert_eq!(campaign_spots, vec!["S1".to_string(), "S2".to_string()]);

    // Campaign events never bill: only the two win charges stand.
    assert_eq!(h.banker.balance("acct-1"), 1_600_000);

    h.handle.shutdown();
    h.consumer.await.unwrap();
}

#[tokio::test]
async fn win_for_unknown_identity_is_unmatched_with_zero_billing() {
    let h = spawn_engine(ReconcilerConfig::default());

    h.handle.inject_win(
        "A9",
        "S1",
        MicroUsd::from_dollars(1.0),
        Utc::now(),
        serde_json::Value::Null,
        UserIds::default(),
        "acct-1",
        Utc::now(),
    );

    assert!(
        wait_until(Duration::from_secs(5), || {
            h.handle.stats().unmatched_wins == 1
        })
        .await
    );
    assert_eq!(h.banker.balance("acct-1"), 0);
    assert!(h.transport.messages().is_empty());

    h.handle.shutdown();
    h.consumer.await.unwrap();
}

#[tokio::test]
async fn duplicate_submission_preserves_the_original_bid() {
    let h = spawn_engine(ReconcilerConfig::default());

    h.handle.submit_auction(
        "A5",
        "S1",
        snapshot(2.0, "acct-1"),
        Some(Duration::from_secs(30)),
    );
    // Same identity, different account: must be reported and discarded.
    h.handle.submit_auction(
        "A5",
        "S1",
        snapshot(9.0, "acct-other"),
        Some(Duration::from_secs(30)),
    );

    assert!(
        wait_until(Duration::from_secs(5), || {
            h.handle.stats().duplicate_auctions == 1
        })
        .await
    );

    // A win under the original account matches; the duplicate never took.
    h.handle.inject_win(
        "A5",
        "S1",
        MicroUsd::from_dollars(1.0),
        Utc::now(),
        serde_json::Value::Null,
        UserIds::default(),
        "acct-1",
        Utc::now(),
    );
    assert!(
        wait_until(Duration::from_secs(5), || {
            h.handle.stats().wins_matched == 1
        })
        .await
    );
    assert_eq!(h.banker.balance("acct-1"), 1_000_000);
    assert_eq!(h.banker.balance("acct-other"), 0);

    h.handle.shutdown();
    h.consumer.await.unwrap();
}

#[tokio::test]
async fn late_campaign_event_after_eviction_is_unmatched() {
    let mut config = fast_config();
    // Wins are only retained briefly; the sweep also drives eviction.
    config.auction_timeout = Duration::from_millis(200);
    let h = spawn_engine(config);

    let t0 = Utc::now();
    h.handle
        .submit_auction("A6", "S1", snapshot(1.0, "acct-1"), None);
    h.handle.inject_win(
        "A6",
        "S1",
        MicroUsd::from_dollars(0.5),
        t0,
        serde_json::Value::Null,
        UserIds::default(),
        "acct-1",
        t0,
    );
    assert!(
        wait_until(Duration::from_secs(5), || {
            h.handle.stats().wins_matched == 1
        })
        .await
    );

    // Wait out the retention horizon.
    assert!(
        wait_until(Duration::from_secs(5), || {
            h.handle.stats().wins_evicted == 1
        })
        .await,
        "win should age out of the history"
    );

    h.handle.inject_campaign_event(
        "conversion",
        "A6",
        "S1",
        Utc::now(),
        serde_json::Value::Null,
        UserIds::default(),
    );
    assert!(
        wait_until(Duration::from_secs(5), || {
            h.handle.stats().unmatched_campaign_events == 1
        })
        .await
    );
    assert_eq!(h.handle.stats().campaign_events_matched, 0);

    h.handle.shutdown();
    h.consumer.await.unwrap();
}

#[tokio::test]
async fn shutdown_drains_queued_events_before_stopping() {
    let h = spawn_engine(ReconcilerConfig::default());

    let t0 = Utc::now();
    h.handle
        .submit_auction("A7", "S1", snapshot(1.0, "acct-1"), None);
    h.handle.inject_win(
        "A7",
        "S1",
        MicroUsd::from_dollars(0.9),
        t0,
        serde_json::Value::Null,
        UserIds::default(),
        "acct-1",
        t0,
    );
    // Shut down immediately: the queued submission and win are inside the
    // drain window and must still settle.
    h.handle.shutdown();
    h.consumer.await.unwrap();

    let stats = h.handle.stats();
    assert_eq!(stats.wins_matched, 1);
    assert_eq!(stats.discarded_on_shutdown, 0);
    assert_eq!(h.banker.balance("acct-1"), 900_000);
}

#[tokio::test]
async fn injection_after_shutdown_is_rejected_not_blocking() {
    let h = spawn_engine(ReconcilerConfig::default());
    h.handle.shutdown();
    h.consumer.await.unwrap();

    // The consumer is gone; producers get an immediate rejection.
    let accepted = h
        .handle
        .submit_auction("A8", "S1", snapshot(1.0, "acct-1"), None);
    assert!(!accepted);
    assert_eq!(h.handle.stats().submission_queue_rejects, 1);
}
