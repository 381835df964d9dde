//! Post-auction reconciliation daemon.
//!
//! Thin bootstrap around the settlement engine: load configuration from the
//! environment, wire up collaborators, run until ctrl-c, then drain. The
//! wire listeners that decode exchange notifications live in front of this
//! process and drive the injection façade.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use tokio::time::interval;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use postauction_backend::settlement::{
    LoggingAgentTransport, PaperBanker, PostAuctionEngine, ReconcilerConfig, StaticAgentDirectory,
};

#[derive(Debug, Parser)]
#[command(name = "postauctiond", about = "Post-auction reconciliation daemon")]
struct Args {
    /// Use the in-memory paper banker with this simulated failure rate.
    #[arg(long, default_value_t = 0.0, env = "PA_PAPER_BANKER_FAILURE_RATE")]
    paper_failure_rate: f64,

    /// How often to log the health indicator, in seconds.
    #[arg(long, default_value_t = 30, env = "PA_HEALTH_LOG_SECS")]
    health_log_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();
    let args = Args::parse();

    let config = ReconcilerConfig::from_env().context("invalid reconciler configuration")?;
    info!(?config, "configuration loaded");

    // The real billing ledger and agent bus attach here; the paper banker
    // and logging transport stand in for local runs.
    let banker = Arc::new(PaperBanker::with_failure_rate(args.paper_failure_rate));
    let directory = Arc::new(StaticAgentDirectory::new());
    let transport = Arc::new(LoggingAgentTransport);

    let (engine, handle) = PostAuctionEngine::new(config, banker, directory, transport)
        .context("engine construction failed")?;
    let consumer = tokio::spawn(engine.run());

    // Monitoring pulls the indicator; locally we just log it periodically.
    let health_handle = handle.clone();
    let health_log_secs = args.health_log_secs.max(1);
    tokio::spawn(async move {
        let mut tick = interval(Duration::from_secs(health_log_secs));
        loop {
            tick.tick().await;
            let health = health_handle.health_indicator();
            info!(
                pending = health.pending_auctions,
                retained_wins = health.retained_wins,
                last_win_loss_age_ms = ?health.last_win_loss_age_ms,
                "health"
            );
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received, draining");
    handle.shutdown();

    if let Err(e) = consumer.await {
        warn!("consumer task ended abnormally: {e}");
    }
    let stats = handle.stats();
    info!(
        settlements = stats.settlements(),
        discarded = stats.discarded_on_shutdown,
        "post-auction daemon exiting"
    );
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "postauction_backend=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
