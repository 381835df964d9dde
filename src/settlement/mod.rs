//! Post-auction settlement engine.
//!
//! A bid's outcome (win, loss, click, conversion) arrives seconds or minutes
//! after the auction, from independent and unreliable sources. This module
//! keeps the pending-auction ledger, matches notifications against it,
//! infers implicit losses on deadline expiry, and routes exactly one
//! authoritative outcome per bid to billing and the owning agent.

pub mod agents;
pub mod banker;
pub mod config;
pub mod engine;
pub mod error;
pub mod intake;
pub mod ledger;
pub mod matcher;
pub mod outcome;
pub mod router;
pub mod stats;
pub mod win_history;

pub use agents::{AgentDirectory, AgentTransport, LoggingAgentTransport, StaticAgentDirectory};
pub use banker::{Banker, BankerHandle, PaperBanker, SettleDirection};
pub use config::ReconcilerConfig;
pub use engine::{HealthIndicator, PostAuctionEngine, PostAuctionHandle};
pub use error::{BillingError, ConfigError, DeliveryError, LedgerError};
pub use intake::{PostAuctionEvent, SubmittedAuctionEvent};
pub use outcome::{
    AgentMessage, ErrorEvent, LossKind, MatchedCampaignEvent, MatchedLoss, MatchedWin, Outcome,
    UnmatchedEvent, UnmatchedKind,
};
pub use stats::{ReconcilerStats, ReconcilerStatsSnapshot};
