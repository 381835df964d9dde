//! Error taxonomy for the reconciliation engine.
//!
//! Only `ConfigError` is fatal, and only at configuration time. Everything
//! else is contained within the processing of a single event: duplicates and
//! unmatched notifications are steady-state diagnostics, collaborator
//! failures are logged and counted without stopping the consumer loop.

use thiserror::Error;

use crate::models::AuctionKey;

/// Rejected configuration. The service refuses to start with one of these.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("negative {name} timeout: {seconds}s")]
    NegativeTimeout { name: &'static str, seconds: f64 },

    #[error("sweep interval {interval_ms}ms must be shorter than the win timeout {timeout_ms}ms")]
    SweepIntervalTooLong { interval_ms: u128, timeout_ms: u128 },

    #[error("invalid value for {var}: {value:?}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Ledger mutation outcomes that are reported rather than propagated.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// A pending entry already exists for this identity. The original entry
    /// is preserved; last-submission-wins would silently drop an in-flight
    /// bid.
    #[error("auction {0} already has a pending entry")]
    DuplicateAuction(AuctionKey),
}

/// A billing call that did not take effect. Logged and counted by the
/// router; retry and durability are the billing collaborator's concern.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BillingError {
    #[error("billing rejected settlement for account {account}: {reason}")]
    Rejected { account: String, reason: String },

    #[error("billing collaborator unavailable: {0}")]
    Unavailable(String),
}

/// A best-effort agent delivery that failed. Never rolls anything back.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("agent endpoint {address} unreachable: {reason}")]
    Unreachable { address: String, reason: String },
}
