//! Billing collaborator interface.
//!
//! The billing ledger is externally owned; the engine only calls into it.
//! The handle is hot-swappable so operators can repoint billing at runtime
//! without restarting the consumer loop.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, info};

use super::error::BillingError;
use crate::models::MicroUsd;

/// Direction of a settlement against the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettleDirection {
    /// Commit spend: the bid won at this price.
    Charge,
    /// Return the amount reserved at bid time: the bid lost.
    Release,
}

/// Narrow billing contract the router calls outward. Implementations must
/// not block the caller for longer than an in-memory operation; retries and
/// durability live behind this interface, not in the engine.
#[async_trait]
pub trait Banker: Send + Sync {
    async fn settle(
        &self,
        account: &str,
        amount: MicroUsd,
        direction: SettleDirection,
    ) -> Result<(), BillingError>;
}

// Sized slot around the trait object: the swap cell needs a thin pointer.
struct BankerSlot(Arc<dyn Banker>);

/// Shared, swappable handle to the current banker.
#[derive(Clone)]
pub struct BankerHandle {
    inner: Arc<ArcSwap<BankerSlot>>,
}

impl BankerHandle {
    pub fn new(banker: Arc<dyn Banker>) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(BankerSlot(banker))),
        }
    }

    pub fn current(&self) -> Arc<dyn Banker> {
        self.inner.load().0.clone()
    }

    /// Replace the banker. In-flight settlements finish against the old one.
    pub fn swap(&self, banker: Arc<dyn Banker>) {
        self.inner.store(Arc::new(BankerSlot(banker)));
        info!("banker handle swapped");
    }
}

impl std::fmt::Debug for BankerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BankerHandle").finish_non_exhaustive()
    }
}

/// Paper banker for simulation and tests: keeps per-account running totals
/// in memory and can inject a configurable failure rate.
#[derive(Debug, Default)]
pub struct PaperBanker {
    /// Probability in [0, 1] that a settlement is rejected.
    pub failure_rate: f64,
    balances: Mutex<HashMap<String, i64>>,
}

impl PaperBanker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_rate(failure_rate: f64) -> Self {
        Self {
            failure_rate,
            balances: Mutex::new(HashMap::new()),
        }
    }

    /// Net settled micros for an account (charges positive).
    pub fn balance(&self, account: &str) -> i64 {
        self.balances.lock().get(account).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Banker for PaperBanker {
    async fn settle(
        &self,
        account: &str,
        amount: MicroUsd,
        direction: SettleDirection,
    ) -> Result<(), BillingError> {
        if self.failure_rate > 0.0 && rand::thread_rng().gen::<f64>() < self.failure_rate {
            return Err(BillingError::Unavailable("simulated outage".to_string()));
        }
        if amount.value() < 0 {
            return Err(BillingError::Rejected {
                account: account.to_string(),
                reason: format!("negative amount {amount}"),
            });
        }

        let delta = match direction {
            SettleDirection::Charge => amount.value(),
            SettleDirection::Release => -amount.value(),
        };
        let mut balances = self.balances.lock();
        *balances.entry(account.to_string()).or_insert(0) += delta;
        let reference = uuid::Uuid::new_v4();
        debug!(account, %amount, ?direction, %reference, "paper settlement applied");
        Ok(())
    }
}
