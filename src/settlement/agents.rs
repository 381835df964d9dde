//! Agent directory and delivery collaborators.
//!
//! The directory maps billing accounts to the agent that placed the bid;
//! its contents are distributed by an external configuration service, so
//! here it is only a lookup surface. Delivery is best-effort: a failed or
//! offline agent never rolls back a billing call already made.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::info;

use super::error::DeliveryError;
use super::outcome::AgentMessage;

/// Resolve the owning agent's address for an account key. `None` means the
/// agent is unknown or offline-deregistered.
pub trait AgentDirectory: Send + Sync {
    fn resolve(&self, account: &str) -> Option<String>;
}

/// Push a message to a resolved agent endpoint. Best-effort; the router
/// logs failures and moves on.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    async fn deliver(&self, address: &str, message: AgentMessage) -> Result<(), DeliveryError>;
}

/// In-memory directory fed by the external configuration listener.
#[derive(Debug, Default)]
pub struct StaticAgentDirectory {
    agents: RwLock<HashMap<String, String>>,
}

impl StaticAgentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, account: impl Into<String>, address: impl Into<String>) {
        self.agents.write().insert(account.into(), address.into());
    }

    pub fn deregister(&self, account: &str) {
        self.agents.write().remove(account);
    }
}

impl AgentDirectory for StaticAgentDirectory {
    fn resolve(&self, account: &str) -> Option<String> {
        self.agents.read().get(account).cloned()
    }
}

/// Transport that only logs. Stands in for the real message bus in local
/// runs and simulations.
#[derive(Debug, Default)]
pub struct LoggingAgentTransport;

#[async_trait]
impl AgentTransport for LoggingAgentTransport {
    async fn deliver(&self, address: &str, message: AgentMessage) -> Result<(), DeliveryError> {
        let payload = serde_json::to_string(&message).unwrap_or_else(|e| format!("<unserializable: {e}>"));
        info!(address, %payload, "agent delivery");
        Ok(())
    }
}
