use super::session::DEFAULT_SESSION_TTL;
use crate::core::{Result, TxnError};
use std::str::FromStr;
use std::time::Duration;

/// Where transaction ids come from
///
/// `StoreNative` ids can repeat across restarts of the store, while
/// `Counter` ids repeat across restarts of this process. Neither is
/// persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionIdPolicy {
    /// Manager-wide counter starting at 1
    Counter,
    /// The backing store's own id for the transaction just opened
    StoreNative,
}

impl FromStr for TransactionIdPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "counter" => Ok(TransactionIdPolicy::Counter),
            "native" | "store-native" => Ok(TransactionIdPolicy::StoreNative),
            other => Err(format!("unknown id policy '{}'", other)),
        }
    }
}

/// What happens to a transaction when the executor rejects a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteFailurePolicy {
    /// Log and re-raise; the caller decides whether to roll back
    KeepOpen,
    /// Roll the transaction back before re-raising; the session stays registered
    Rollback,
}

/// Session manager configuration
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Inactivity lifetime given to every new session
    pub session_ttl: Duration,

    /// How often the background sweeper looks for abandoned sessions
    pub sweep_interval: Duration,

    pub id_policy: TransactionIdPolicy,

    pub failure_policy: ExecuteFailurePolicy,
}

impl ManagerConfig {
    pub fn new() -> Self {
        Self {
            session_ttl: DEFAULT_SESSION_TTL,
            sweep_interval: Duration::from_secs(300),
            id_policy: TransactionIdPolicy::StoreNative,
            failure_policy: ExecuteFailurePolicy::KeepOpen,
        }
    }

    pub fn session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn id_policy(mut self, policy: TransactionIdPolicy) -> Self {
        self.id_policy = policy;
        self
    }

    pub fn failure_policy(mut self, policy: ExecuteFailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.session_ttl.is_zero() {
            return Err(TxnError::ConfigError("session_ttl must be > 0".into()));
        }

        if self.sweep_interval.is_zero() {
            return Err(TxnError::ConfigError("sweep_interval must be > 0".into()));
        }

        Ok(())
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::new()
    }
}
