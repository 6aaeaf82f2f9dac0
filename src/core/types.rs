use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one open session within the scope of one identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Get the raw ID value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for TransactionId {
    fn from(value: u64) -> Self {
        TransactionId(value)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registry key: a transaction id only means something next to the identity that opened it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub identity: String,
    pub transaction_id: TransactionId,
}

impl SessionKey {
    pub fn new(identity: impl Into<String>, transaction_id: TransactionId) -> Self {
        Self {
            identity: identity.into(),
            transaction_id,
        }
    }
}

/// The (store, identity, credential) triple every RPC call carries
#[derive(Clone, PartialEq, Eq)]
pub struct Caller {
    pub store: String,
    pub identity: String,
    pub credential: String,
}

impl Caller {
    pub fn new(store: &str, identity: &str, credential: &str) -> Self {
        Self {
            store: store.to_string(),
            identity: identity.to_string(),
            credential: credential.to_string(),
        }
    }
}

// Credentials never end up in logs
impl fmt::Debug for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Caller")
            .field("store", &self.store)
            .field("identity", &self.identity)
            .field("credential", &"***")
            .finish()
    }
}
