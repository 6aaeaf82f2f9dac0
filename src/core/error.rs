use super::TransactionId;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxnError {
    #[error("Authorization failed: {0}")]
    AuthorizationFailure(String),

    #[error("There is no transaction {transaction_id} for '{identity}'")]
    UnknownTransaction {
        identity: String,
        transaction_id: TransactionId,
    },

    #[error("Transaction {transaction_id} is already open for '{identity}'")]
    DuplicateTransaction {
        identity: String,
        transaction_id: TransactionId,
    },

    #[error("Backing store error: {0}")]
    BackingStoreFailure(String),

    #[error("Execution error: {0}")]
    CollaboratorFailure(String),

    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl TxnError {
    pub(crate) fn unknown(identity: &str, transaction_id: TransactionId) -> Self {
        Self::UnknownTransaction {
            identity: identity.to_string(),
            transaction_id,
        }
    }

    /// Stable machine-readable name of the error kind
    pub fn code(&self) -> &'static str {
        match self {
            TxnError::AuthorizationFailure(_) => "authorization_failure",
            TxnError::UnknownTransaction { .. } => "unknown_transaction",
            TxnError::DuplicateTransaction { .. } => "duplicate_transaction",
            TxnError::BackingStoreFailure(_) => "backing_store_failure",
            TxnError::CollaboratorFailure(_) => "collaborator_failure",
            TxnError::UnknownMethod(_) => "unknown_method",
            TxnError::InvalidParams(_) => "invalid_params",
            TxnError::ConfigError(_) => "config_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, TxnError>;
