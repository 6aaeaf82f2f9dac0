pub mod error;
pub mod types;

pub use error::{Result, TxnError};
pub use types::{Caller, SessionKey, TransactionId};
