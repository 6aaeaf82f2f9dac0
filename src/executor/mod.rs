pub mod memory;

use crate::connection::StoreConnection;
use crate::core::Result;
use async_trait::async_trait;
use serde_json::Value;

pub use memory::MemoryExecutor;

/// Data-access layer that runs a named operation on a collection
///
/// The session manager hands over the session's own connection, so every
/// call runs inside that session's open transaction.
#[async_trait]
pub trait Executor<C: StoreConnection>: Send + Sync {
    async fn execute(
        &self,
        connection: &mut C,
        identity: &str,
        collection: &str,
        operation: &str,
        args: Vec<Value>,
    ) -> Result<Value>;
}
