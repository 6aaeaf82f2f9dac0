pub mod auth;

use crate::core::Result;
use async_trait::async_trait;

/// A raw connection to a backing store with an implicit open transaction
///
/// Similar to a DB-API cursor: after `commit` or `rollback` the connection
/// stays usable and a fresh transaction begins. `close` releases it for good.
#[async_trait]
pub trait StoreConnection: Send + 'static {
    /// Commit the current transaction
    async fn commit(&mut self) -> Result<()>;

    /// Roll back the current transaction
    async fn rollback(&mut self) -> Result<()>;

    /// Close the connection, discarding any uncommitted work
    async fn close(&mut self) -> Result<()>;

    /// Native identifier of the transaction currently open on this connection
    fn native_transaction_id(&self) -> Option<u64> {
        None
    }

    /// Server-side identifier of the connection itself (backend pid or similar)
    fn backend_id(&self) -> Option<u64> {
        None
    }
}

/// Opens connections against named stores
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: StoreConnection;

    /// Open a new connection to `store` with a transaction already started
    async fn open(&self, store: &str) -> Result<Self::Connection>;
}
