// ============================================================================
// wstxn Library
// ============================================================================
//
// Transactional sessions for stateless RPC. A caller begins a transaction,
// gets back an id, and every later call naming that id runs on the same
// kept-alive store connection until it is closed, killed or swept.
//
// ============================================================================

pub mod connection;
pub mod core;
pub mod executor;
pub mod server;
pub mod storage;
pub mod transaction;

// Re-export main types for convenience
pub use core::{Caller, Result, SessionKey, TransactionId, TxnError};

pub use connection::{
    ConnectionFactory, StoreConnection,
    auth::{Access, AuthManager, Authorizer, Permission, User},
};

pub use executor::{Executor, MemoryExecutor};
pub use storage::{MemoryConnection, MemoryStore};

pub use transaction::{
    ExecuteFailurePolicy, ManagerConfig, ManagerStats, SessionInfo, SessionManager,
    TransactionIdPolicy, spawn_sweeper,
};

pub use server::{Dispatcher, RpcServer};

/// Build a session manager over an in-memory store
///
/// Convenience wiring for local runs and tests: registers each name in
/// `stores` with both the store and the auth registry.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use wstxn::{AuthManager, Caller, ManagerConfig, MemoryStore, memory_manager};
///
/// # fn main() -> wstxn::Result<()> {
/// tokio_test::block_on(async {
///     let store = Arc::new(MemoryStore::new());
///     let auth = Arc::new(AuthManager::with_admin_and_cost("admin", "adminpass", 4));
///     let manager = memory_manager(ManagerConfig::new(), store, auth, &["demo"]).await?;
///
///     let admin = Caller::new("demo", "admin", "adminpass");
///     let tid = manager.begin(&admin).await?;
///     manager.commit(&admin, tid).await?;
///     manager.close(&admin, tid).await?;
///     Ok::<(), wstxn::TxnError>(())
/// })
/// # }
/// ```
pub async fn memory_manager(
    config: ManagerConfig,
    store: std::sync::Arc<MemoryStore>,
    auth: std::sync::Arc<AuthManager>,
    stores: &[&str],
) -> Result<SessionManager<MemoryStore>> {
    for name in stores {
        store.create_store(name).await;
        auth.register_store(name).await;
    }

    SessionManager::new(
        config,
        store,
        std::sync::Arc::new(MemoryExecutor::new()),
        auth,
    )
}
