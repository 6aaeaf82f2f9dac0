//! Background sweep of abandoned sessions.

use super::manager::{LOG_TARGET, SessionManager};
use crate::connection::ConnectionFactory;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info};

/// Spawn a task that calls `clean` every `every`.
///
/// The first sweep happens one full interval after spawning. Abort the
/// returned handle to stop it.
pub fn spawn_sweeper<F: ConnectionFactory>(
    manager: Arc<SessionManager<F>>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Skip the immediate first tick
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let reclaimed = manager.clean().await;
            if reclaimed > 0 {
                info!(target: LOG_TARGET, reclaimed, "Session sweep completed");
            } else {
                debug!(target: LOG_TARGET, "Session sweep: nothing abandoned");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::auth::{AuthManager, MIN_HASH_COST};
    use crate::core::Caller;
    use crate::executor::MemoryExecutor;
    use crate::storage::MemoryStore;
    use crate::transaction::ManagerConfig;

    #[tokio::test]
    async fn test_sweeper_reclaims_expired_sessions() {
        let store = MemoryStore::new();
        store.create_store("demo").await;
        let auth = AuthManager::with_admin_and_cost("admin", "adminpass", MIN_HASH_COST);
        auth.register_store("demo").await;

        let manager = Arc::new(
            SessionManager::new(
                ManagerConfig::new().session_ttl(Duration::from_secs(1)),
                Arc::new(store),
                Arc::new(MemoryExecutor::new()),
                Arc::new(auth),
            )
            .unwrap(),
        );

        let admin = Caller::new("demo", "admin", "adminpass");
        let tid = manager.begin(&admin).await.unwrap();

        let handle = spawn_sweeper(Arc::clone(&manager), Duration::from_millis(200));

        // ttl is 1s; give the sweeper time past the deadline
        tokio::time::sleep(Duration::from_millis(2500)).await;
        handle.abort();

        assert!(!manager.contains("admin", tid).await);
        assert_eq!(manager.stats().await.open_sessions, 0);
    }
}
