// ============================================================================
// Session Manager
// ============================================================================
//
// Registry of open transactional sessions keyed by (identity, transaction id).
//
// Locking discipline:
// - `sessions` (registry) guards membership only; no store I/O runs under it
// - each session has its own mutex held for the duration of a call
// - lock order is session -> registry; nothing waits on a session while
//   holding the registry lock
//
// ============================================================================

use super::config::{ExecuteFailurePolicy, ManagerConfig, TransactionIdPolicy};
use super::session::Session;
use crate::connection::auth::{Access, Authorizer};
use crate::connection::{ConnectionFactory, StoreConnection};
use crate::core::{Caller, Result, SessionKey, TransactionId, TxnError};
use crate::executor::Executor;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, error, info, warn};

/// Log channel for every session event
pub const LOG_TARGET: &str = "ws_transaction";

type SessionHandle<C> = Arc<Mutex<Session<C>>>;

/// Fresh store transactions tried before a plain `begin` gives up on a taken native id
const MAX_NATIVE_ID_ATTEMPTS: usize = 8;

/// Snapshot of one open session, as reported by `list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub identity: String,
    pub transaction_id: TransactionId,
    pub native_transaction_id: Option<u64>,
    pub backend_id: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerStats {
    pub open_sessions: usize,
    pub identities: usize,
}

impl std::fmt::Display for ManagerStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Sessions: {} open across {} identities",
            self.open_sessions, self.identities
        )
    }
}

/// Keeps store connections (and their open transactions) alive between
/// stateless RPC calls
pub struct SessionManager<F: ConnectionFactory> {
    config: ManagerConfig,
    factory: Arc<F>,
    executor: Arc<dyn Executor<F::Connection>>,
    authorizer: Arc<dyn Authorizer>,
    sessions: RwLock<HashMap<SessionKey, SessionHandle<F::Connection>>>,
    /// Used only under `TransactionIdPolicy::Counter`
    next_tid: AtomicU64,
}

impl<F: ConnectionFactory> SessionManager<F> {
    pub fn new(
        config: ManagerConfig,
        factory: Arc<F>,
        executor: Arc<dyn Executor<F::Connection>>,
        authorizer: Arc<dyn Authorizer>,
    ) -> Result<Self> {
        config.validate()?;

        info!(
            target: LOG_TARGET,
            id_policy = ?config.id_policy,
            failure_policy = ?config.failure_policy,
            ttl_secs = config.session_ttl.as_secs(),
            "Ready for webservices transactions"
        );

        Ok(Self {
            config,
            factory,
            executor,
            authorizer,
            sessions: RwLock::new(HashMap::new()),
            next_tid: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Start a transaction: open a connection and register it under a new id
    pub async fn begin(&self, caller: &Caller) -> Result<TransactionId> {
        self.begin_with_id(caller, None).await
    }

    /// Start a transaction under a caller-chosen id
    ///
    /// If `(identity, requested)` is already open this joins it and no new
    /// connection is opened. With `None` the id comes from the configured
    /// `TransactionIdPolicy`.
    pub async fn begin_with_id(
        &self,
        caller: &Caller,
        requested: Option<TransactionId>,
    ) -> Result<TransactionId> {
        self.authorize(caller, Access::Owner).await?;

        if let Some(tid) = requested {
            if self.contains(&caller.identity, tid).await {
                debug!(
                    target: LOG_TARGET,
                    identity = %caller.identity,
                    transaction_id = %tid,
                    "Joining open transaction"
                );
                return Ok(tid);
            }
        }

        let connection = self.factory.open(&caller.store).await.inspect_err(|err| {
            error!(
                target: LOG_TARGET,
                store = %caller.store,
                identity = %caller.identity,
                error = ?err,
                "Failed to open store connection"
            );
        })?;
        let session = Session::new(connection, self.config.session_ttl);

        let tid = match requested {
            Some(tid) => self.register_requested(caller, tid, session).await,
            None => match self.config.id_policy {
                TransactionIdPolicy::Counter => self.register_counted(caller, session).await,
                TransactionIdPolicy::StoreNative => self.register_native(caller, session).await?,
            },
        };

        info!(
            target: LOG_TARGET,
            store = %caller.store,
            identity = %caller.identity,
            transaction_id = %tid,
            "Creating a new transaction"
        );

        Ok(tid)
    }

    /// Run `operation` on `collection` inside the session's transaction
    pub async fn execute(
        &self,
        caller: &Caller,
        transaction_id: TransactionId,
        collection: &str,
        operation: &str,
        args: Vec<Value>,
    ) -> Result<Value> {
        self.authorize(caller, Access::Owner).await?;
        let mut session = self.lock_open(&caller.identity, transaction_id).await?;

        debug!(
            target: LOG_TARGET,
            identity = %caller.identity,
            transaction_id = %transaction_id,
            collection,
            operation,
            "Executing from transaction"
        );

        let result = self
            .executor
            .execute(session.access(), &caller.identity, collection, operation, args)
            .await;

        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        error!(
            target: LOG_TARGET,
            identity = %caller.identity,
            transaction_id = %transaction_id,
            collection,
            operation,
            error = ?err,
            "Execution failed"
        );

        // KeepOpen leaves recovery to the caller; Rollback restores the
        // older contract where a failed call discards the whole transaction
        if self.config.failure_policy == ExecuteFailurePolicy::Rollback {
            match session.rollback().await {
                Ok(()) => info!(
                    target: LOG_TARGET,
                    identity = %caller.identity,
                    transaction_id = %transaction_id,
                    "Rolled back transaction after failed execution"
                ),
                Err(rollback_err) => error!(
                    target: LOG_TARGET,
                    identity = %caller.identity,
                    transaction_id = %transaction_id,
                    error = ?rollback_err,
                    "Rollback after failed execution also failed"
                ),
            }
        }

        Err(err)
    }

    /// Roll back; the session stays open for further calls
    pub async fn rollback(&self, caller: &Caller, transaction_id: TransactionId) -> Result<()> {
        self.authorize(caller, Access::Owner).await?;
        let mut session = self.lock_open(&caller.identity, transaction_id).await?;

        info!(
            target: LOG_TARGET,
            identity = %caller.identity,
            transaction_id = %transaction_id,
            "Rolling back transaction"
        );

        session.rollback().await.inspect_err(|err| {
            error!(target: LOG_TARGET, transaction_id = %transaction_id, error = ?err, "Rollback failed");
        })
    }

    /// Commit; the session stays open for further calls
    pub async fn commit(&self, caller: &Caller, transaction_id: TransactionId) -> Result<()> {
        self.authorize(caller, Access::Owner).await?;
        let mut session = self.lock_open(&caller.identity, transaction_id).await?;

        info!(
            target: LOG_TARGET,
            identity = %caller.identity,
            transaction_id = %transaction_id,
            "Committing transaction"
        );

        session.commit().await.inspect_err(|err| {
            error!(target: LOG_TARGET, transaction_id = %transaction_id, error = ?err, "Commit failed");
        })
    }

    /// Close the connection and forget the session
    ///
    /// The entry is removed even when the store fails to close.
    pub async fn close(&self, caller: &Caller, transaction_id: TransactionId) -> Result<()> {
        self.authorize(caller, Access::Owner).await?;
        let handle = self.take(&caller.identity, transaction_id).await?;
        let mut session = handle.lock().await;

        if !session.is_open() {
            return Err(TxnError::unknown(&caller.identity, transaction_id));
        }

        info!(
            target: LOG_TARGET,
            identity = %caller.identity,
            transaction_id = %transaction_id,
            "Closing transaction"
        );

        session.close().await.inspect_err(|err| {
            error!(target: LOG_TARGET, transaction_id = %transaction_id, error = ?err, "Close failed");
        })
    }

    /// Force rollback and close of a session
    ///
    /// With `owner` naming another identity the caller needs operator access.
    pub async fn kill(
        &self,
        caller: &Caller,
        transaction_id: TransactionId,
        owner: Option<&str>,
    ) -> Result<()> {
        let owner = owner.unwrap_or(caller.identity.as_str());
        let access = if owner == caller.identity {
            Access::Owner
        } else {
            Access::Operator
        };
        self.authorize(caller, access).await?;

        let handle = self.take(owner, transaction_id).await?;
        let mut session = handle.lock().await;

        if !session.is_open() {
            return Err(TxnError::unknown(owner, transaction_id));
        }

        warn!(
            target: LOG_TARGET,
            operator = %caller.identity,
            identity = %owner,
            transaction_id = %transaction_id,
            last_accessed = %session.last_accessed_at().format("%Y-%m-%d %H:%M:%S"),
            "Killing transaction"
        );

        Self::terminate(&mut session, owner, transaction_id).await
    }

    /// Log and return every open session
    pub async fn list(&self) -> Vec<SessionInfo> {
        let snapshot = self.snapshot().await;
        info!(target: LOG_TARGET, sessions = snapshot.len(), "Listing open transactions");

        let mut infos = Vec::with_capacity(snapshot.len());
        for (key, handle) in snapshot {
            let session = handle.lock().await;
            if !session.is_open() {
                continue;
            }

            let info = SessionInfo {
                identity: key.identity,
                transaction_id: key.transaction_id,
                native_transaction_id: session.peek().native_transaction_id(),
                backend_id: session.peek().backend_id(),
                created_at: session.created_at(),
                last_accessed_at: session.last_accessed_at(),
            };

            info!(
                target: LOG_TARGET,
                identity = %info.identity,
                transaction_id = %info.transaction_id,
                native_transaction_id = ?info.native_transaction_id,
                backend_id = ?info.backend_id,
                last_accessed = %info.last_accessed_at.format("%Y-%m-%d %H:%M:%S"),
                "Open transaction"
            );
            infos.push(info);
        }

        infos.sort_by(|a, b| {
            (a.identity.as_str(), a.transaction_id).cmp(&(b.identity.as_str(), b.transaction_id))
        });
        infos
    }

    /// Reclaim sessions abandoned as of now
    pub async fn clean(&self) -> usize {
        self.clean_at(Utc::now()).await
    }

    /// Reclaim every session abandoned as of `now`; returns how many were removed
    ///
    /// Sessions locked by an in-flight call are in use and skipped. A failure
    /// to roll back or close one session does not stop the sweep.
    pub async fn clean_at(&self, now: DateTime<Utc>) -> usize {
        debug!(target: LOG_TARGET, "Searching for abandoned transactions");

        let mut reclaimed = 0;
        for (key, handle) in self.snapshot().await {
            let Ok(mut session) = handle.try_lock() else {
                continue;
            };
            if !session.is_open() || !session.is_abandoned(now) {
                continue;
            }

            let removed = {
                let mut sessions = self.sessions.write().await;
                // Skip if close/kill already took it out
                let still_registered = sessions
                    .get(&key)
                    .is_some_and(|current| Arc::ptr_eq(current, &handle));
                if still_registered {
                    sessions.remove(&key);
                }
                still_registered
            };
            if !removed {
                continue;
            }

            info!(
                target: LOG_TARGET,
                identity = %key.identity,
                transaction_id = %key.transaction_id,
                last_accessed = %session.last_accessed_at().format("%Y-%m-%d %H:%M:%S"),
                "Deleting abandoned transaction"
            );

            if let Err(err) = Self::terminate(&mut session, &key.identity, key.transaction_id).await {
                warn!(
                    target: LOG_TARGET,
                    identity = %key.identity,
                    transaction_id = %key.transaction_id,
                    error = %err,
                    "Abandoned transaction was not reclaimed cleanly"
                );
            }
            reclaimed += 1;
        }

        reclaimed
    }

    pub async fn contains(&self, identity: &str, transaction_id: TransactionId) -> bool {
        let sessions = self.sessions.read().await;
        sessions.contains_key(&SessionKey::new(identity, transaction_id))
    }

    pub async fn stats(&self) -> ManagerStats {
        let sessions = self.sessions.read().await;
        let identities: HashSet<&str> = sessions.keys().map(|key| key.identity.as_str()).collect();
        ManagerStats {
            open_sessions: sessions.len(),
            identities: identities.len(),
        }
    }

    /// Gate failures of any kind surface as `AuthorizationFailure`
    async fn authorize(&self, caller: &Caller, access: Access) -> Result<()> {
        match self.authorizer.check(caller, access).await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(
                    target: LOG_TARGET,
                    store = %caller.store,
                    identity = %caller.identity,
                    access = ?access,
                    error = %err,
                    "Authorization failed"
                );
                Err(match err {
                    TxnError::AuthorizationFailure(_) => err,
                    other => TxnError::AuthorizationFailure(other.to_string()),
                })
            }
        }
    }

    async fn snapshot(&self) -> Vec<(SessionKey, SessionHandle<F::Connection>)> {
        let sessions = self.sessions.read().await;
        sessions
            .iter()
            .map(|(key, handle)| (key.clone(), Arc::clone(handle)))
            .collect()
    }

    /// Resolve and lock a session that is still open
    async fn lock_open(
        &self,
        identity: &str,
        transaction_id: TransactionId,
    ) -> Result<OwnedMutexGuard<Session<F::Connection>>> {
        let handle = {
            let sessions = self.sessions.read().await;
            sessions
                .get(&SessionKey::new(identity, transaction_id))
                .cloned()
                .ok_or_else(|| TxnError::unknown(identity, transaction_id))?
        };

        let session = handle.lock_owned().await;
        // Closed while this call waited for the lock
        if !session.is_open() {
            return Err(TxnError::unknown(identity, transaction_id));
        }
        Ok(session)
    }

    /// Remove a session from the registry, handing it to the caller
    async fn take(
        &self,
        identity: &str,
        transaction_id: TransactionId,
    ) -> Result<SessionHandle<F::Connection>> {
        let mut sessions = self.sessions.write().await;
        sessions
            .remove(&SessionKey::new(identity, transaction_id))
            .ok_or_else(|| TxnError::unknown(identity, transaction_id))
    }

    /// Insert under `(identity, tid)`; hands the session back if the key is taken
    async fn try_register(
        &self,
        identity: &str,
        transaction_id: TransactionId,
        session: Session<F::Connection>,
    ) -> Option<Session<F::Connection>> {
        let mut sessions = self.sessions.write().await;
        match sessions.entry(SessionKey::new(identity, transaction_id)) {
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(Mutex::new(session)));
                None
            }
            Entry::Occupied(_) => Some(session),
        }
    }

    /// A concurrent begin registered the same requested id first: join it
    async fn register_requested(
        &self,
        caller: &Caller,
        transaction_id: TransactionId,
        session: Session<F::Connection>,
    ) -> TransactionId {
        if let Some(surplus) = self.try_register(&caller.identity, transaction_id, session).await {
            Self::discard(surplus, &caller.identity, Some(transaction_id)).await;
        }
        transaction_id
    }

    /// Counter ids skip values already taken through `begin_with_id`
    async fn register_counted(
        &self,
        caller: &Caller,
        mut session: Session<F::Connection>,
    ) -> TransactionId {
        loop {
            let tid = TransactionId(self.next_tid.fetch_add(1, Ordering::SeqCst));
            match self.try_register(&caller.identity, tid, session).await {
                None => return tid,
                Some(taken) => {
                    debug!(
                        target: LOG_TARGET,
                        identity = %caller.identity,
                        transaction_id = %tid,
                        "Counter id already in use, skipping"
                    );
                    session = taken;
                }
            }
        }
    }

    /// Native ids are re-read after a rollback, which starts a fresh store
    /// transaction, until one is free for this identity
    async fn register_native(
        &self,
        caller: &Caller,
        mut session: Session<F::Connection>,
    ) -> Result<TransactionId> {
        let mut attempts = 0;
        loop {
            let Some(native) = session.peek().native_transaction_id() else {
                let err = TxnError::BackingStoreFailure(format!(
                    "Store '{}' does not expose native transaction ids",
                    caller.store
                ));
                Self::discard(session, &caller.identity, None).await;
                return Err(err);
            };
            let tid = TransactionId(native);

            session = match self.try_register(&caller.identity, tid, session).await {
                None => return Ok(tid),
                Some(taken) => taken,
            };

            attempts += 1;
            if attempts >= MAX_NATIVE_ID_ATTEMPTS {
                Self::discard(session, &caller.identity, Some(tid)).await;
                return Err(TxnError::DuplicateTransaction {
                    identity: caller.identity.clone(),
                    transaction_id: tid,
                });
            }

            debug!(
                target: LOG_TARGET,
                identity = %caller.identity,
                transaction_id = %tid,
                "Native id already in use, restarting store transaction"
            );
            if let Err(err) = session.rollback().await {
                Self::discard(session, &caller.identity, Some(tid)).await;
                return Err(err);
            }
        }
    }

    /// Close a connection that never made it into the registry
    async fn discard(
        mut session: Session<F::Connection>,
        identity: &str,
        transaction_id: Option<TransactionId>,
    ) {
        if let Err(err) = session.close().await {
            warn!(
                target: LOG_TARGET,
                identity,
                transaction_id = ?transaction_id,
                error = %err,
                "Failed to close surplus connection"
            );
        }
    }

    /// Roll back then close, attempting both; reports the first failure
    async fn terminate(
        session: &mut Session<F::Connection>,
        identity: &str,
        transaction_id: TransactionId,
    ) -> Result<()> {
        let rolled_back = session.rollback().await;
        if let Err(err) = &rolled_back {
            warn!(
                target: LOG_TARGET,
                identity,
                transaction_id = %transaction_id,
                error = ?err,
                "Forced rollback failed"
            );
        }

        let closed = session.close().await;
        if let Err(err) = &closed {
            warn!(
                target: LOG_TARGET,
                identity,
                transaction_id = %transaction_id,
                error = ?err,
                "Forced close failed"
            );
        }

        rolled_back.and(closed)
    }
}
