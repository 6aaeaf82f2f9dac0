use super::SessionState;
use crate::connection::StoreConnection;
use crate::core::{Result, TxnError};
use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;

/// Default inactivity lifetime of a session
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(3600);

/// One open transaction: a store connection plus access bookkeeping
///
/// A session is driven by one caller at a time; the manager serializes access
/// through a per-session lock, so nothing in here synchronizes.
#[derive(Debug)]
pub struct Session<C> {
    connection: C,
    created_at: DateTime<Utc>,
    last_accessed_at: DateTime<Utc>,
    ttl: Duration,
    state: SessionState,
}

impl<C: StoreConnection> Session<C> {
    pub fn new(connection: C, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            connection,
            created_at: now,
            last_accessed_at: now,
            ttl,
            state: SessionState::Open,
        }
    }

    /// Hand out the connection and record the access
    ///
    /// Every data-path use of the connection must go through here so that
    /// idleness is measured correctly.
    pub fn access(&mut self) -> &mut C {
        self.touch();
        &mut self.connection
    }

    /// Look at the connection without counting it as activity
    pub fn peek(&self) -> &C {
        &self.connection
    }

    fn touch(&mut self) {
        let now = Utc::now();
        // Wall clock may step backwards; keep last access >= creation
        self.last_accessed_at = now.max(self.created_at);
    }

    pub async fn rollback(&mut self) -> Result<()> {
        self.access().rollback().await
    }

    pub async fn commit(&mut self) -> Result<()> {
        self.access().commit().await
    }

    /// Close the connection; the session is `Closed` afterwards even if the store failed
    pub async fn close(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Err(TxnError::BackingStoreFailure(
                "Session already closed".into(),
            ));
        }
        let result = self.access().close().await;
        self.state = SessionState::Closed;
        result
    }

    /// True once `now` is past last access + ttl
    pub fn is_abandoned(&self, now: DateTime<Utc>) -> bool {
        let ttl = TimeDelta::from_std(self.ttl).unwrap_or(TimeDelta::MAX);
        match self.last_accessed_at.checked_add_signed(ttl) {
            Some(deadline) => now > deadline,
            None => false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_accessed_at(&self) -> DateTime<Utc> {
        self.last_accessed_at
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}
