// ============================================================================
// Transactional Sessions
// ============================================================================
//
// A session pins one store connection (and the transaction open on it) across
// many stateless RPC calls.
//
// - Session: connection + created/last-access timestamps + ttl
// - SessionManager: (identity, transaction id) registry, auth, routing
// - sweeper: periodic reclamation of abandoned sessions
//
// ============================================================================

pub mod config;
pub mod manager;
pub mod session;
pub mod state;
pub mod sweeper;

pub use config::{ExecuteFailurePolicy, ManagerConfig, TransactionIdPolicy};
pub use manager::{LOG_TARGET, ManagerStats, SessionInfo, SessionManager};
pub use session::{DEFAULT_SESSION_TTL, Session};
pub use state::SessionState;
pub use sweeper::spawn_sweeper;
