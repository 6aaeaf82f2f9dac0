/// Session lifecycle
///
/// ```text
/// Open ──close/kill/sweep──> Closed
///  ↺ execute, commit, rollback
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connection is live and holds an open transaction
    Open,
    /// Connection has been closed; terminal
    Closed,
}

impl SessionState {
    pub fn is_open(&self) -> bool {
        matches!(self, SessionState::Open)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Open => write!(f, "OPEN"),
            SessionState::Closed => write!(f, "CLOSED"),
        }
    }
}
