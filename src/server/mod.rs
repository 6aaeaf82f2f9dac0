//! RPC surface of the transaction service
//!
//! `dispatch` maps method names onto `SessionManager` calls; `http` mounts the
//! dispatcher on an axum router.

pub mod dispatch;
pub mod http;

pub use dispatch::{Dispatcher, Method};
pub use http::{RPC_PATH, RpcError, RpcServer, router};
