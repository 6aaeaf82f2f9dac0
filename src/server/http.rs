use super::dispatch::Dispatcher;
use crate::connection::ConnectionFactory;
use crate::core::TxnError;
use crate::transaction::LOG_TARGET;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Path the RPC endpoint is mounted at
pub const RPC_PATH: &str = "/rpc/ws_transaction";

#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

#[derive(Debug, Serialize)]
pub struct RpcReply {
    pub result: Value,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug)]
pub struct RpcError(pub TxnError);

impl From<TxnError> for RpcError {
    fn from(err: TxnError) -> Self {
        RpcError(err)
    }
}

impl RpcError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            TxnError::AuthorizationFailure(_) => StatusCode::FORBIDDEN,
            TxnError::UnknownTransaction { .. } => StatusCode::NOT_FOUND,
            TxnError::DuplicateTransaction { .. } => StatusCode::CONFLICT,
            TxnError::CollaboratorFailure(_) => StatusCode::UNPROCESSABLE_ENTITY,
            TxnError::UnknownMethod(_) | TxnError::InvalidParams(_) => StatusCode::BAD_REQUEST,
            TxnError::BackingStoreFailure(_) | TxnError::ConfigError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for RpcError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(ErrorResponse {
            error: self.0.to_string(),
            code: self.0.code().to_string(),
        });

        (status, body).into_response()
    }
}

pub fn router<F: ConnectionFactory>(dispatcher: Arc<Dispatcher<F>>) -> Router {
    Router::new()
        .route(RPC_PATH, post(rpc::<F>))
        .layer(TraceLayer::new_for_http())
        .with_state(dispatcher)
}

async fn rpc<F: ConnectionFactory>(
    State(dispatcher): State<Arc<Dispatcher<F>>>,
    Json(request): Json<RpcRequest>,
) -> Result<Json<RpcReply>, RpcError> {
    let result = dispatcher.call(&request.method, request.params).await?;
    Ok(Json(RpcReply { result }))
}

/// HTTP front for one `Dispatcher`
pub struct RpcServer<F: ConnectionFactory> {
    dispatcher: Arc<Dispatcher<F>>,
    host: String,
    port: u16,
}

impl<F: ConnectionFactory> RpcServer<F> {
    pub fn new(dispatcher: Arc<Dispatcher<F>>, host: &str, port: u16) -> Self {
        Self {
            dispatcher,
            host: host.to_string(),
            port,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Serve until `shutdown` resolves, letting in-flight calls finish
    pub async fn run_until<S>(&self, shutdown: S) -> std::io::Result<()>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let addr = self.addr();
        let listener = TcpListener::bind(&addr).await?;
        info!(target: LOG_TARGET, %addr, path = RPC_PATH, "RPC server listening");

        axum::serve(listener, router(Arc::clone(&self.dispatcher)))
            .with_graceful_shutdown(shutdown)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (TxnError::AuthorizationFailure("x".into()), StatusCode::FORBIDDEN),
            (TxnError::unknown("alice", 1.into()), StatusCode::NOT_FOUND),
            (
                TxnError::DuplicateTransaction {
                    identity: "alice".into(),
                    transaction_id: 1.into(),
                },
                StatusCode::CONFLICT,
            ),
            (TxnError::CollaboratorFailure("x".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (TxnError::UnknownMethod("x".into()), StatusCode::BAD_REQUEST),
            (TxnError::InvalidParams("x".into()), StatusCode::BAD_REQUEST),
            (TxnError::BackingStoreFailure("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (TxnError::ConfigError("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, expected) in cases {
            assert_eq!(RpcError(err).status(), expected);
        }
    }

    #[test]
    fn test_request_params_default_to_empty() {
        let request: RpcRequest = serde_json::from_str(r#"{"method": "list"}"#).unwrap();
        assert_eq!(request.method, "list");
        assert!(request.params.is_empty());
    }
}
