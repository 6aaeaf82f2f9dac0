use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;
use wstxn::connection::auth::MIN_HASH_COST;
use wstxn::server::{Dispatcher, RPC_PATH, router};
use wstxn::{AuthManager, ManagerConfig, MemoryStore, Permission, TransactionIdPolicy, memory_manager};

async fn app() -> axum::Router {
    let store = Arc::new(MemoryStore::new());
    let auth = Arc::new(AuthManager::with_admin_and_cost("admin", "adminpass", MIN_HASH_COST));
    auth.create_user("2", "password123", vec![Permission::Transact])
        .await
        .expect("create user");

    let manager = memory_manager(
        ManagerConfig::new().id_policy(TransactionIdPolicy::Counter),
        Arc::clone(&store),
        auth,
        &["demo"],
    )
    .await
    .expect("manager");
    store
        .insert("demo", "res.partner", json!({"name": "Alice"}))
        .await
        .expect("seed partner");

    let dispatcher = Dispatcher::new(Arc::new(manager)).expect("dispatcher");
    router(Arc::new(dispatcher))
}

async fn call(router: &axum::Router, method: &str, params: Value) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(json_request(json!({"method": method, "params": params})))
        .await
        .expect("rpc response");
    let status = response.status();
    (status, decode_json(response).await)
}

fn json_request(body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(RPC_PATH)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

async fn decode_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn rpc_rollback_scenario_over_http() {
    let router = app().await;
    let creds = [json!("demo"), json!(2), json!("password123")];

    let (status, body) = call(&router, "begin", json!(creds)).await;
    assert_eq!(status, StatusCode::OK);
    let tid = body["result"].clone();
    assert_eq!(tid, json!(1));

    let with_tid = |extra: Vec<Value>| {
        let mut params = creds.to_vec();
        params.push(tid.clone());
        params.extend(extra);
        Value::Array(params)
    };

    let (_, body) = call(
        &router,
        "execute",
        with_tid(vec![json!("res.partner"), json!("write"), json!([1]), json!({"name": "Alice2"})]),
    )
    .await;
    assert_eq!(body["result"], json!(true));

    let read = with_tid(vec![json!("res.partner"), json!("read"), json!([1]), json!(["name"])]);
    let (_, body) = call(&router, "execute", read.clone()).await;
    assert_eq!(body["result"][0]["name"], json!("Alice2"));

    let (status, body) = call(&router, "rollback", with_tid(vec![])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], Value::Null);

    let (_, body) = call(&router, "execute", read.clone()).await;
    assert_eq!(body["result"][0]["name"], json!("Alice"));

    let (status, _) = call(&router, "close", with_tid(vec![])).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&router, "execute", read).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], json!("unknown_transaction"));
}

#[tokio::test]
async fn rpc_errors_map_to_statuses() {
    let router = app().await;

    let (status, body) = call(&router, "begin", json!(["demo", 2, "wrong-password"])).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], json!("authorization_failure"));

    let (status, body) = call(&router, "vacuum", json!([])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], json!("unknown_method"));

    let (status, body) = call(&router, "commit", json!(["demo", 2])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], json!("invalid_params"));

    let (_, body) = call(&router, "begin", json!(["demo", 2, "password123"])).await;
    let tid = body["result"].clone();
    let (status, body) = call(
        &router,
        "execute",
        json!(["demo", 2, "password123", tid, "res.partner", "explode"]),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], json!("collaborator_failure"));
}

#[tokio::test]
async fn rpc_kill_and_list() {
    let router = app().await;

    let (_, body) = call(&router, "begin", json!(["demo", "2", "password123"])).await;
    let tid = body["result"].clone();

    let (status, body) = call(&router, "list", json!([])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], Value::Null);

    let (status, _) = call(&router, "kill", json!(["demo", "admin", "adminpass", tid, 2])).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(&router, "close_connection", json!(["demo", 2, "password123", tid])).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
