//! End-to-end exchanges against a local axum server over `HyperTransport`.

#![cfg(any(feature = "tls-ring", feature = "tls-aws-lc"))]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, RawQuery};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use jsonrest_client::breaker::{BreakerConfig, CommandConfig};
use jsonrest_client::{CallContext, Client, ClientError, HyperTransport};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

#[derive(Debug, Serialize)]
struct NewItem {
    name: String,
    qty: u32,
}

#[derive(Debug, Default, Deserialize, PartialEq)]
struct Item {
    id: u64,
    name: String,
    qty: u32,
}

#[derive(Debug, Default, Deserialize, PartialEq)]
struct Problem {
    error: String,
}

async fn testreq(RawQuery(query): RawQuery) -> StatusCode {
    if query.as_deref() == Some("key1=val1&key2=val2") {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    }
}

async fn create_item(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let mut item = body;
    item["id"] = json!(42);
    (StatusCode::CREATED, Json(item))
}

async fn find_item(Path(id): Path<u64>) -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": format!("item {id} not found")})),
    )
}

async fn broken() -> (StatusCode, &'static str) {
    (StatusCode::BAD_GATEWAY, "<html>bad gateway</html>")
}

async fn echo_headers(headers: HeaderMap) -> Json<Value> {
    let value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    };
    Json(json!({
        "accept": value("accept"),
        "content_type": value("content-type"),
        "request_id": value("x-request-id"),
        "api_key": value("x-api-key"),
    }))
}

async fn spawn_server() -> SocketAddr {
    let app = Router::new()
        .route("/api/v1/testreq", get(testreq))
        .route("/items", post(create_item))
        .route("/items/{id}", get(find_item))
        .route("/broken", get(broken))
        .route("/headers", get(echo_headers));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn test_get_with_query_through_full_chain() {
    let addr = spawn_server().await;
    let client = Client::builder(addr.to_string())
        .debug()
        .tracing()
        .circuit_breaker(BreakerConfig::new("exchange-testcmd", CommandConfig::default()))
        .build()
        .unwrap();

    let ctx = CallContext::new().with_span(tracing::info_span!("exchange-test"));
    client
        .verb("GET")
        .path("/api/v1/testreq")
        .query([("key1", ["val1"]), ("key2", ["val2"])])
        .send(&ctx)
        .await
        .unwrap();

    // a second exchange on the same client starts from a clean slate
    let err = client.get("/api/v1/testreq").send(&ctx).await.unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::BAD_REQUEST));
}

#[tokio::test]
async fn test_post_json_decodes_success() {
    let addr = spawn_server().await;
    let client = Client::builder(format!("http://{addr}/ignored/base/path")).build().unwrap();

    let item: Item = client
        .post("/items")
        .json(&NewItem {
            name: "widget".into(),
            qty: 3,
        })
        .send_json(&CallContext::new())
        .await
        .unwrap();
    assert_eq!(
        item,
        Item {
            id: 42,
            name: "widget".into(),
            qty: 3,
        }
    );
}

#[tokio::test]
async fn test_failure_decodes_into_failure_target() {
    let addr = spawn_server().await;
    let client = Client::builder(addr.to_string()).build().unwrap();

    let mut item = Item::default();
    let mut problem = Problem::default();
    let err = client
        .get("/items/7")
        .execute(&CallContext::new(), Some(&mut item), Some(&mut problem))
        .await
        .unwrap_err();

    assert_eq!(problem.error, "item 7 not found");
    assert_eq!(item, Item::default());
    let api = err.as_api().unwrap();
    assert_eq!(api.status(), StatusCode::NOT_FOUND);
    assert_eq!(api.message(), None);
}

#[tokio::test]
async fn test_failure_with_non_json_body() {
    let addr = spawn_server().await;
    let client = Client::builder(addr.to_string()).build().unwrap();

    let mut problem = Problem::default();
    let err = client
        .get("/broken")
        .execute(&CallContext::new(), None::<&mut Item>, Some(&mut problem))
        .await
        .unwrap_err();

    let api = err.as_api().unwrap();
    assert_eq!(api.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(api.body().as_ref(), b"<html>bad gateway</html>");
    assert!(api.message().is_some());
    assert!(err.to_string().contains("status code: 502"));
}

#[tokio::test]
async fn test_headers_reach_server() {
    let addr = spawn_server().await;
    let mut defaults = HeaderMap::new();
    defaults.insert("x-api-key", "k-123".parse().unwrap());
    let client = Client::builder(addr.to_string())
        .default_headers(defaults)
        .build()
        .unwrap();

    let seen: Value = client
        .get("/headers")
        .header("x-request-id", "req-1")
        .header("accept", "text/html")
        .send_json(&CallContext::new())
        .await
        .unwrap();

    assert_eq!(seen["accept"], "application/json; charset=utf-8");
    assert_eq!(seen["content_type"], "application/json; charset=utf-8");
    assert_eq!(seen["request_id"], "req-1");
    assert_eq!(seen["api_key"], "k-123");
}

#[tokio::test]
async fn test_shared_transport_across_clients() {
    let addr = spawn_server().await;
    let transport = Arc::new(HyperTransport::new().unwrap());

    let first = Client::builder(addr.to_string())
        .transport(transport.clone())
        .build()
        .unwrap();
    let second = Client::builder(addr.to_string())
        .transport(transport)
        .debug()
        .build()
        .unwrap();

    first.get("/headers").send(&CallContext::new()).await.unwrap();
    second.get("/headers").send(&CallContext::new()).await.unwrap();
}

#[tokio::test]
async fn test_connection_refused_is_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = Client::builder(addr.to_string()).build().unwrap();
    let err = client.get("/").send(&CallContext::new()).await.unwrap_err();
    assert!(matches!(err, ClientError::Transport(_)));
}
