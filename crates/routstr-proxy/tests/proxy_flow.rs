//! HTTP-level tests driving the real router (`routstr_proxy::build`)
//! end to end against a mocked upstream, the way
//! `cdk-http-client`'s own `tests/integration.rs` drives its client against
//! `mockito`. Exercises the admit -> forward -> finalize/revert path the
//! unit tests in each crate can only cover piecewise.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http_body_util::BodyExt;
use routstr_common::model::{Model, Pricing};
use routstr_ledger::{AuthResolver, LedgerStore, MemoryLedgerStore, PaymentStateMachine};
use routstr_pricing::{ModelSource, OracleError, PricingCatalog};
use routstr_proxy::refund_cache::RefundCache;
use routstr_proxy::{AppState, GatewayRedeemer, ProxyConfig};
use routstr_wallet::{FakeCashuBackend, WalletGateway};
use tower::ServiceExt;

struct FixedSource(Vec<Model>);

#[async_trait]
impl ModelSource for FixedSource {
    async fn fetch_models(&self) -> Result<Vec<Model>, OracleError> {
        Ok(self.0.clone())
    }
}

fn priced_model(id: &str) -> Model {
    // top_provider bounds the reservation ceiling to something far smaller
    // than the 1,000,000-prompt-token fallback envelope `derive_max_cost`
    // would otherwise use for a model with no sizing signal at all.
    Model {
        id: id.to_string(),
        top_provider: routstr_common::model::TopProvider {
            context_length: Some(1000),
            max_completion_tokens: Some(200),
            is_moderated: false,
        },
        sats_pricing: Some(Pricing {
            prompt: 1.0,
            completion: 1.0,
            ..Default::default()
        }),
        ..Default::default()
    }
}

async fn test_app(
    upstream_base_url: String,
) -> (axum::Router, MemoryLedgerStore, String) {
    let store = MemoryLedgerStore::new();
    let backend = FakeCashuBackend::new();
    let wallet = Arc::new(WalletGateway::new(backend, vec!["https://mint.example".to_string()], "https://mint.example".to_string()));

    let pricing = Arc::new(PricingCatalog::new(1));
    pricing.bootstrap(&FixedSource(vec![priced_model("test/model")])).await.unwrap();

    let redeemer = GatewayRedeemer::new(wallet.clone());
    let auth = Arc::new(AuthResolver::new(store.clone(), redeemer));
    let payments = Arc::new(PaymentStateMachine::new(store.clone()));

    let config = Arc::new(ProxyConfig {
        upstream_base_url,
        upstream_api_key: None,
        cors_origins: vec![],
        trusted_mints: vec!["https://mint.example".to_string()],
        primary_mint_url: "https://mint.example".to_string(),
        primary_unit: "sat".to_string(),
        receive_ln_address: None,
        min_request_msat: 1,
        refund_cache_ttl: Duration::from_secs(60),
    });

    let hashed_key = "a".repeat(64);
    store.credit(&hashed_key, 1_000_000).await;

    let state = AppState {
        payments,
        auth,
        pricing,
        wallet,
        http: reqwest::Client::new(),
        config,
        refund_cache: Arc::new(tokio::sync::Mutex::new(RefundCache::new())),
    };

    (routstr_proxy::build(state), store, hashed_key)
}

fn chat_request_body() -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "model": "test/model",
        "messages": [{"role": "user", "content": "hi"}],
    }))
    .unwrap()
}

#[tokio::test]
async fn non_streaming_request_finalizes_at_actual_usage_cost() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            serde_json::json!({
                "choices": [],
                "usage": {"prompt_tokens": 10, "completion_tokens": 5},
            })
            .to_string(),
        )
        .create_async()
        .await;

    let (app, store, hashed_key) = test_app(server.url()).await;

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("authorization", format!("Bearer sk-{hashed_key}"))
        .header("content-type", "application/json")
        .body(axum::body::Body::from(chat_request_body()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["cost"]["total_msats"], 15);

    let key = store.get(&hashed_key).await.unwrap();
    assert_eq!(key.total_spent, 15, "only the actual usage cost was charged, not the reservation ceiling");
    assert_eq!(key.reserved_balance, 0);

    mock.assert_async().await;
}

#[tokio::test]
async fn query_string_and_client_headers_reach_upstream() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .match_query(mockito::Matcher::UrlEncoded("beta".into(), "true".into()))
        .match_header("x-client-trace", "abc123")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(serde_json::json!({"choices": []}).to_string())
        .create_async()
        .await;

    let (app, _store, hashed_key) = test_app(server.url()).await;

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/v1/chat/completions?beta=true")
        .header("authorization", format!("Bearer sk-{hashed_key}"))
        .header("content-type", "application/json")
        .header("x-client-trace", "abc123")
        .body(axum::body::Body::from(chat_request_body()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);

    mock.assert_async().await;
}

#[tokio::test]
async fn upstream_error_reverts_the_reservation() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .with_status(502)
        .create_async()
        .await;

    let (app, store, hashed_key) = test_app(server.url()).await;
    let before = store.get(&hashed_key).await.unwrap().balance;

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("authorization", format!("Bearer sk-{hashed_key}"))
        .header("content-type", "application/json")
        .body(axum::body::Body::from(chat_request_body()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::BAD_GATEWAY);

    let key = store.get(&hashed_key).await.unwrap();
    assert_eq!(key.balance, before, "reservation was fully reverted on upstream failure");
    assert_eq!(key.reserved_balance, 0);

    mock.assert_async().await;
}

#[tokio::test]
async fn insufficient_balance_is_rejected_before_reaching_upstream() {
    let mut server = mockito::Server::new_async().await;
    let mock = server.mock("POST", "/chat/completions").expect(0).create_async().await;

    let (app, store, hashed_key) = test_app(server.url()).await;
    // drain the key so the reservation guard fails closed
    store.drain_and_delete(&hashed_key).await.unwrap();
    store.get_or_create(&hashed_key).await;

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("authorization", format!("Bearer sk-{hashed_key}"))
        .header("content-type", "application/json")
        .body(axum::body::Body::from(chat_request_body()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::PAYMENT_REQUIRED);

    mock.assert_async().await;
}

#[tokio::test]
async fn info_route_requires_no_bearer() {
    let server = mockito::Server::new_async().await;
    let (app, _store, _hashed_key) = test_app(server.url()).await;

    let request = axum::http::Request::builder()
        .method("GET")
        .uri("/v1/info")
        .body(axum::body::Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(body["models"].is_array());
}
