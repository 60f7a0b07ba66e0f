//! `/v1/balance/*` and the deprecated `/v1/wallet/*` alias family.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use routstr_common::error::Error as CommonError;
use routstr_ledger::RefundHeaders;
use routstr_wallet::CashuWalletBackend;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::extract::bearer_from_header;
use crate::state::AppState;
use routstr_ledger::LedgerStore;

fn key_balance_payload(hashed_key: &str, balance: u64) -> serde_json::Value {
    json!({ "api_key": format!("sk-{hashed_key}"), "balance": balance })
}

/// `GET /v1/balance/info` (and its `/v1/wallet/info` alias) — resolve the
/// bearer, return its current balance.
pub async fn info<S: LedgerStore + Clone, B: CashuWalletBackend>(
    State(state): State<AppState<S, B>>,
    headers: HeaderMap,
    axum::Extension(request_id): axum::Extension<crate::middleware::RequestId>,
) -> axum::response::Response {
    match resolve(&state, &headers).await {
        Ok(key) => Json(key_balance_payload(&key.hashed_key, key.balance)).into_response(),
        Err(err) => routstr_common::HttpError {
            error: err,
            request_id: request_id.0,
        }
        .into_response(),
    }
}

#[derive(Deserialize)]
pub struct CreateQuery {
    initial_balance_token: Option<String>,
}

/// `GET /v1/balance/create?initial_balance_token=...` — an alternate
/// topup-via-GET path that reuses the same Auth Resolver.
pub async fn create<S: LedgerStore + Clone, B: CashuWalletBackend>(
    State(state): State<AppState<S, B>>,
    Query(query): Query<CreateQuery>,
    headers: HeaderMap,
    axum::Extension(request_id): axum::Extension<crate::middleware::RequestId>,
) -> axum::response::Response {
    let bearer = query.initial_balance_token.or_else(|| bearer_from_header(&headers));
    let Some(bearer) = bearer else {
        return routstr_common::HttpError {
            error: CommonError::Unauthorized,
            request_id: request_id.0,
        }
        .into_response();
    };
    match state.auth.resolve(&bearer, refund_headers(&headers)).await {
        Ok(key) => Json(key_balance_payload(&key.hashed_key, key.balance)).into_response(),
        Err(err) => routstr_common::HttpError { error: err, request_id: request_id.0 }.into_response(),
    }
}

#[derive(Deserialize)]
pub struct TopupQuery {
    cashu_token: Option<String>,
}

#[derive(Deserialize)]
pub struct TopupBody {
    cashu_token: Option<String>,
}

/// `POST /v1/balance/topup` — redeem a cashu token into an existing key's
/// balance (or create+credit on first sight, via the same Auth Resolver).
pub async fn topup<S: LedgerStore + Clone, B: CashuWalletBackend>(
    State(state): State<AppState<S, B>>,
    Query(query): Query<TopupQuery>,
    headers: HeaderMap,
    axum::Extension(request_id): axum::Extension<crate::middleware::RequestId>,
    body: Option<Json<TopupBody>>,
) -> axum::response::Response {
    let token = query
        .cashu_token
        .or_else(|| body.and_then(|b| b.0.cashu_token))
        .map(|t| t.trim().replace(['\n', '\r', '\t'], ""));

    let Some(token) = token else {
        return routstr_common::HttpError {
            error: CommonError::InvalidRequest("missing cashu_token".to_string()),
            request_id: request_id.0,
        }
        .into_response();
    };
    if token.len() < 10 || !token.contains("cashu") {
        return routstr_common::HttpError {
            error: CommonError::InvalidRequest("invalid token format".to_string()),
            request_id: request_id.0,
        }
        .into_response();
    }

    match state.auth.resolve(&token, RefundHeaders::default()).await {
        Ok(key) => Json(json!({ "msats": key.balance })).into_response(),
        Err(err) => routstr_common::HttpError { error: err, request_id: request_id.0 }.into_response(),
    }
}

/// `POST /v1/balance/refund` — drain the key and pay out via LNURL (if a
/// refund address is on file) or a fresh cashu token. Idempotent per
/// bearer within the cache TTL. Never mutates the ledger on failure.
pub async fn refund<S: LedgerStore + Clone, B: CashuWalletBackend>(
    State(state): State<AppState<S, B>>,
    headers: HeaderMap,
    axum::Extension(request_id): axum::Extension<crate::middleware::RequestId>,
) -> axum::response::Response {
    let Some(bearer) = bearer_from_header(&headers) else {
        return routstr_common::HttpError { error: CommonError::Unauthorized, request_id: request_id.0 }.into_response();
    };
    let cache_key = hash_bearer(&bearer);

    {
        let mut cache = state.refund_cache.lock().await;
        if let Some(cached) = cache.get(&cache_key) {
            return Json(cached).into_response();
        }
    }

    let key = match state.auth.resolve(&bearer, RefundHeaders::default()).await {
        Ok(key) => key,
        Err(err) => return routstr_common::HttpError { error: err, request_id: request_id.0 }.into_response(),
    };
    if key.balance == 0 {
        return routstr_common::HttpError {
            error: CommonError::InvalidRequest("no balance to refund".to_string()),
            request_id: request_id.0,
        }
        .into_response();
    }

    let refund_currency = key.refund_currency.clone().unwrap_or_else(|| "sat".to_string());
    let refund_mint = key.refund_mint_url.clone().unwrap_or_else(|| state.config.primary_mint_url.clone());

    // Perform the payout first; the ledger row is only touched once the
    // payout has actually succeeded.
    let result = if let Some(address) = key.refund_address.clone() {
        let amount = if refund_currency == "sat" { key.balance / 1000 } else { key.balance };
        match state
            .wallet
            .send_to_lnurl(&state.http, &refund_mint, &refund_currency, amount, &address)
            .await
        {
            Ok(_) => json!({ "recipient": address }),
            Err(err) => {
                warn!(%err, "refund payout failed");
                return routstr_common::HttpError {
                    error: CommonError::MintUnreachable(err.to_string()),
                    request_id: request_id.0,
                }
                .into_response();
            }
        }
    } else {
        let amount = if refund_currency == "sat" { key.balance / 1000 } else { key.balance };
        match state.wallet.send_token(&refund_mint, &refund_currency, amount).await {
            Ok(token) => json!({ "token": token }),
            Err(err) => {
                warn!(%err, "refund token send failed");
                return routstr_common::HttpError {
                    error: CommonError::MintUnreachable(err.to_string()),
                    request_id: request_id.0,
                }
                .into_response();
            }
        }
    };

    let mut result = result;
    if let Some(obj) = result.as_object_mut() {
        if refund_currency == "sat" {
            obj.insert("sats".to_string(), json!(key.balance / 1000));
        } else {
            obj.insert("msats".to_string(), json!(key.balance));
        }
    }

    let _ = state.store().drain_and_delete(&key.hashed_key).await;

    {
        let mut cache = state.refund_cache.lock().await;
        cache.set(cache_key, result.clone(), state.config.refund_cache_ttl);
    }

    Json(result).into_response()
}

/// Deprecated `/v1/wallet/*` catch-all: everything else under this prefix
/// 404s with a pointer to the current surface.
pub async fn wallet_catch_all() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "deprecated path; see /v1/balance and /v1/models" })),
    )
}

async fn resolve<S: LedgerStore + Clone, B: CashuWalletBackend>(
    state: &AppState<S, B>,
    headers: &HeaderMap,
) -> Result<routstr_ledger::ApiKey, CommonError> {
    let bearer = bearer_from_header(headers).ok_or(CommonError::Unauthorized)?;
    state.auth.resolve(&bearer, refund_headers(headers)).await
}

fn refund_headers(headers: &HeaderMap) -> RefundHeaders {
    RefundHeaders {
        refund_address: headers.get("refund-lnurl").and_then(|v| v.to_str().ok()).map(str::to_string),
        key_expiry_time: headers
            .get("key-expiry-time")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok()),
    }
}

fn hash_bearer(bearer: &str) -> String {
    let digest = Sha256::digest(bearer.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
