//! The Proxy Engine: the catch-all handler that admits a request against
//! the ledger, forwards it upstream, and finalizes the reservation against
//! whatever usage (if any) the upstream response carried.

use axum::body::Bytes;
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use routstr_common::cost::Usage;
use routstr_common::error::Error as CommonError;
use routstr_ledger::{LedgerStore, RefundHeaders, Reservation};
use routstr_wallet::CashuWalletBackend;
use serde_json::Value;
use tracing::{error, warn};

use crate::extract::{bearer_from_header, x_cashu_from_header};
use crate::middleware::RequestId;
use crate::state::AppState;

/// Headers stripped before forwarding upstream: hop-by-hop headers per
/// RFC 7230 §6.1, plus the auth-bearing and routing headers this proxy
/// itself consumes (`authorization`, `x-cashu`, `refund-lnurl`,
/// `key-expiry-time`, `host`, `content-length` — the outgoing client
/// recomputes the latter two).
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
    "authorization",
    "x-cashu",
    "refund-lnurl",
    "key-expiry-time",
];

/// Copy every header except [`HOP_BY_HOP_HEADERS`] onto a fresh `HeaderMap`
/// suitable for the outgoing upstream request.
fn forward_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if HOP_BY_HOP_HEADERS.iter().any(|h| name.as_str().eq_ignore_ascii_case(h)) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Join the upstream base, the path (stripped of its `v1/` prefix, if any),
/// and the original query string, so the request is relayed byte-for-byte
/// instead of dropping search params the client sent.
fn upstream_url(base: &str, path: &str, query: Option<&str>) -> String {
    let upstream_path = path.strip_prefix("v1/").unwrap_or(path);
    match query {
        Some(q) if !q.is_empty() => format!("{base}/{upstream_path}?{q}"),
        _ => format!("{base}/{upstream_path}"),
    }
}

/// `/{*path}` — relays to the upstream OpenAI-compatible API, admitting
/// against the ledger first for any request that carries a JSON body.
pub async fn catch_all<S: LedgerStore + Clone + 'static, B: CashuWalletBackend + 'static>(
    State(state): State<AppState<S, B>>,
    Path(path): Path<String>,
    method: Method,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    axum::Extension(request_id): axum::Extension<RequestId>,
    body: Bytes,
) -> Response {
    match handle(&state, &path, &method, &headers, query.as_deref(), &body).await {
        Ok(resp) => resp,
        Err(err) => routstr_common::HttpError {
            error: err,
            request_id: request_id.0,
        }
        .into_response(),
    }
}

async fn handle<S: LedgerStore + Clone + 'static, B: CashuWalletBackend + 'static>(
    state: &AppState<S, B>,
    path: &str,
    method: &Method,
    headers: &HeaderMap,
    query: Option<&str>,
    body: &Bytes,
) -> Result<Response, CommonError> {
    let bearer = bearer_from_header(headers);
    let x_cashu = x_cashu_from_header(headers);

    if bearer.is_none() && x_cashu.is_none() {
        if *method == Method::GET {
            return forward_unauthenticated(state, path, query, headers).await;
        }
        return Err(CommonError::Unauthorized);
    }

    let request_body: Option<Value> = if body.is_empty() {
        None
    } else {
        Some(serde_json::from_slice(body).map_err(|e| CommonError::InvalidRequest(e.to_string()))?)
    };

    let model_name = request_body.as_ref().and_then(|b| b["model"].as_str()).map(str::to_string);
    let wants_stream = request_body.as_ref().and_then(|b| b["stream"].as_bool()).unwrap_or(false);

    let max_cost = match &model_name {
        Some(name) => state
            .pricing
            .max_cost(name)
            .await
            .ok_or_else(|| CommonError::ModelNotFound(name.clone()))?,
        None => state.config.min_request_msat,
    };

    // Ephemeral X-Cashu: redeem the token into a throwaway key, admit
    // against it, and delete the row once the reservation is settled.
    let (hashed_key, ephemeral) = if let Some(token) = x_cashu {
        let amount = state.auth.redeem_raw(&token).await?;
        let hashed_key = routstr_ledger::auth::hash_token(&token);
        state.store().get_or_create(&hashed_key).await;
        state.store().credit(&hashed_key, amount).await;
        (hashed_key, true)
    } else {
        let refund = RefundHeaders {
            refund_address: headers.get("refund-lnurl").and_then(|v| v.to_str().ok()).map(str::to_string),
            key_expiry_time: headers
                .get("key-expiry-time")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok()),
        };
        if refund.key_expiry_time.is_some() && refund.refund_address.is_none() {
            return Err(CommonError::InvalidRequest(
                "Key-Expiry-Time requires Refund-LNURL".to_string(),
            ));
        }
        let key = state.auth.resolve(bearer.as_ref().expect("checked above"), refund).await?;
        (key.hashed_key, false)
    };

    if request_body.is_none() {
        // no JSON body: nothing to meter, just relay authenticated GET/POST
        return forward_unauthenticated(state, path, query, headers).await;
    }

    let reservation = state.payments.reserve(&hashed_key, max_cost).await?;

    let url = upstream_url(&state.config.upstream_base_url, path, query);

    let mut forwarded = forward_headers(headers);
    if !forwarded.contains_key(axum::http::header::CONTENT_TYPE) {
        forwarded.insert(axum::http::header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }

    let mut req = state.http.request(method.clone(), &url).headers(forwarded).body(body.clone());
    if let Some(api_key) = &state.config.upstream_api_key {
        req = req.bearer_auth(api_key);
    }

    let upstream_resp = match req.send().await {
        Ok(resp) => resp,
        Err(err) => {
            let _ = state.payments.revert(&reservation).await;
            return Err(classify_transport_error(err));
        }
    };

    if upstream_resp.status() != StatusCode::OK {
        let status = upstream_resp.status();
        let _ = state.payments.revert(&reservation).await;
        return Err(CommonError::Upstream(format!("upstream returned {status}")));
    }

    let is_sse = upstream_resp
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/event-stream"))
        .unwrap_or(false);

    let model = match &model_name {
        Some(name) => state.pricing.get(name).await,
        None => None,
    };

    let response = if is_sse && wants_stream {
        handle_streaming(state, reservation, model, upstream_resp).await?
    } else {
        handle_non_streaming(state, reservation, model, upstream_resp).await?
    };

    if ephemeral {
        let _ = state.store().drain_and_delete(&hashed_key).await;
    }

    Ok(response)
}

async fn handle_non_streaming<S: LedgerStore + Clone, B: CashuWalletBackend>(
    state: &AppState<S, B>,
    reservation: Reservation,
    model: Option<routstr_common::model::Model>,
    upstream_resp: reqwest::Response,
) -> Result<Response, CommonError> {
    let body_bytes = upstream_resp.bytes().await.map_err(|e| CommonError::Upstream(e.to_string()))?;
    let mut body_json: Value = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);
    let usage: Option<Usage> = body_json.get("usage").and_then(|u| serde_json::from_value(u.clone()).ok());

    let outcome = state.payments.finalize(&reservation, model.as_ref(), usage).await?;
    if let Some(obj) = body_json.as_object_mut() {
        obj.insert("cost".to_string(), serde_json::to_value(&outcome).unwrap_or(Value::Null));
    }

    Ok(axum::Json(body_json).into_response())
}

async fn handle_streaming<S: LedgerStore + Clone + 'static, B: CashuWalletBackend + 'static>(
    state: &AppState<S, B>,
    reservation: Reservation,
    model: Option<routstr_common::model::Model>,
    upstream_resp: reqwest::Response,
) -> Result<Response, CommonError> {
    use axum::body::Body;
    use futures::StreamExt;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;

    let state = state.clone();
    let (tx, rx) = mpsc::channel::<Result<axum::body::Bytes, std::io::Error>>(16);

    // Tee every chunk to the client immediately while also buffering it, so
    // the client sees tokens as they arrive even though the usage frame
    // (and therefore the actual charge) is only known once the stream ends.
    tokio::spawn(async move {
        let mut upstream_stream = upstream_resp.bytes_stream();
        let mut buffered: Vec<u8> = Vec::new();

        while let Some(item) = upstream_stream.next().await {
            match item {
                Ok(chunk) => {
                    buffered.extend_from_slice(&chunk);
                    if buffered.len() > 1_000_000 {
                        let keep_from = buffered.len() - 500_000;
                        buffered.drain(..keep_from);
                    }
                    if tx.send(Ok(chunk)).await.is_err() {
                        break; // client disconnected; still finalize below
                    }
                }
                Err(err) => {
                    warn!(%err, "upstream stream interrupted");
                    break;
                }
            }
        }

        let usage = find_usage_from_tail(&buffered);
        match state.payments.finalize(&reservation, model.as_ref(), usage).await {
            Ok(outcome) => {
                let frame = format!(
                    "data: {}\n\n",
                    serde_json::to_string(&serde_json::json!({ "cost": outcome })).unwrap_or_default()
                );
                let _ = tx.send(Ok(axum::body::Bytes::from(frame))).await;
            }
            Err(err) => error!(%err, "failed to finalize streaming reservation"),
        }
    });

    let mut response = Response::new(Body::from_stream(ReceiverStream::new(rx)));
    response
        .headers_mut()
        .insert("content-type", axum::http::HeaderValue::from_static("text/event-stream"));
    Ok(response)
}

/// Scan buffered SSE chunks from the tail for the first `data: {...}` frame
/// carrying a `usage` object, the way `stream_with_cost` does in the
/// original implementation — the usage frame is typically the last one
/// before `[DONE]`, so scanning backward finds it without buffering the
/// whole stream's worth of parses.
fn find_usage_from_tail(buffered: &[u8]) -> Option<Usage> {
    let text = String::from_utf8_lossy(buffered);
    for frame in text.split("data: ").collect::<Vec<_>>().into_iter().rev() {
        let frame = frame.trim();
        if frame.is_empty() || frame.starts_with("[DONE]") {
            continue;
        }
        if let Ok(value) = serde_json::from_str::<Value>(frame) {
            if let Some(usage) = value.get("usage") {
                if let Ok(usage) = serde_json::from_value::<Usage>(usage.clone()) {
                    return Some(usage);
                }
            }
        }
    }
    None
}

async fn forward_unauthenticated<S: LedgerStore + Clone, B: CashuWalletBackend>(
    state: &AppState<S, B>,
    path: &str,
    query: Option<&str>,
    headers: &HeaderMap,
) -> Result<Response, CommonError> {
    let url = upstream_url(&state.config.upstream_base_url, path, query);
    let resp = state
        .http
        .get(&url)
        .headers(forward_headers(headers))
        .send()
        .await
        .map_err(classify_transport_error)?;
    let status = StatusCode::from_u16(resp.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let bytes = resp.bytes().await.map_err(|e| CommonError::Upstream(e.to_string()))?;
    Ok((status, bytes).into_response())
}

fn classify_transport_error(err: reqwest::Error) -> CommonError {
    if err.is_timeout() {
        CommonError::UpstreamTimeout
    } else {
        CommonError::Upstream(err.to_string())
    }
}
