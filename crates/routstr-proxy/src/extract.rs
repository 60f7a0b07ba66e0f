//! Small header-extraction helpers shared across handlers.

use axum::http::HeaderMap;

/// Pull the bearer value out of `Authorization: Bearer <value>`, if present.
pub fn bearer_from_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// Pull the ephemeral per-request payment token out of `X-Cashu`, if
/// present.
pub fn x_cashu_from_header(headers: &HeaderMap) -> Option<String> {
    headers.get("x-cashu").and_then(|v| v.to_str().ok()).map(str::to_string)
}
