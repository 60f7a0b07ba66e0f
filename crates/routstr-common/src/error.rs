//! Error taxonomy shared across the workspace, and its HTTP envelope.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Top-level error type returned by ledger, pricing, and wallet operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Request body failed to parse or named an unknown field.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// No bearer credential, or the credential does not resolve to a key.
    #[error("missing or invalid api key")]
    Unauthorized,
    /// Key balance is below the amount required for admission.
    #[error("insufficient balance: need {needed} msat, have {available} msat")]
    InsufficientBalance {
        /// msats required to admit the request
        needed: u64,
        /// msats currently on the key
        available: u64,
    },
    /// A deposited token's value falls below the minimum acceptable amount.
    #[error("token amount {amount} msat is below the minimum {minimum} msat")]
    TokenTooSmall {
        /// amount carried by the token
        amount: u64,
        /// minimum accepted
        minimum: u64,
    },
    /// The named pricing model is not present in the catalog.
    #[error("unknown model: {0}")]
    ModelNotFound(String),
    /// A model exists but carries no sats pricing yet.
    #[error("pricing not yet available for model: {0}")]
    PricingNotFound(String),
    /// The upstream API returned an error or an unreadable response.
    #[error("upstream error: {0}")]
    Upstream(String),
    /// The upstream API did not respond within the configured timeout.
    #[error("upstream request timed out")]
    UpstreamTimeout,
    /// The configured cashu mint could not be reached.
    #[error("mint unreachable: {0}")]
    MintUnreachable(String),
    /// A wallet operation (redeem, send, swap) failed.
    #[error("wallet error: {0}")]
    Wallet(String),
    /// Catch-all for conditions that should not occur in normal operation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Machine-readable error family, mirrors OpenAI-style `type` field.
    pub fn category(&self) -> &'static str {
        match self {
            Error::InvalidRequest(_) => "invalid_request_error",
            Error::Unauthorized => "invalid_request_error",
            Error::InsufficientBalance { .. } => "insufficient_quota",
            Error::TokenTooSmall { .. } => "invalid_request_error",
            Error::ModelNotFound(_) => "invalid_request_error",
            Error::PricingNotFound(_) => "invalid_request_error",
            Error::Upstream(_) => "upstream_error",
            Error::UpstreamTimeout => "upstream_error",
            Error::MintUnreachable(_) => "upstream_error",
            Error::Wallet(_) => "invalid_request_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// HTTP status this error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::InsufficientBalance { .. } => StatusCode::PAYMENT_REQUIRED,
            Error::TokenTooSmall { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::ModelNotFound(_) => StatusCode::BAD_REQUEST,
            Error::PricingNotFound(_) => StatusCode::BAD_REQUEST,
            Error::Upstream(_) => StatusCode::BAD_GATEWAY,
            Error::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            Error::MintUnreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Wallet(_) => StatusCode::BAD_REQUEST,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable code, nested under `error.code` in the envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidRequest(_) => "invalid_request",
            Error::Unauthorized => "invalid_api_key",
            Error::InsufficientBalance { .. } => "insufficient_balance",
            Error::TokenTooSmall { .. } => "token_too_small",
            Error::ModelNotFound(_) => "model_not_found",
            Error::PricingNotFound(_) => "pricing_not_found",
            Error::Upstream(_) => "upstream_error",
            Error::UpstreamTimeout => "upstream_timeout",
            Error::MintUnreachable(_) => "mint_unreachable",
            Error::Wallet(_) => "wallet_error",
            Error::Internal(_) => "internal_error",
        }
    }
}

/// JSON body of every error response: `{"error": {...}, "request_id": "..."}`.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    error: ErrorBody,
    request_id: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
    #[serde(rename = "type")]
    kind: String,
    code: String,
}

impl ErrorResponse {
    /// Build the envelope for `err`, stamping it with the request's
    /// correlation id (see `routstr-proxy`'s request-id middleware).
    pub fn new(err: &Error, request_id: impl Into<String>) -> Self {
        ErrorResponse {
            error: ErrorBody {
                message: err.to_string(),
                kind: err.category().to_string(),
                code: err.code().to_string(),
            },
            request_id: request_id.into(),
        }
    }
}

/// Wraps an [`Error`] with the request id needed to render it as a response.
#[derive(Debug)]
pub struct HttpError {
    /// the underlying error
    pub error: Error,
    /// correlation id echoed in the response body
    pub request_id: String,
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = self.error.status();
        let body = ErrorResponse::new(&self.error, self.request_id);
        (status, Json(body)).into_response()
    }
}
