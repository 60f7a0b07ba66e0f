//! `GET /` and `GET /v1/info` — unauthenticated server metadata, served
//! identically at both paths the way `original_source/routstr/core/main.py`
//! registers one handler under two routes.

use axum::extract::State;
use axum::Json;
use routstr_ledger::LedgerStore;
use routstr_wallet::CashuWalletBackend;
use serde_json::json;

use crate::state::AppState;

/// Server metadata: name, version, trusted mints, and the current model
/// listing. Never requires a bearer.
pub async fn info<S: LedgerStore + Clone, B: CashuWalletBackend>(
    State(state): State<AppState<S, B>>,
) -> Json<serde_json::Value> {
    let models = state.pricing.list().await;
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "description": "A paid reverse proxy in front of an OpenAI-compatible API, metered in cashu ecash.",
        "version": env!("CARGO_PKG_VERSION"),
        "mints": state.config.trusted_mints,
        "http_url": "",
        "onion_url": "",
        "models": models,
    }))
}
