//! `GET /v1/models` and `/models` — the pricing catalog, rendered the way
//! an OpenAI-compatible client expects a model listing.

use axum::extract::State;
use axum::Json;
use routstr_wallet::CashuWalletBackend;
use serde_json::json;

use crate::state::AppState;
use routstr_ledger::LedgerStore;

/// List every model currently in the pricing catalog.
pub async fn list<S: LedgerStore + Clone, B: CashuWalletBackend>(
    State(state): State<AppState<S, B>>,
) -> Json<serde_json::Value> {
    let models = state.pricing.list().await;
    Json(json!({ "data": models }))
}
