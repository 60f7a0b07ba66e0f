//! Route table and middleware stack, mirroring the shape of
//! `cdk_axum::create_mint_router_with_custom_cache`: a typed router built
//! from small per-route-family handler modules, CORS applied as a layer,
//! request correlation applied as another.

use axum::middleware::from_fn;
use axum::routing::{get, post};
use axum::Router;
use routstr_ledger::LedgerStore;
use routstr_wallet::CashuWalletBackend;
use tower_http::cors::{Any, CorsLayer};

use crate::handlers::{balance, info, models, proxy};
use crate::middleware::request_id_middleware;
use crate::state::AppState;

/// Build the full axum router for a given `AppState`.
pub fn build<S, B>(state: AppState<S, B>) -> Router
where
    S: LedgerStore + Clone + Send + Sync + 'static,
    B: CashuWalletBackend + Send + Sync + 'static,
{
    let cors = cors_layer(&state.config.cors_origins);

    let balance_router = Router::new()
        .route("/info", get(balance::info::<S, B>))
        .route("/create", get(balance::create::<S, B>))
        .route("/topup", post(balance::topup::<S, B>))
        .route("/refund", post(balance::refund::<S, B>));

    let v1_router = Router::new()
        .nest("/balance", balance_router.clone())
        .route("/models", get(models::list::<S, B>))
        .route("/info", get(info::info::<S, B>))
        .nest("/wallet", balance_router)
        .fallback(proxy::catch_all::<S, B>);

    Router::new()
        .route("/", get(info::info::<S, B>))
        .route("/models", get(models::list::<S, B>))
        .nest("/v1", v1_router)
        .fallback(proxy::catch_all::<S, B>)
        .layer(from_fn(request_id_middleware))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    }
    let origins: Vec<_> = origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}
