//! The Proxy Engine: axum router, handlers, and the background payout
//! worker that sit in front of the upstream OpenAI-compatible API.

pub mod extract;
pub mod handlers;
pub mod middleware;
pub mod refund_cache;
pub mod router;
pub mod state;
pub mod workers;

pub use router::build;
pub use state::{AppState, GatewayRedeemer, ProxyConfig};
