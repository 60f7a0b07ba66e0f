//! HTTP handlers, grouped the way `cdk_axum::router_handlers` groups them:
//! one module per route family.

pub mod balance;
pub mod info;
pub mod models;
pub mod proxy;
