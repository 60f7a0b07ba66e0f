//! The Pricing Model Catalog and the exchange-rate oracle that keeps its
//! sats-denominated figures current.

pub mod catalog;
pub mod oracle;

pub use catalog::{HttpModelSource, ModelSource, PricingCatalog};
pub use oracle::{usd_per_sat, FeeSchedule, OracleError};
