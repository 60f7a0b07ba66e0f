//! The Key/Balance Ledger and the per-request Payment State Machine.

pub mod auth;
pub mod key;
pub mod payment;
pub mod store;

pub use auth::{AuthResolver, EcashRedeemer, RefundHeaders};
pub use key::ApiKey;
pub use payment::{PaymentStateMachine, Reservation};
pub use store::{LedgerStore, MemoryLedgerStore, StoreError};
