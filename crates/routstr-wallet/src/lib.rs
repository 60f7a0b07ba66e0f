//! The Wallet Gateway: cashu token parsing, the `CashuWalletBackend`
//! capability seam, deposit/withdraw orchestration, and LNURL-pay.

pub mod backend;
pub mod fake;
pub mod gateway;
pub mod lnurl;
pub mod token;

pub use backend::{CashuWalletBackend, MeltQuote, MintQuote};
pub use fake::FakeCashuBackend;
pub use gateway::{ReceivedToken, WalletGateway};
