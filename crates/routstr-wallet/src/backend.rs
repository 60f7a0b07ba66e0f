//! `CashuWalletBackend` is the seam where the actual Cashu protocol
//! cryptography (DHKE blind signatures, proof verification, mint/melt
//! quotes) would live. This workspace treats that library as a capability
//! set rather than reimplementing it: [`crate::gateway::WalletGateway`]
//! orchestrates against this trait exactly the way the original wallet
//! orchestration code calls into its underlying wallet object.

use async_trait::async_trait;
use routstr_common::error::Error as CommonError;

/// A quote for minting new proofs at a mint, in exchange for paying a
/// Lightning invoice.
#[derive(Debug, Clone)]
pub struct MintQuote {
    /// quote id to redeem after payment
    pub id: String,
    /// BOLT-11 invoice to pay to fund the mint
    pub invoice: String,
}

/// A quote for melting (spending) proofs to pay a Lightning invoice.
#[derive(Debug, Clone)]
pub struct MeltQuote {
    /// quote id to execute the melt
    pub id: String,
    /// total amount, including `fee_reserve`, that will be drawn
    pub amount: u64,
    /// routing fee reserve included in `amount`
    pub fee_reserve: u64,
}

/// The wallet crypto operations the Wallet Gateway composes into the
/// higher-level operations spec.md names (receive/send/swap/pay-LNURL).
#[async_trait]
pub trait CashuWalletBackend: Send + Sync {
    /// Verify and claim a token's proofs into this wallet's own keyset,
    /// returning the amount actually claimed (after any mint swap fee).
    async fn verify_and_claim(&self, mint_url: &str, unit: &str, token: &str) -> Result<u64, CommonError>;

    /// Select and serialize `amount` worth of this wallet's proofs into a
    /// new token string, marking the selected proofs as spent/reserved.
    async fn send_token(&self, mint_url: &str, unit: &str, amount: u64) -> Result<String, CommonError>;

    /// Request a mint quote for `amount` at `mint_url`.
    async fn request_mint_quote(&self, mint_url: &str, unit: &str, amount: u64) -> Result<MintQuote, CommonError>;

    /// Redeem a paid mint quote into this wallet's proofs.
    async fn mint_from_quote(&self, mint_url: &str, unit: &str, quote: &MintQuote) -> Result<u64, CommonError>;

    /// Request a melt quote to pay `invoice` from this wallet's proofs.
    async fn request_melt_quote(&self, mint_url: &str, unit: &str, invoice: &str) -> Result<MeltQuote, CommonError>;

    /// Execute a melt quote, paying the invoice from this wallet's proofs.
    /// Returns the amount actually paid out (invoice amount, excluding the
    /// unused portion of the fee reserve).
    async fn melt(&self, mint_url: &str, unit: &str, quote: &MeltQuote) -> Result<u64, CommonError>;

    /// Current spendable balance this wallet holds at `mint_url` in `unit`.
    async fn balance(&self, mint_url: &str, unit: &str) -> Result<u64, CommonError>;
}
