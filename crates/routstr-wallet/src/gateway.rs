//! `WalletGateway`: the orchestration layer spec.md's Wallet Gateway
//! component actually asks for, composed from [`CashuWalletBackend`] calls
//! the way the original wallet module composes them from its own wallet
//! object.

use routstr_common::error::Error as CommonError;
use tracing::{debug, instrument};

use crate::backend::CashuWalletBackend;
use crate::lnurl;
use crate::token;

/// The result of successfully receiving a deposited token.
#[derive(Debug, Clone)]
pub struct ReceivedToken {
    /// amount credited, in `unit`
    pub amount: u64,
    /// currency unit credited in
    pub unit: String,
    /// mint the credited proofs now live at
    pub mint_url: String,
}

/// Orchestrates deposits, withdrawals, and LNURL payouts against a
/// [`CashuWalletBackend`] and a set of mints this operator trusts as its
/// primary settlement mints.
pub struct WalletGateway<B> {
    backend: B,
    trusted_mints: Vec<String>,
    primary_mint_url: String,
}

impl<B: CashuWalletBackend> WalletGateway<B> {
    /// `trusted_mints` are mints whose tokens are claimed directly without a
    /// swap; anything else is swapped into `primary_mint_url` on receipt.
    pub fn new(backend: B, trusted_mints: Vec<String>, primary_mint_url: String) -> Self {
        WalletGateway {
            backend,
            trusted_mints,
            primary_mint_url,
        }
    }

    /// Current balance held at `mint_url` in `unit`.
    pub async fn get_balance(&self, mint_url: &str, unit: &str) -> Result<u64, CommonError> {
        self.backend.balance(mint_url, unit).await
    }

    /// Receive a deposited token. Tokens from a trusted mint are claimed
    /// in place; tokens from any other mint are swapped into the primary
    /// mint first (paying the Lightning routing fee out of the deposit).
    #[instrument(skip(self, raw_token))]
    pub async fn receive_token(&self, raw_token: &str) -> Result<ReceivedToken, CommonError> {
        let parsed = token::parse(raw_token).map_err(|e| CommonError::Wallet(e.to_string()))?;

        if self.trusted_mints.iter().any(|m| m == &parsed.mint_url) {
            let amount = self
                .backend
                .verify_and_claim(&parsed.mint_url, &parsed.unit, raw_token)
                .await?;
            return Ok(ReceivedToken {
                amount,
                unit: parsed.unit,
                mint_url: parsed.mint_url,
            });
        }

        debug!(mint = %parsed.mint_url, "untrusted mint, swapping to primary");
        self.swap_to_primary_mint(raw_token, &parsed).await
    }

    /// Swap a foreign-mint token into the primary mint, net of the
    /// Lightning routing fee estimate.
    async fn swap_to_primary_mint(
        &self,
        raw_token: &str,
        parsed: &token::ParsedToken,
    ) -> Result<ReceivedToken, CommonError> {
        let amount_msat = if parsed.unit == "msat" {
            parsed.amount
        } else {
            parsed.amount * 1000
        };
        let fee_msat = lnurl::estimated_fee_msat(amount_msat);
        let net_msat = amount_msat.saturating_sub(fee_msat);
        let net_sat = net_msat / 1000;
        if net_sat == 0 {
            return Err(CommonError::TokenTooSmall {
                amount: amount_msat,
                minimum: fee_msat,
            });
        }

        self.backend
            .verify_and_claim(&parsed.mint_url, &parsed.unit, raw_token)
            .await?;

        let quote = self
            .backend
            .request_mint_quote(&self.primary_mint_url, "sat", net_sat)
            .await?;
        let melt_quote = self
            .backend
            .request_melt_quote(&parsed.mint_url, &parsed.unit, &quote.invoice)
            .await?;
        self.backend.melt(&parsed.mint_url, &parsed.unit, &melt_quote).await?;
        let minted = self.backend.mint_from_quote(&self.primary_mint_url, "sat", &quote).await?;

        Ok(ReceivedToken {
            amount: minted,
            unit: "sat".to_string(),
            mint_url: self.primary_mint_url.clone(),
        })
    }

    /// Serialize `amount` worth of this wallet's `unit` proofs at
    /// `mint_url` into a token string.
    pub async fn send_token(&self, mint_url: &str, unit: &str, amount: u64) -> Result<String, CommonError> {
        self.backend.send_token(mint_url, unit, amount).await
    }

    /// Pay `amount` (in `unit`) to an LNURL target, returning the amount
    /// actually paid out after the routing fee reserve.
    #[instrument(skip(self, client))]
    pub async fn send_to_lnurl(
        &self,
        client: &reqwest::Client,
        mint_url: &str,
        unit: &str,
        amount: u64,
        lnurl: &str,
    ) -> Result<u64, CommonError> {
        let amount_msat = if unit == "msat" { amount } else { amount * 1000 };
        let amount_msat = amount_msat - (amount_msat % 1000);

        let pay_url = lnurl::decode_lnurl(lnurl).map_err(|e| CommonError::Wallet(e.to_string()))?;
        let pay_data = lnurl::fetch_pay_data(client, &pay_url)
            .await
            .map_err(|e| CommonError::Wallet(e.to_string()))?;

        let fee_msat = lnurl::estimated_fee_msat(amount_msat);
        let final_amount_msat = amount_msat.saturating_sub(fee_msat);
        lnurl::validate_amount(&pay_data, final_amount_msat).map_err(|e| CommonError::Wallet(e.to_string()))?;

        let invoice = lnurl::request_invoice(client, &pay_data.callback, final_amount_msat)
            .await
            .map_err(|e| CommonError::Wallet(e.to_string()))?;

        let melt_quote = self.backend.request_melt_quote(mint_url, unit, &invoice).await?;
        self.backend.melt(mint_url, unit, &melt_quote).await?;

        Ok(final_amount_msat / if unit == "msat" { 1 } else { 1000 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MeltQuote, MintQuote};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct FakeBackend {
        claimed: AtomicU64,
    }

    #[async_trait]
    impl CashuWalletBackend for FakeBackend {
        async fn verify_and_claim(&self, _mint_url: &str, _unit: &str, _token: &str) -> Result<u64, CommonError> {
            self.claimed.store(1000, Ordering::SeqCst);
            Ok(1000)
        }

        async fn send_token(&self, _mint_url: &str, _unit: &str, amount: u64) -> Result<String, CommonError> {
            Ok(format!("cashuAtoken-for-{amount}"))
        }

        async fn request_mint_quote(&self, _mint_url: &str, _unit: &str, amount: u64) -> Result<MintQuote, CommonError> {
            Ok(MintQuote {
                id: "quote1".to_string(),
                invoice: format!("lnbc{amount}"),
            })
        }

        async fn mint_from_quote(&self, _mint_url: &str, _unit: &str, _quote: &MintQuote) -> Result<u64, CommonError> {
            Ok(985)
        }

        async fn request_melt_quote(&self, _mint_url: &str, _unit: &str, _invoice: &str) -> Result<MeltQuote, CommonError> {
            Ok(MeltQuote {
                id: "melt1".to_string(),
                amount: 1000,
                fee_reserve: 15,
            })
        }

        async fn melt(&self, _mint_url: &str, _unit: &str, _quote: &MeltQuote) -> Result<u64, CommonError> {
            Ok(985)
        }

        async fn balance(&self, _mint_url: &str, _unit: &str) -> Result<u64, CommonError> {
            Ok(self.claimed.load(Ordering::SeqCst))
        }
    }

    fn token_for(mint: &str) -> String {
        let json = format!(r#"{{"token":[{{"mint":"{mint}","proofs":[{{"amount":1000,"id":"00","secret":"s","C":"c"}}]}}],"unit":"sat"}}"#);
        let mut out = String::new();
        let mut bits: u32 = 0;
        let mut bit_count = 0u32;
        for &b in json.as_bytes() {
            bits = (bits << 8) | b as u32;
            bit_count += 8;
            while bit_count >= 6 {
                bit_count -= 6;
                const ALPHA: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";
                out.push(ALPHA[((bits >> bit_count) & 0x3f) as usize] as char);
            }
        }
        format!("cashuA{out}")
    }

    #[tokio::test]
    async fn receiving_from_a_trusted_mint_claims_in_place() {
        let gateway = WalletGateway::new(
            FakeBackend::default(),
            vec!["https://trusted.example".to_string()],
            "https://primary.example".to_string(),
        );
        let token = token_for("https://trusted.example");
        let received = gateway.receive_token(&token).await.unwrap();
        assert_eq!(received.amount, 1000);
        assert_eq!(received.mint_url, "https://trusted.example");
    }

    #[tokio::test]
    async fn receiving_from_an_untrusted_mint_swaps_to_primary() {
        let gateway = WalletGateway::new(
            FakeBackend::default(),
            vec!["https://trusted.example".to_string()],
            "https://primary.example".to_string(),
        );
        let token = token_for("https://foreign.example");
        let received = gateway.receive_token(&token).await.unwrap();
        assert_eq!(received.mint_url, "https://primary.example");
        assert_eq!(received.unit, "sat");
        assert_eq!(received.amount, 985);
    }
}
