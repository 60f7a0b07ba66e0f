//! An in-memory `CashuWalletBackend` that fabricates successful quotes and
//! invoices instead of talking to a real mint. Grounded on
//! `cdk-fake-wallet`, the teacher's own stand-in Lightning backend used for
//! testing the rest of the stack without a live node; this plays the same
//! role for the Wallet Gateway's capability seam.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use routstr_common::error::Error as CommonError;

use crate::backend::{CashuWalletBackend, MeltQuote, MintQuote};

/// Fabricated balances keyed by `(mint_url, unit)`. Every `verify_and_claim`
/// simply credits the amount encoded in the token by `routstr_wallet::token`
/// (the real DHKE verification this stands in for lives behind the trait).
pub struct FakeCashuBackend {
    balances: Mutex<HashMap<(String, String), u64>>,
    quote_counter: AtomicU64,
}

impl Default for FakeCashuBackend {
    fn default() -> Self {
        FakeCashuBackend {
            balances: Mutex::new(HashMap::new()),
            quote_counter: AtomicU64::new(0),
        }
    }
}

impl FakeCashuBackend {
    /// A fresh backend with no balance anywhere.
    pub fn new() -> Self {
        Self::default()
    }

    fn next_quote_id(&self) -> String {
        let n = self.quote_counter.fetch_add(1, Ordering::SeqCst);
        format!("fake-quote-{n}")
    }
}

#[async_trait]
impl CashuWalletBackend for FakeCashuBackend {
    async fn verify_and_claim(&self, mint_url: &str, unit: &str, token: &str) -> Result<u64, CommonError> {
        let parsed = crate::token::parse(token).map_err(|e| CommonError::Wallet(e.to_string()))?;
        let mut balances = self.balances.lock().expect("lock poisoned");
        *balances.entry((mint_url.to_string(), unit.to_string())).or_insert(0) += parsed.amount;
        Ok(parsed.amount)
    }

    async fn send_token(&self, mint_url: &str, unit: &str, amount: u64) -> Result<String, CommonError> {
        let mut balances = self.balances.lock().expect("lock poisoned");
        let entry = balances.entry((mint_url.to_string(), unit.to_string())).or_insert(0);
        if *entry < amount {
            return Err(CommonError::Wallet("insufficient wallet balance".to_string()));
        }
        *entry -= amount;
        Ok(format!("cashuA-fake-{amount}-{unit}"))
    }

    async fn request_mint_quote(&self, _mint_url: &str, _unit: &str, amount: u64) -> Result<MintQuote, CommonError> {
        Ok(MintQuote {
            id: self.next_quote_id(),
            invoice: format!("lnbc{amount}fake"),
        })
    }

    async fn mint_from_quote(&self, mint_url: &str, unit: &str, quote: &MintQuote) -> Result<u64, CommonError> {
        let amount: u64 = quote
            .invoice
            .trim_start_matches("lnbc")
            .trim_end_matches("fake")
            .parse()
            .unwrap_or(0);
        let mut balances = self.balances.lock().expect("lock poisoned");
        *balances.entry((mint_url.to_string(), unit.to_string())).or_insert(0) += amount;
        Ok(amount)
    }

    async fn request_melt_quote(&self, _mint_url: &str, _unit: &str, invoice: &str) -> Result<MeltQuote, CommonError> {
        let amount: u64 = invoice
            .trim_start_matches("lnbc")
            .trim_end_matches("fake")
            .parse()
            .unwrap_or(0);
        Ok(MeltQuote {
            id: self.next_quote_id(),
            amount,
            fee_reserve: 0,
        })
    }

    async fn melt(&self, mint_url: &str, unit: &str, quote: &MeltQuote) -> Result<u64, CommonError> {
        let mut balances = self.balances.lock().expect("lock poisoned");
        let entry = balances.entry((mint_url.to_string(), unit.to_string())).or_insert(0);
        *entry = entry.saturating_sub(quote.amount);
        Ok(quote.amount)
    }

    async fn balance(&self, mint_url: &str, unit: &str) -> Result<u64, CommonError> {
        let balances = self.balances.lock().expect("lock poisoned");
        Ok(*balances.get(&(mint_url.to_string(), unit.to_string())).unwrap_or(&0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

    fn base64_encode(bytes: &[u8]) -> String {
        let mut out = String::new();
        let mut bits: u32 = 0;
        let mut bit_count = 0u32;
        for &b in bytes {
            bits = (bits << 8) | b as u32;
            bit_count += 8;
            while bit_count >= 6 {
                bit_count -= 6;
                out.push(ALPHABET[((bits >> bit_count) & 0x3f) as usize] as char);
            }
        }
        if bit_count > 0 {
            out.push(ALPHABET[((bits << (6 - bit_count)) & 0x3f) as usize] as char);
        }
        out
    }

    #[tokio::test]
    async fn claiming_a_token_credits_the_fabricated_balance() {
        let backend = FakeCashuBackend::new();
        let json = r#"{"token":[{"mint":"https://m","proofs":[{"amount":21,"id":"00","secret":"s","C":"c"}]}],"unit":"sat"}"#;
        let token = format!("cashuA{}", base64_encode(json.as_bytes()));
        let amount = backend.verify_and_claim("https://m", "sat", &token).await.unwrap();
        assert_eq!(amount, 21);
        assert_eq!(backend.balance("https://m", "sat").await.unwrap(), 21);
    }
}
