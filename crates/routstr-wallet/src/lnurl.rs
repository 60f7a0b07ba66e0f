//! LNURL-pay resolution: decoding the several shapes an operator- or
//! holder-supplied payment target can take, fetching its payRequest
//! metadata, and requesting an invoice for a specific amount.

use std::str::FromStr;
use std::time::Duration;

use lightning_invoice::Bolt11Invoice;
use serde::Deserialize;
use thiserror::Error;
use tracing::instrument;

/// LNURL resolution/payment failure.
#[derive(Debug, Error)]
pub enum Error {
    /// Not a recognized LNURL shape.
    #[error("invalid lnurl: {0}")]
    InvalidFormat(String),
    /// A direct `https://` URL was required but not given.
    #[error("direct lnurl must use https")]
    NotHttps,
    /// The service's payRequest response was missing required fields.
    #[error("invalid lnurl service response: {0}")]
    InvalidResponse(String),
    /// The amount requested falls outside `[min_sendable, max_sendable]`.
    #[error("amount {amount} msat is outside the payable range {min}..={max} msat")]
    AmountOutOfRange { amount: u64, min: u64, max: u64 },
    /// HTTP transport failure talking to the LNURL service.
    #[error("lnurl request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The callback did not return a usable invoice.
    #[error("lnurl callback error: {0}")]
    CallbackError(String),
    /// The returned BOLT-11 invoice failed to parse.
    #[error("invalid bolt11 invoice: {0}")]
    InvalidInvoice(String),
}

/// A resolved payRequest's acceptable amount range and invoice callback.
#[derive(Debug, Clone)]
pub struct LnurlPayData {
    /// where to request an invoice for a specific amount
    pub callback: String,
    /// smallest payable amount, msats
    pub min_sendable: u64,
    /// largest payable amount, msats
    pub max_sendable: u64,
}

#[derive(Deserialize)]
struct PayRequestResponse {
    tag: Option<String>,
    callback: Option<String>,
    #[serde(rename = "minSendable")]
    min_sendable: Option<u64>,
    #[serde(rename = "maxSendable")]
    max_sendable: Option<u64>,
    reason: Option<String>,
}

#[derive(Deserialize)]
struct CallbackResponse {
    pr: Option<String>,
    reason: Option<String>,
}

/// Decode any of: `lightning:`-prefixed values, a Lightning Address
/// (`user@host`), a bech32 `lnurl1...` string, or a direct `https://` URL,
/// into the plain HTTPS URL to fetch the payRequest from.
pub fn decode_lnurl(input: &str) -> Result<String, Error> {
    let input = input.strip_prefix("lightning:").unwrap_or(input).trim();

    if input.matches('@').count() == 1 {
        let mut parts = input.splitn(2, '@');
        let user = parts.next().unwrap_or_default();
        let host = parts.next().unwrap_or_default();
        if user.is_empty() || host.is_empty() {
            return Err(Error::InvalidFormat(input.to_string()));
        }
        return Ok(format!("https://{host}/.well-known/lnurlp/{user}"));
    }

    if input.to_ascii_lowercase().starts_with("lnurl") {
        let (_hrp, data) = bech32::decode(input).map_err(|e| Error::InvalidFormat(e.to_string()))?;
        return String::from_utf8(data).map_err(|e| Error::InvalidFormat(e.to_string()));
    }

    if input.starts_with("https://") {
        return Ok(input.to_string());
    }

    Err(Error::NotHttps)
}

/// Fetch and validate the payRequest metadata at `url`.
#[instrument(skip(client))]
pub async fn fetch_pay_data(client: &reqwest::Client, url: &str) -> Result<LnurlPayData, Error> {
    let resp = client
        .get(url)
        .timeout(Duration::from_secs(10))
        .send()
        .await?
        .json::<PayRequestResponse>()
        .await?;

    if let Some(reason) = resp.reason {
        return Err(Error::InvalidResponse(reason));
    }
    if resp.tag.as_deref() != Some("payRequest") {
        return Err(Error::InvalidResponse("missing or wrong tag".to_string()));
    }
    let callback = resp
        .callback
        .ok_or_else(|| Error::InvalidResponse("missing callback".to_string()))?;

    Ok(LnurlPayData {
        callback,
        min_sendable: resp.min_sendable.unwrap_or(1_000),
        max_sendable: resp.max_sendable.unwrap_or(1_000_000_000),
    })
}

/// Request an invoice for `amount_msat` from a payRequest callback.
#[instrument(skip(client))]
pub async fn request_invoice(client: &reqwest::Client, callback: &str, amount_msat: u64) -> Result<String, Error> {
    let mut url = url::Url::parse(callback).map_err(|e| Error::InvalidFormat(e.to_string()))?;
    url.query_pairs_mut().append_pair("amount", &amount_msat.to_string());

    let resp = client.get(url).send().await?.json::<CallbackResponse>().await?;
    if let Some(reason) = resp.reason {
        return Err(Error::CallbackError(reason));
    }
    resp.pr.ok_or_else(|| Error::CallbackError("no invoice returned".to_string()))
}

/// Parse a BOLT-11 invoice's amount, converted to `unit` (`"sat"` or
/// `"msat"`).
pub fn invoice_amount(invoice: &str, unit: &str) -> Result<u64, Error> {
    let parsed = Bolt11Invoice::from_str(invoice).map_err(|e| Error::InvalidInvoice(e.to_string()))?;
    let msats = parsed
        .amount_milli_satoshis()
        .ok_or_else(|| Error::InvalidInvoice("invoice carries no amount".to_string()))?;
    Ok(if unit == "msat" { msats } else { msats / 1000 })
}

/// Validate `amount_msat` against a payRequest's sendable range.
pub fn validate_amount(data: &LnurlPayData, amount_msat: u64) -> Result<(), Error> {
    if amount_msat < data.min_sendable || amount_msat > data.max_sendable {
        return Err(Error::AmountOutOfRange {
            amount: amount_msat,
            min: data.min_sendable,
            max: data.max_sendable,
        });
    }
    Ok(())
}

/// Mint-side routing fee estimate for paying out `amount_msat`:
/// `max(ceil(amount_sat * 1%), 2 sat)`, expressed in msats.
pub fn estimated_fee_msat(amount_msat: u64) -> u64 {
    let amount_sat = amount_msat / 1000;
    let one_percent = (amount_sat as f64 * 0.01).ceil() as u64;
    one_percent.max(2) * 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_a_lightning_address() {
        let url = decode_lnurl("satoshi@bitcoin.org").unwrap();
        assert_eq!(url, "https://bitcoin.org/.well-known/lnurlp/satoshi");
    }

    #[test]
    fn strips_the_lightning_prefix() {
        let url = decode_lnurl("lightning:satoshi@bitcoin.org").unwrap();
        assert_eq!(url, "https://bitcoin.org/.well-known/lnurlp/satoshi");
    }

    #[test]
    fn passes_through_direct_https_urls() {
        let url = decode_lnurl("https://example.com/lnurlp/x").unwrap();
        assert_eq!(url, "https://example.com/lnurlp/x");
    }

    #[test]
    fn rejects_non_https_direct_urls() {
        assert!(matches!(decode_lnurl("http://example.com"), Err(Error::NotHttps)));
    }

    #[test]
    fn fee_estimate_floors_at_two_sats() {
        assert_eq!(estimated_fee_msat(10_000), 2000);
        assert_eq!(estimated_fee_msat(10_000_000), 101_000);
    }

    #[test]
    fn validates_amount_range() {
        let data = LnurlPayData {
            callback: "https://x".to_string(),
            min_sendable: 1000,
            max_sendable: 2000,
        };
        assert!(validate_amount(&data, 1500).is_ok());
        assert!(validate_amount(&data, 500).is_err());
        assert!(validate_amount(&data, 5000).is_err());
    }
}
