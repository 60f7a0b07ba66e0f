//! Exchange price oracle: the USD value of one satoshi, taken as the max of
//! three independent exchange feeds (a single stale-low feed should never
//! under-price a request), then padded by the exchange and upstream-provider
//! fee multipliers.

use thiserror::Error;

/// Oracle failure: none of the three feeds answered.
#[derive(Debug, Error)]
#[error("no exchange feed returned a price")]
pub struct OracleError;

/// Multiplier applied to the raw max exchange rate to account for the
/// round-trip cost of actually converting sats to USD.
#[derive(Debug, Clone, Copy)]
pub struct FeeSchedule {
    /// e.g. 1.005 for a 0.5% exchange spread
    pub exchange_fee: f64,
    /// e.g. 1.05 for the upstream LLM provider's own margin
    pub upstream_provider_fee: f64,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        FeeSchedule {
            exchange_fee: 1.005,
            upstream_provider_fee: 1.05,
        }
    }
}

async fn kraken_btc_usd(client: &reqwest::Client) -> Option<f64> {
    let resp = client
        .get("https://api.kraken.com/0/public/Ticker?pair=XBTUSD")
        .send()
        .await
        .ok()?;
    let body: serde_json::Value = resp.json().await.ok()?;
    body["result"]["XXBTZUSD"]["c"][0].as_str()?.parse().ok()
}

async fn coinbase_btc_usd(client: &reqwest::Client) -> Option<f64> {
    let resp = client
        .get("https://api.coinbase.com/v2/prices/BTC-USD/spot")
        .send()
        .await
        .ok()?;
    let body: serde_json::Value = resp.json().await.ok()?;
    body["data"]["amount"].as_str()?.parse().ok()
}

async fn binance_btc_usdt(client: &reqwest::Client) -> Option<f64> {
    let resp = client
        .get("https://api.binance.com/api/v3/ticker/price?symbol=BTCUSDT")
        .send()
        .await
        .ok()?;
    let body: serde_json::Value = resp.json().await.ok()?;
    body["price"].as_str()?.parse().ok()
}

/// The highest BTC/USD quote across Kraken, Coinbase, and Binance,
/// multiplied by the exchange and upstream-provider fee schedule.
pub async fn btc_usd_ask_price(client: &reqwest::Client, fees: FeeSchedule) -> Result<f64, OracleError> {
    let (kraken, coinbase, binance) = futures::join!(
        kraken_btc_usd(client),
        coinbase_btc_usd(client),
        binance_btc_usdt(client)
    );

    let quotes: Vec<f64> = [kraken, coinbase, binance].into_iter().flatten().collect();
    if quotes.is_empty() {
        return Err(OracleError);
    }
    let max = quotes.into_iter().fold(f64::MIN, f64::max);
    Ok(max * fees.exchange_fee * fees.upstream_provider_fee)
}

/// USD value of a single satoshi, used to convert USD-denominated model
/// pricing into sats.
pub async fn usd_per_sat(client: &reqwest::Client, fees: FeeSchedule) -> Result<f64, OracleError> {
    let btc_usd = btc_usd_ask_price(client, fees).await?;
    Ok(btc_usd / 100_000_000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_fee_schedule_matches_documented_defaults() {
        let fees = FeeSchedule::default();
        assert!((fees.exchange_fee - 1.005).abs() < f64::EPSILON);
        assert!((fees.upstream_provider_fee - 1.05).abs() < f64::EPSILON);
    }
}
