//! Background workers: the periodic operator payout sweep and the key
//! expiry sweep. The pricing refresh loop lives in
//! `routstr_pricing::PricingCatalog` itself; this module only hosts loops
//! that need the wallet gateway and the ledger together.

use std::time::Duration;

use routstr_ledger::LedgerStore;
use routstr_wallet::{CashuWalletBackend, WalletGateway};
use tracing::{error, info, warn};

use crate::state::ProxyConfig;

/// Sweep any wallet balance above the aggregate user balance for
/// (primary mint, unit) out to the operator's Lightning Address, every 5
/// minutes, for as long as `shutdown` has not fired. Units below 210 sat
/// (210,000 msat) of surplus are left alone rather than swept for dust.
pub async fn run_payout_loop<S, B>(
    store: S,
    wallet: std::sync::Arc<WalletGateway<B>>,
    http: reqwest::Client,
    config: std::sync::Arc<ProxyConfig>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) where
    S: LedgerStore,
    B: CashuWalletBackend,
{
    let Some(payout_address) = config.receive_ln_address.clone() else {
        info!("no payout address configured, payout worker disabled");
        return;
    };

    loop {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(5 * 60)) => {}
            _ = shutdown.changed() => break,
        }

        for unit in ["sat", "msat"] {
            let result = sweep_once(&store, &wallet, &http, &config, &payout_address, unit).await;
            if let Err(err) = result {
                error!(%err, unit, "payout sweep failed");
            }
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    }
}

async fn sweep_once<S, B>(
    store: &S,
    wallet: &WalletGateway<B>,
    http: &reqwest::Client,
    config: &ProxyConfig,
    payout_address: &str,
    unit: &str,
) -> Result<(), routstr_common::Error>
where
    S: LedgerStore,
    B: CashuWalletBackend,
{
    let wallet_balance = wallet.get_balance(&config.primary_mint_url, unit).await?;
    let user_balance_msats = store.total_user_balance().await;
    let user_balance = if unit == "msat" { user_balance_msats } else { user_balance_msats / 1000 };

    let available = wallet_balance.saturating_sub(user_balance);
    let min_amount = if unit == "sat" { 210 } else { 210_000 };
    if available <= min_amount {
        return Ok(());
    }

    let paid = wallet
        .send_to_lnurl(http, &config.primary_mint_url, unit, available, payout_address)
        .await?;
    info!(amount = paid, unit, "swept surplus balance to operator payout address");
    Ok(())
}

/// Sweep expired keys every 10 minutes: expiry is advisory and never
/// blocks auth at resolve time, so a key keeps authenticating right up
/// until this loop gets to it. A key is only touched once it is past its
/// `key_expiry_time`, still carries a balance, and has a refund address on
/// file — otherwise there is nowhere to send the money, so it is left
/// alone rather than silently zeroed.
pub async fn run_expiry_sweep_loop<S, B>(
    store: S,
    wallet: std::sync::Arc<WalletGateway<B>>,
    http: reqwest::Client,
    config: std::sync::Arc<ProxyConfig>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) where
    S: LedgerStore,
    B: CashuWalletBackend,
{
    loop {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(10 * 60)) => {}
            _ = shutdown.changed() => break,
        }

        let now = match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
            Ok(d) => d.as_secs() as i64,
            Err(_) => continue,
        };

        for key in store.all_keys().await {
            if key.balance == 0 || !key.is_expired(now) {
                continue;
            }
            let Some(address) = key.refund_address.clone() else {
                continue;
            };
            let currency = key.refund_currency.clone().unwrap_or_else(|| "sat".to_string());
            let mint = key.refund_mint_url.clone().unwrap_or_else(|| config.primary_mint_url.clone());
            let amount = if currency == "sat" { key.balance / 1000 } else { key.balance };

            match wallet.send_to_lnurl(&http, &mint, &currency, amount, &address).await {
                Ok(paid) => {
                    let _ = store.drain_and_delete(&key.hashed_key).await;
                    info!(hashed_key = %key.hashed_key, amount = paid, "refunded and cleared expired key");
                }
                Err(err) => warn!(%err, hashed_key = %key.hashed_key, "expiry refund failed, will retry next sweep"),
            }
        }
    }
}
