//! Shared application state threaded through every axum handler, the way
//! `cdk_axum::MintState` threads the mint through the mint's handlers.

use std::sync::Arc;

use async_trait::async_trait;
use routstr_common::error::Error as CommonError;
use routstr_ledger::{AuthResolver, EcashRedeemer, LedgerStore, PaymentStateMachine};
use routstr_pricing::PricingCatalog;
use routstr_wallet::{CashuWalletBackend, WalletGateway};
use tokio::sync::Mutex;

use crate::refund_cache::RefundCache;

/// Runtime configuration the proxy needs, independent of how the binary
/// sourced it (file, env, defaults) — see `bin/routstrd/src/config.rs`.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// base URL of the upstream OpenAI-compatible API, no trailing slash
    pub upstream_base_url: String,
    /// API key forwarded to upstream, if it requires one
    pub upstream_api_key: Option<String>,
    /// allowed CORS origins; empty means "allow any"
    pub cors_origins: Vec<String>,
    /// mints this operator trusts and claims tokens from directly
    pub trusted_mints: Vec<String>,
    /// the mint this operator settles foreign-mint swaps and payouts into
    pub primary_mint_url: String,
    /// unit the primary mint operates in, almost always `"sat"`
    pub primary_unit: String,
    /// operator's payout destination (Lightning Address or LNURL)
    pub receive_ln_address: Option<String>,
    /// floor applied to every model's max cost, msats
    pub min_request_msat: u64,
    /// refund idempotency cache TTL
    pub refund_cache_ttl: std::time::Duration,
}

/// Adapts a [`WalletGateway`] to the [`EcashRedeemer`] seam the ledger's
/// `AuthResolver` depends on, converting the gateway's sat/msat-denominated
/// result into the msats the ledger always stores.
pub struct GatewayRedeemer<B> {
    gateway: Arc<WalletGateway<B>>,
}

impl<B> GatewayRedeemer<B> {
    /// Wrap a gateway for use as an `EcashRedeemer`.
    pub fn new(gateway: Arc<WalletGateway<B>>) -> Self {
        GatewayRedeemer { gateway }
    }
}

#[async_trait]
impl<B: CashuWalletBackend + Send + Sync> EcashRedeemer for GatewayRedeemer<B> {
    async fn redeem(&self, token: &str) -> Result<u64, CommonError> {
        let received = self.gateway.receive_token(token).await?;
        Ok(if received.unit == "msat" {
            received.amount
        } else {
            received.amount * 1000
        })
    }
}

/// Everything a handler needs: the ledger, the pricing catalog, the wallet
/// gateway, an HTTP client for upstream/LNURL calls, and the refund cache.
///
/// `Clone` is implemented by hand rather than derived: every field is
/// already behind an `Arc` (or is itself cheaply `Clone`), so cloning this
/// state never requires `S` or `B` themselves to be `Clone` — a bound
/// `#[derive(Clone)]` would otherwise impose on both type parameters.
pub struct AppState<S: LedgerStore, B> {
    /// the Payment State Machine, wired to the ledger store
    pub payments: Arc<PaymentStateMachine<S>>,
    /// the Auth Resolver, wired to the same store plus the wallet gateway
    pub auth: Arc<AuthResolver<S, GatewayRedeemer<B>>>,
    /// the model/pricing catalog
    pub pricing: Arc<PricingCatalog>,
    /// the wallet gateway, also reused directly by refund/payout handlers
    pub wallet: Arc<WalletGateway<B>>,
    /// outbound HTTP client, reused for upstream forwarding and LNURL calls
    pub http: reqwest::Client,
    /// static configuration
    pub config: Arc<ProxyConfig>,
    /// in-memory refund idempotency cache
    pub refund_cache: Arc<Mutex<RefundCache>>,
}

impl<S: LedgerStore + Clone, B: CashuWalletBackend> AppState<S, B> {
    /// Directly expose the ledger store for handlers that need raw
    /// get/credit/drain access outside the state machine (balance info,
    /// topup, refund).
    pub fn store(&self) -> &S {
        self.payments.store()
    }
}

impl<S: LedgerStore, B> Clone for AppState<S, B> {
    fn clone(&self) -> Self {
        AppState {
            payments: self.payments.clone(),
            auth: self.auth.clone(),
            pricing: self.pricing.clone(),
            wallet: self.wallet.clone(),
            http: self.http.clone(),
            config: self.config.clone(),
            refund_cache: self.refund_cache.clone(),
        }
    }
}
