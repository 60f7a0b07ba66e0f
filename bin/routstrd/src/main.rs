//! routstrd: wires the Key/Balance Ledger, Pricing Model Catalog, Wallet
//! Gateway, and Proxy Engine together behind one axum server, the way
//! `cdk_mintd::run_mintd` wires the mint's own components together.

mod cli;
mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use routstr_common::model::Model;
use routstr_ledger::{AuthResolver, MemoryLedgerStore, PaymentStateMachine};
use routstr_pricing::{HttpModelSource, ModelSource, OracleError, PricingCatalog};
use routstr_proxy::{AppState, GatewayRedeemer, ProxyConfig};
use routstr_wallet::{FakeCashuBackend, WalletGateway};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

use cli::CliArgs;
use config::{Settings, ENV_WORK_DIR};

/// `--work-dir`, then `ROUTSTR_WORK_DIR`, then `~/.routstrd`. Only used to
/// locate the rotating log file `setup_tracing` writes alongside stdout;
/// the ledger and pricing catalog are in-memory and carry no state here.
fn work_dir(args: &CliArgs) -> Result<PathBuf> {
    let dir = if let Some(dir) = &args.work_dir {
        dir.clone()
    } else if let Ok(dir) = std::env::var(ENV_WORK_DIR) {
        PathBuf::from(dir)
    } else {
        home::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?.join(".routstrd")
    };
    std::fs::create_dir_all(&dir).with_context(|| format!("failed to create work dir {}", dir.display()))?;
    Ok(dir)
}

/// Initializes the global subscriber: always to stderr, plus a daily
/// rotating file under `<work_dir>/logs` once `work_dir` is resolved. The
/// returned guard must be held for the program's lifetime or the
/// non-blocking file writer stops flushing.
fn setup_tracing(work_dir: &Path) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hyper=warn,reqwest=warn,h2=warn,tower_http=warn"));

    let logs_dir = work_dir.join("logs");
    std::fs::create_dir_all(&logs_dir).with_context(|| format!("failed to create logs dir {}", logs_dir.display()))?;
    let file_appender = rolling::daily(&logs_dir, "routstrd.log");
    let (non_blocking_appender, guard) = non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr.and(non_blocking_appender))
        .init();

    Ok(guard)
}

/// Reads a local JSON model listing, for operators who pin pricing rather
/// than trusting the upstream's own `/models` response.
struct FileModelSource {
    path: PathBuf,
}

#[async_trait::async_trait]
impl ModelSource for FileModelSource {
    async fn fetch_models(&self) -> Result<Vec<Model>, OracleError> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|_| OracleError)?;
        serde_json::from_slice(&bytes).map_err(|_| OracleError)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    let dir = work_dir(&args)?;
    let _log_guard = setup_tracing(&dir)?;
    tracing::info!(work_dir = %dir.display(), "routstrd starting");

    let settings = Settings::load(args.config).context("failed to load settings")?;

    if settings.mints.trusted_mints.is_empty() {
        anyhow::bail!("CASHU_MINTS must name at least one mint");
    }

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(120))
        .build()
        .context("failed to build HTTP client")?;

    let store = MemoryLedgerStore::new();

    // The real Cashu DHKE/mint-protocol implementation lives behind
    // `CashuWalletBackend`; `FakeCashuBackend` stands in for it here so the
    // rest of the stack (ledger, pricing, proxy) runs end to end without a
    // live mint connection.
    let backend = FakeCashuBackend::new();
    let wallet = Arc::new(WalletGateway::new(
        backend,
        settings.mints.trusted_mints.clone(),
        settings.mints.primary_mint_url(),
    ));

    let pricing = Arc::new(PricingCatalog::new(settings.pricing.min_request_msat));
    bootstrap_pricing(&pricing, &settings, &http).await?;

    let redeemer = GatewayRedeemer::new(wallet.clone());
    let auth = Arc::new(AuthResolver::new(store.clone(), redeemer));
    let payments = Arc::new(PaymentStateMachine::new(store.clone()));

    let proxy_config = Arc::new(ProxyConfig {
        upstream_base_url: settings.upstream.base_url.clone(),
        upstream_api_key: settings.upstream.api_key.clone(),
        cors_origins: settings.info.cors_origins.clone(),
        trusted_mints: settings.mints.trusted_mints.clone(),
        primary_mint_url: settings.mints.primary_mint_url(),
        primary_unit: "sat".to_string(),
        receive_ln_address: settings.mints.receive_ln_address.clone(),
        min_request_msat: settings.pricing.min_request_msat,
        refund_cache_ttl: Duration::from_secs(settings.info.refund_cache_ttl_seconds),
    });

    let state = AppState {
        payments,
        auth,
        pricing: pricing.clone(),
        wallet: wallet.clone(),
        http: http.clone(),
        config: proxy_config.clone(),
        refund_cache: Arc::new(tokio::sync::Mutex::new(routstr_proxy::refund_cache::RefundCache::new())),
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    if settings.pricing.enable_refresh {
        let pricing = pricing.clone();
        let http = http.clone();
        let fees = routstr_pricing::FeeSchedule {
            exchange_fee: settings.pricing.exchange_fee,
            upstream_provider_fee: settings.pricing.upstream_provider_fee,
        };
        let interval = Duration::from_secs(settings.pricing.refresh_interval_seconds);
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            pricing.run_pricing_refresh_loop(http, fees, interval, shutdown_rx).await;
        });
    }

    {
        let store = store.clone();
        let wallet = wallet.clone();
        let http = http.clone();
        let proxy_config = proxy_config.clone();
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(routstr_proxy::workers::run_payout_loop(store, wallet, http, proxy_config, shutdown_rx));
    }

    {
        let store = store.clone();
        let wallet = wallet.clone();
        let http = http.clone();
        let proxy_config = proxy_config.clone();
        tokio::spawn(routstr_proxy::workers::run_expiry_sweep_loop(
            store,
            wallet,
            http,
            proxy_config,
            shutdown_rx,
        ));
    }

    let router = routstr_proxy::build(state);

    let addr = format!("{}:{}", settings.info.listen_host, settings.info.listen_port);
    let listener = tokio::net::TcpListener::bind(&addr).await.context("failed to bind listener")?;
    tracing::info!(%addr, "routstrd listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server exited with an error")?;

    let _ = shutdown_tx.send(true);
    tracing::info!("routstrd shutdown");
    Ok(())
}

async fn bootstrap_pricing(pricing: &PricingCatalog, settings: &Settings, http: &reqwest::Client) -> Result<()> {
    if let Some(path) = &settings.pricing.models_path {
        let source = FileModelSource { path: path.clone() };
        pricing.bootstrap(&source).await.context("failed to bootstrap pricing catalog from file")?;
        return Ok(());
    }
    let models_url = format!("{}/v1/models", settings.upstream.base_url);
    let source = HttpModelSource::new(http.clone(), models_url);
    pricing.bootstrap(&source).await.context("failed to bootstrap pricing catalog from upstream")?;
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.expect("failed to install CTRL+C handler");
    tracing::info!("shutdown signal received");
}
