//! Runtime settings: a config-file layer (via the `config` crate) with
//! every field overridable by an environment variable, the way
//! `cdk_mintd::config::Settings` layers `CDK_MINTD_*` vars over
//! `config.toml`. Every field here traces back to an environment variable
//! spec.md §6 names, plus a handful this daemon's ambient stack adds
//! (pricing refresh cadence, the msat admission floor).

use std::env;
use std::path::PathBuf;

use config::{Config, ConfigError, File};
use serde::{Deserialize, Serialize};

pub const ENV_WORK_DIR: &str = "ROUTSTR_WORK_DIR";

fn env_str(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_str(name).and_then(|v| v.parse().ok())
}

/// Upstream OpenAI-compatible API this daemon proxies to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upstream {
    /// `UPSTREAM_BASE_URL`, no trailing slash
    pub base_url: String,
    /// `UPSTREAM_API_KEY`, forwarded as a bearer if the upstream needs one
    pub api_key: Option<String>,
}

impl Default for Upstream {
    fn default() -> Self {
        Upstream {
            base_url: "https://openrouter.ai/api".to_string(),
            api_key: None,
        }
    }
}

/// Mint and payout configuration for the Wallet Gateway.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Mints {
    /// `CASHU_MINTS`, comma-separated; the first is the primary settlement mint
    pub trusted_mints: Vec<String>,
    /// `RECEIVE_LN_ADDRESS`, where the payout worker sweeps operator surplus
    pub receive_ln_address: Option<String>,
}

impl Mints {
    pub fn primary_mint_url(&self) -> String {
        self.trusted_mints.first().cloned().unwrap_or_default()
    }
}

/// Fixed, non-oracle-driven pricing, used instead of the model catalog when
/// `fixed_pricing` is set.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FixedPricing {
    /// `FIXED_PRICING`
    pub enabled: bool,
    /// `FIXED_COST_PER_REQUEST`, sats
    pub cost_per_request: Option<f64>,
    /// `FIXED_PER_1K_INPUT_TOKENS`, sats
    pub per_1k_input_tokens: Option<f64>,
    /// `FIXED_PER_1K_OUTPUT_TOKENS`, sats
    pub per_1k_output_tokens: Option<f64>,
}

/// Exchange-rate oracle fee multipliers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pricing {
    /// `EXCHANGE_FEE`
    pub exchange_fee: f64,
    /// `UPSTREAM_PROVIDER_FEE`
    pub upstream_provider_fee: f64,
    /// `MIN_REQUEST_MSAT`, the floor applied to every model's max cost
    pub min_request_msat: u64,
    /// `PRICING_REFRESH_INTERVAL_SECONDS`
    pub refresh_interval_seconds: u64,
    /// `ENABLE_PRICING_REFRESH`
    pub enable_refresh: bool,
    /// `MODELS_PATH`, an optional local JSON listing to bootstrap from
    /// instead of the upstream's own `/models` endpoint
    pub models_path: Option<PathBuf>,
}

impl Default for Pricing {
    fn default() -> Self {
        Pricing {
            exchange_fee: 1.005,
            upstream_provider_fee: 1.05,
            min_request_msat: 1000,
            refresh_interval_seconds: 5 * 60,
            enable_refresh: true,
            models_path: None,
        }
    }
}

/// Server bind address, CORS, and the admin password used by the
/// not-yet-built operator endpoints spec.md leaves as an Open Question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Info {
    pub listen_host: String,
    pub listen_port: u16,
    /// `CORS_ORIGINS`, comma-separated; empty means allow any
    pub cors_origins: Vec<String>,
    /// `ADMIN_PASSWORD`, gates operator-only surfaces
    pub admin_password: Option<String>,
    /// `TOR_PROXY_URL`, routed through for LNURL/model-listing egress when set
    pub tor_proxy_url: Option<String>,
    /// `REFUND_CACHE_TTL_SECONDS`
    pub refund_cache_ttl_seconds: u64,
    /// `DATABASE_URL`; `MemoryLedgerStore` is used when unset
    pub database_url: Option<String>,
}

impl Default for Info {
    fn default() -> Self {
        Info {
            listen_host: "127.0.0.1".to_string(),
            listen_port: 3333,
            cors_origins: Vec::new(),
            admin_password: None,
            tor_proxy_url: None,
            refund_cache_ttl_seconds: 300,
            database_url: None,
        }
    }
}

/// The full settings tree, loaded from `config.toml` and then overridden by
/// environment variables field by field.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub info: Info,
    #[serde(default)]
    pub upstream: Upstream,
    #[serde(default)]
    pub mints: Mints,
    #[serde(default)]
    pub pricing: Pricing,
    #[serde(default)]
    pub fixed_pricing: FixedPricing,
}

impl Settings {
    /// Load `config_path` (or an empty default) and apply every environment
    /// variable override on top.
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut settings = match config_path {
            Some(path) if path.exists() => {
                let config = Config::builder().add_source(File::from(path)).build()?;
                config.try_deserialize()?
            }
            _ => Settings::default(),
        };
        settings.apply_env();
        Ok(settings)
    }

    fn apply_env(&mut self) {
        if let Some(v) = env_str("UPSTREAM_BASE_URL") {
            self.upstream.base_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = env_str("UPSTREAM_API_KEY") {
            self.upstream.api_key = Some(v);
        }
        if let Some(v) = env_str("CASHU_MINTS") {
            self.mints.trusted_mints = v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }
        if let Some(v) = env_str("RECEIVE_LN_ADDRESS") {
            self.mints.receive_ln_address = Some(v);
        }
        if let Some(v) = env_str("ADMIN_PASSWORD") {
            self.info.admin_password = Some(v);
        }
        if let Some(v) = env_parsed::<bool>("FIXED_PRICING") {
            self.fixed_pricing.enabled = v;
        }
        if let Some(v) = env_parsed::<f64>("FIXED_COST_PER_REQUEST") {
            self.fixed_pricing.cost_per_request = Some(v);
        }
        if let Some(v) = env_parsed::<f64>("FIXED_PER_1K_INPUT_TOKENS") {
            self.fixed_pricing.per_1k_input_tokens = Some(v);
        }
        if let Some(v) = env_parsed::<f64>("FIXED_PER_1K_OUTPUT_TOKENS") {
            self.fixed_pricing.per_1k_output_tokens = Some(v);
        }
        if let Some(v) = env_parsed::<f64>("EXCHANGE_FEE") {
            self.pricing.exchange_fee = v;
        }
        if let Some(v) = env_parsed::<f64>("UPSTREAM_PROVIDER_FEE") {
            self.pricing.upstream_provider_fee = v;
        }
        if let Some(v) = env_str("CORS_ORIGINS") {
            self.info.cors_origins = v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }
        if let Some(v) = env_str("TOR_PROXY_URL") {
            self.info.tor_proxy_url = Some(v);
        }
        if let Some(v) = env_parsed::<u64>("REFUND_CACHE_TTL_SECONDS") {
            self.info.refund_cache_ttl_seconds = v;
        }
        if let Some(v) = env_str("MODELS_PATH") {
            self.pricing.models_path = Some(PathBuf::from(v));
        }
        if let Some(v) = env_str("DATABASE_URL") {
            self.info.database_url = Some(v);
        }
        if let Some(v) = env_parsed::<u64>("MIN_REQUEST_MSAT") {
            self.pricing.min_request_msat = v;
        }
        if let Some(v) = env_parsed::<u64>("PRICING_REFRESH_INTERVAL_SECONDS") {
            self.pricing.refresh_interval_seconds = v;
        }
        if let Some(v) = env_parsed::<bool>("ENABLE_PRICING_REFRESH") {
            self.pricing.enable_refresh = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_load_without_a_config_file() {
        let settings = Settings::load(None).unwrap();
        assert_eq!(settings.upstream.base_url, "https://openrouter.ai/api");
    }

    #[test]
    fn comma_lists_split_and_trim() {
        let mut settings = Settings::default();
        env::set_var("CASHU_MINTS", "https://a.example , https://b.example");
        settings.apply_env();
        env::remove_var("CASHU_MINTS");
        assert_eq!(settings.mints.trusted_mints, vec!["https://a.example", "https://b.example"]);
        assert_eq!(settings.mints.primary_mint_url(), "https://a.example");
    }
}
