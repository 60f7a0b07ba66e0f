//! The Pricing Model Catalog: an in-memory cache of `Model` rows, bootstrapped
//! from a local file or an upstream model listing, with a background loop
//! that keeps the sats-denominated pricing fresh against the exchange
//! oracle, and a separate loop that discovers newly-published models without
//! ever overwriting ones already on file.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use routstr_common::model::{derive_max_cost, is_excluded_model_name, max_cost_msats, Model};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::oracle::{usd_per_sat, FeeSchedule, OracleError};

/// Where the catalog's model listing comes from on first boot and on each
/// periodic discovery pass.
#[async_trait::async_trait]
pub trait ModelSource: Send + Sync {
    /// Fetch the full upstream model listing.
    async fn fetch_models(&self) -> Result<Vec<Model>, OracleError>;
}

/// Fetches the OpenRouter-shaped model listing over HTTP.
pub struct HttpModelSource {
    client: reqwest::Client,
    url: String,
}

impl HttpModelSource {
    /// `url` is typically `https://openrouter.ai/api/v1/models`.
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        HttpModelSource { client, url: url.into() }
    }
}

#[async_trait::async_trait]
impl ModelSource for HttpModelSource {
    async fn fetch_models(&self) -> Result<Vec<Model>, OracleError> {
        #[derive(serde::Deserialize)]
        struct Envelope {
            data: Vec<Model>,
        }
        let resp = self.client.get(&self.url).send().await.map_err(|_| OracleError)?;
        let envelope: Envelope = resp.json().await.map_err(|_| OracleError)?;
        Ok(envelope
            .data
            .into_iter()
            .filter(|m| !is_excluded_model_name(&m.id, &m.name))
            .collect())
    }
}

/// In-memory catalog of pricing models, keyed by model id.
#[derive(Clone)]
pub struct PricingCatalog {
    models: Arc<RwLock<HashMap<String, Model>>>,
    min_request_msat: u64,
}

impl PricingCatalog {
    /// An empty catalog; populate with `bootstrap` before serving traffic.
    pub fn new(min_request_msat: u64) -> Self {
        PricingCatalog {
            models: Arc::new(RwLock::new(HashMap::new())),
            min_request_msat,
        }
    }

    /// Load an initial listing if the catalog is currently empty.
    pub async fn bootstrap(&self, source: &dyn ModelSource) -> Result<(), OracleError> {
        {
            let models = self.models.read().await;
            if !models.is_empty() {
                return Ok(());
            }
        }
        let fetched = source.fetch_models().await?;
        let mut models = self.models.write().await;
        for model in fetched {
            models.insert(model.id.clone(), model);
        }
        info!(count = models.len(), "pricing catalog bootstrapped");
        Ok(())
    }

    /// All models currently known, as returned by `GET /v1/models`.
    pub async fn list(&self) -> Vec<Model> {
        self.models.read().await.values().cloned().collect()
    }

    /// A single model by id.
    pub async fn get(&self, id: &str) -> Option<Model> {
        self.models.read().await.get(id).cloned()
    }

    /// The msat ceiling a request against `id` may cost — the model's own
    /// cached worst case, independent of anything the caller's request body
    /// asks for.
    pub async fn max_cost(&self, id: &str) -> Option<u64> {
        let model = self.get(id).await?;
        Some(max_cost_msats(&model, self.min_request_msat))
    }

    /// Recompute every model's `sats_pricing` from its USD pricing and the
    /// current exchange rate. Only models whose figures actually changed are
    /// rewritten, mirroring the original's "commit only changed rows".
    pub async fn refresh_pricing(&self, client: &reqwest::Client, fees: FeeSchedule) -> Result<(), OracleError> {
        let usd_per_sat = usd_per_sat(client, fees).await?;
        let sats_per_usd = 1.0 / usd_per_sat;
        let msats_per_usd = sats_per_usd * 1000.0;

        let mut models = self.models.write().await;
        let mut changed = 0;
        for model in models.values_mut() {
            let mut new_pricing = routstr_common::model::Pricing {
                prompt: model.pricing.prompt * msats_per_usd,
                completion: model.pricing.completion * msats_per_usd,
                request: model.pricing.request * msats_per_usd,
                image: model.pricing.image * msats_per_usd,
                web_search: model.pricing.web_search * msats_per_usd,
                internal_reasoning: model.pricing.internal_reasoning * msats_per_usd,
                max_prompt_cost: 0.0,
                max_completion_cost: 0.0,
                max_cost: 0.0,
            };
            let (max_prompt_cost, max_completion_cost, max_cost) =
                derive_max_cost(model, &new_pricing, self.min_request_msat);
            new_pricing.max_prompt_cost = max_prompt_cost;
            new_pricing.max_completion_cost = max_completion_cost;
            new_pricing.max_cost = max_cost as f64;

            let unchanged = model
                .sats_pricing
                .as_ref()
                .is_some_and(|p| (p.prompt - new_pricing.prompt).abs() < f64::EPSILON);
            if !unchanged {
                model.sats_pricing = Some(new_pricing);
                changed += 1;
            }
        }
        debug!(changed, "refreshed sats pricing for catalog");
        Ok(())
    }

    /// Insert any models from `source` not already present, without
    /// touching existing rows — new-model discovery never overwrites.
    pub async fn discover_new_models(&self, source: &dyn ModelSource) -> Result<usize, OracleError> {
        let fetched = source.fetch_models().await?;
        let mut models = self.models.write().await;
        let mut inserted = 0;
        for model in fetched {
            if !models.contains_key(&model.id) {
                models.insert(model.id.clone(), model);
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    /// Run `refresh_pricing` forever, sleeping `interval` plus up to 10%
    /// jitter between passes. Exits when `shutdown` resolves.
    pub async fn run_pricing_refresh_loop(
        &self,
        client: reqwest::Client,
        fees: FeeSchedule,
        interval: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        loop {
            if let Err(err) = self.refresh_pricing(&client, fees).await {
                warn!(%err, "pricing refresh failed, will retry next interval");
            }
            let jitter_fraction: f64 = rand::rng().random_range(0.0..0.1);
            let sleep_for = interval + interval.mul_f64(jitter_fraction);
            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = shutdown.changed() => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use routstr_common::model::Pricing;

    struct FixedSource(Vec<Model>);

    #[async_trait::async_trait]
    impl ModelSource for FixedSource {
        async fn fetch_models(&self) -> Result<Vec<Model>, OracleError> {
            Ok(self.0.clone())
        }
    }

    fn model(id: &str) -> Model {
        Model {
            id: id.to_string(),
            name: id.to_string(),
            pricing: Pricing {
                prompt: 0.00001,
                completion: 0.00002,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_populates_an_empty_catalog_only_once() {
        let catalog = PricingCatalog::new(1);
        let source = FixedSource(vec![model("a/a")]);
        catalog.bootstrap(&source).await.unwrap();
        assert_eq!(catalog.list().await.len(), 1);

        let other_source = FixedSource(vec![model("a/a"), model("b/b")]);
        catalog.bootstrap(&other_source).await.unwrap();
        assert_eq!(catalog.list().await.len(), 1, "already-populated catalog is untouched");
    }

    #[tokio::test]
    async fn discover_new_models_never_overwrites_existing_rows() {
        let catalog = PricingCatalog::new(1);
        catalog.bootstrap(&FixedSource(vec![model("a/a")])).await.unwrap();

        let mut updated_a = model("a/a");
        updated_a.name = "changed".to_string();
        let source = FixedSource(vec![updated_a, model("b/b")]);
        let inserted = catalog.discover_new_models(&source).await.unwrap();

        assert_eq!(inserted, 1);
        assert_eq!(catalog.get("a/a").await.unwrap().name, "a/a", "existing row untouched");
        assert!(catalog.get("b/b").await.is_some());
    }
}
