//! Pricing model catalog entries.
//!
//! Field-for-field mirror of the upstream model listing (OpenRouter-shaped),
//! plus the derived sats/msat pricing and max-cost figures this proxy
//! actually charges against.

use serde::{Deserialize, Serialize};

/// Architecture modalities a model accepts/produces.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Architecture {
    /// input modalities, e.g. `["text", "image"]`
    #[serde(default)]
    pub input_modalities: Vec<String>,
    /// output modalities, e.g. `["text"]`
    #[serde(default)]
    pub output_modalities: Vec<String>,
    /// underlying tokenizer family, when known
    pub tokenizer: Option<String>,
}

/// USD-denominated per-unit pricing as published upstream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pricing {
    /// USD per prompt token
    #[serde(default)]
    pub prompt: f64,
    /// USD per completion token
    #[serde(default)]
    pub completion: f64,
    /// flat USD per request
    #[serde(default)]
    pub request: f64,
    /// USD per image
    #[serde(default)]
    pub image: f64,
    /// USD per web search invocation
    #[serde(default)]
    pub web_search: f64,
    /// USD per internal-reasoning token
    #[serde(default)]
    pub internal_reasoning: f64,
    /// derived: msats charged per prompt token at max cost
    #[serde(default)]
    pub max_prompt_cost: f64,
    /// derived: msats charged per completion token at max cost
    #[serde(default)]
    pub max_completion_cost: f64,
    /// derived: msats, the ceiling a single request may cost
    #[serde(default)]
    pub max_cost: f64,
}

/// Provider-reported context window and per-request limits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopProvider {
    /// total context window, in tokens
    pub context_length: Option<u64>,
    /// max completion tokens the provider allows
    pub max_completion_tokens: Option<u64>,
    /// whether the provider applies its own moderation
    #[serde(default)]
    pub is_moderated: bool,
}

/// A single pricing-model catalog entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Model {
    /// upstream model id, e.g. `openai/gpt-4o`
    pub id: String,
    /// display name
    #[serde(default)]
    pub name: String,
    /// unix seconds this entry was created/discovered
    #[serde(default)]
    pub created: i64,
    /// free-text description
    #[serde(default)]
    pub description: String,
    /// overall context length, tokens
    pub context_length: Option<u64>,
    /// input/output modalities
    #[serde(default)]
    pub architecture: Architecture,
    /// USD pricing as published upstream
    #[serde(default)]
    pub pricing: Pricing,
    /// pricing converted to sats/msats by the pricing oracle
    #[serde(default)]
    pub sats_pricing: Option<Pricing>,
    /// provider-level context/limits
    #[serde(default)]
    pub top_provider: TopProvider,
}

/// Names excluded from the upstream model listing per the original catalog's
/// filtering rules: explicit `(free)` variants and known non-billable ids.
pub fn is_excluded_model_name(id: &str, name: &str) -> bool {
    name.contains("(free)")
        || id == "openrouter/auto"
        || id == "google/gemini-2.5-pro-exp-03-25"
}

/// Derive the ceiling cost breakdown for `model` from the model's own
/// sizing signals only — never the caller's request — following the exact
/// cascade `original_source/routstr/payment/models.py::update_sats_pricing`
/// walks: `top_provider` (context_length, max_completion_tokens) beats the
/// model's own `context_length`, which beats a fixed fallback envelope.
/// Returns `(max_prompt_cost, max_completion_cost, max_cost)` in msats, the
/// last already floored at `min_request_msat`.
///
/// Both split branches either size the ceiling directly off `top_provider`'s
/// own fields, or — only once neither field is present at all — fall back to
/// a fixed envelope that also folds in the model's flat per-call components
/// (`request`, `image`, `web_search`, `internal_reasoning`), matching the
/// original's "nothing known at all" branch exactly; those components are
/// never added when any sizing signal is present.
pub fn derive_max_cost(model: &Model, pricing: &Pricing, min_request_msat: u64) -> (f64, f64, u64) {
    let tp = &model.top_provider;
    let prompt_rate = pricing.prompt;
    let completion_rate = pricing.completion;

    let (max_prompt_cost, max_completion_cost, is_full_fallback) =
        if tp.context_length.is_some() || tp.max_completion_tokens.is_some() {
            match (tp.context_length, tp.max_completion_tokens) {
                (Some(cl), Some(mct)) => {
                    let (cl, mct) = (cl as f64, mct as f64);
                    ((cl - mct).max(0.0) * prompt_rate, mct * completion_rate, false)
                }
                (Some(cl), None) => {
                    let cl = cl as f64;
                    (cl * 0.8 * prompt_rate, cl * 0.2 * completion_rate, false)
                }
                (None, Some(mct)) => {
                    let mct = mct as f64;
                    (mct * 4.0 * prompt_rate, mct * completion_rate, false)
                }
                (None, None) => unreachable!("guarded by the outer context_length/max_completion_tokens check"),
            }
        } else if let Some(cl) = model.context_length {
            let cl = cl as f64;
            (cl * 0.8 * prompt_rate, cl * 0.2 * completion_rate, false)
        } else {
            (1_000_000.0 * prompt_rate, 32_000.0 * completion_rate, true)
        };

    let mut max_cost = max_prompt_cost + max_completion_cost;
    if is_full_fallback {
        max_cost += pricing.request * 100_000.0;
        max_cost += pricing.image * 100.0;
        max_cost += pricing.web_search * 1000.0;
        max_cost += pricing.internal_reasoning * 100.0;
    }

    let min = min_request_msat as f64;
    if max_cost < min {
        max_cost = min;
    }

    (max_prompt_cost, max_completion_cost, crate::msats::round_half_away_from_zero(max_cost).max(min_request_msat))
}

/// The msat ceiling a request against `model` may cost, looked up purely
/// from the model's own cached pricing — `maxCostMsats(id)` in spec.md
/// §4.A is a single-argument lookup; nothing about the caller's request
/// ever shrinks or grows this ceiling.
pub fn max_cost_msats(model: &Model, min_request_msat: u64) -> u64 {
    match &model.sats_pricing {
        Some(pricing) => derive_max_cost(model, pricing, min_request_msat).2,
        None => min_request_msat,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model_with(context_length: Option<u64>, max_completion_tokens: Option<u64>) -> Model {
        Model {
            id: "test/model".to_string(),
            top_provider: TopProvider {
                context_length,
                max_completion_tokens,
                is_moderated: false,
            },
            sats_pricing: Some(Pricing {
                prompt: 1.0,
                completion: 2.0,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn splits_at_explicit_completion_ceiling() {
        let model = model_with(Some(1000), Some(200));
        let cost = max_cost_msats(&model, 1);
        // (1000-200)*1 + 200*2 = 1200
        assert_eq!(cost, 1200);
    }

    #[test]
    fn falls_back_to_eighty_twenty_split() {
        let model = model_with(Some(1000), None);
        let cost = max_cost_msats(&model, 1);
        // 800*1 + 200*2 = 1200
        assert_eq!(cost, 1200);
    }

    #[test]
    fn sizes_prompt_at_four_times_completion_ceiling() {
        let model = model_with(None, Some(100));
        let cost = max_cost_msats(&model, 1);
        // 400*1 + 100*2 = 600
        assert_eq!(cost, 600);
    }

    #[test]
    fn floors_at_minimum_when_unpriced() {
        let mut model = model_with(None, None);
        model.sats_pricing = None;
        assert_eq!(max_cost_msats(&model, 5), 5);
    }

    #[test]
    fn excludes_free_and_denylisted_models() {
        assert!(is_excluded_model_name("foo/bar", "Bar (free)"));
        assert!(is_excluded_model_name("openrouter/auto", "Auto"));
        assert!(!is_excluded_model_name("openai/gpt-4o", "GPT-4o"));
    }
}
