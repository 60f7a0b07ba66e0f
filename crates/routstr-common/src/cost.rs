//! Cost calculator: turns an upstream response's `usage` block into an
//! actual msat charge, or reports why it couldn't.

use serde::{Deserialize, Serialize};

use crate::model::Model;
use crate::msats::round_half_away_from_zero;

/// Reasoning-token breakdown nested under `usage.completion_tokens_details`
/// by reasoning-capable models (o1-style), per the OpenAI usage schema.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct CompletionTokensDetails {
    /// tokens spent on hidden reasoning, billed at `pricing.internal_reasoning`
    #[serde(default)]
    pub reasoning_tokens: u64,
}

/// Token and per-call-unit counts lifted from an upstream `usage` object.
/// Most chat-completion responses only ever populate `prompt_tokens`/
/// `completion_tokens`; the remaining fields are opportunistic and default
/// to zero whenever the upstream doesn't report them, so a model with a
/// non-zero `image`/`web_search`/`internal_reasoning` rate is only charged
/// for units upstream actually says it served.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Usage {
    /// prompt/input tokens billed
    #[serde(default, alias = "input_tokens")]
    pub prompt_tokens: u64,
    /// completion/output tokens billed
    #[serde(default, alias = "output_tokens")]
    pub completion_tokens: u64,
    /// images generated or accepted as input, if the model bills per image
    #[serde(default)]
    pub num_images: u64,
    /// web-search invocations the model made while answering
    #[serde(default)]
    pub num_web_search_calls: u64,
    /// reasoning-token breakdown, if upstream reports one
    #[serde(default)]
    pub completion_tokens_details: CompletionTokensDetails,
}

/// Outcome of costing a single request.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum CostOutcome {
    /// No usage object was ever observed (interrupted stream, non-chat
    /// route); the full reservation is charged, nothing refunded.
    MaxCost {
        /// total msats charged, equal to the original reservation
        total_msats: u64,
    },
    /// Usage was observed and costed against the model's sats pricing.
    Cost(CostData),
    /// Costing failed (unknown model, missing pricing); caller should
    /// respond 400 and the reservation should still be finalized at the
    /// pre-costed max, per the unified finalize semantics.
    Error {
        /// machine-readable failure code
        code: &'static str,
        /// human-readable detail
        message: String,
    },
}

/// A successfully computed actual cost.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CostData {
    /// msats charged flat per request, regardless of usage
    pub base_msats: u64,
    /// msats attributable to prompt tokens
    pub input_msats: u64,
    /// msats attributable to completion tokens
    pub output_msats: u64,
    /// base_msats + input_msats + output_msats + any flat per-unit
    /// components usage reported; what is actually deducted from balance
    pub total_msats: u64,
}

/// Compute the actual cost of a request against `model`'s sats pricing and
/// the `usage` block returned by upstream, falling back to `deducted_max_cost`
/// (charging the full reservation, refunding nothing) when `usage` is absent.
///
/// `total = base + input + output + image + web_search + internal_reasoning`,
/// per spec.md §4.E; `base` is the model's flat `request` price, and the
/// image/web-search/reasoning components are only non-zero when upstream's
/// `usage` block actually reports counts for them.
pub fn calculate_cost(model: Option<&Model>, usage: Option<Usage>, deducted_max_cost: u64) -> CostOutcome {
    let Some(usage) = usage else {
        return CostOutcome::MaxCost {
            total_msats: deducted_max_cost,
        };
    };

    let Some(model) = model else {
        return CostOutcome::Error {
            code: "model_not_found",
            message: "response named a model not present in the pricing catalog".to_string(),
        };
    };

    let Some(pricing) = &model.sats_pricing else {
        return CostOutcome::Error {
            code: "pricing_not_found",
            message: format!("no sats pricing available for model {}", model.id),
        };
    };

    let base_msats = round_half_away_from_zero(pricing.request);
    let input_msats = round_half_away_from_zero(usage.prompt_tokens as f64 * pricing.prompt);
    let output_msats = round_half_away_from_zero(usage.completion_tokens as f64 * pricing.completion);
    let image_msats = round_half_away_from_zero(usage.num_images as f64 * pricing.image);
    let web_search_msats = round_half_away_from_zero(usage.num_web_search_calls as f64 * pricing.web_search);
    let reasoning_msats = round_half_away_from_zero(
        usage.completion_tokens_details.reasoning_tokens as f64 * pricing.internal_reasoning,
    );
    let total_msats = base_msats + input_msats + output_msats + image_msats + web_search_msats + reasoning_msats;

    CostOutcome::Cost(CostData {
        base_msats,
        input_msats,
        output_msats,
        total_msats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Pricing;

    fn priced_model() -> Model {
        Model {
            id: "test/model".to_string(),
            sats_pricing: Some(Pricing {
                prompt: 2.0,
                completion: 3.0,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn charges_max_cost_when_usage_missing() {
        let outcome = calculate_cost(Some(&priced_model()), None, 500);
        match outcome {
            CostOutcome::MaxCost { total_msats } => assert_eq!(total_msats, 500),
            _ => panic!("expected MaxCost"),
        }
    }

    #[test]
    fn reports_model_not_found() {
        let usage = Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            ..Default::default()
        };
        let outcome = calculate_cost(None, Some(usage), 500);
        matches!(outcome, CostOutcome::Error { code: "model_not_found", .. });
    }

    #[test]
    fn computes_actual_cost_from_usage() {
        let usage = Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            ..Default::default()
        };
        let outcome = calculate_cost(Some(&priced_model()), Some(usage), 500);
        match outcome {
            CostOutcome::Cost(data) => {
                assert_eq!(data.base_msats, 0);
                assert_eq!(data.input_msats, 20);
                assert_eq!(data.output_msats, 15);
                assert_eq!(data.total_msats, 35);
            }
            _ => panic!("expected Cost"),
        }
    }

    #[test]
    fn flat_and_per_unit_components_are_folded_into_total() {
        let model = Model {
            id: "test/model".to_string(),
            sats_pricing: Some(Pricing {
                prompt: 2.0,
                completion: 3.0,
                request: 50.0,
                image: 10.0,
                web_search: 5.0,
                internal_reasoning: 1.0,
                ..Default::default()
            }),
            ..Default::default()
        };
        let usage = Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            num_images: 2,
            num_web_search_calls: 1,
            completion_tokens_details: CompletionTokensDetails { reasoning_tokens: 100 },
        };
        let outcome = calculate_cost(Some(&model), Some(usage), 500);
        match outcome {
            CostOutcome::Cost(data) => {
                // base 50 + input 20 + output 15 + images 20 + web_search 5 + reasoning 100
                assert_eq!(data.base_msats, 50);
                assert_eq!(data.total_msats, 210);
            }
            _ => panic!("expected Cost"),
        }
    }
}
