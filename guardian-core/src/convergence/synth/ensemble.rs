//! Weighted Ensemble synthesis: a per-provider base weight, boosted
//! by the provider's own confidence in this response, used to weight a
//! straight weighted mean per metric.

use std::collections::HashMap;

use crate::convergence::config::EnsembleBaseWeights;
use crate::convergence::model::FilteredResponse;
use crate::convergence::stats::weighted_mean;

use super::common::{internal_confidence, union_metrics};

/// Effective weight for one response: configured base weight (falling back
/// to `reliability_weight` for providers absent from the table), boosted by
/// `0.2 * confidence` and capped at 1.
fn effective_weight(
    response: &FilteredResponse,
    base_weights: &EnsembleBaseWeights,
    reliability_weight: f64,
) -> f64 {
    let base = base_weights
        .by_provider
        .get(response.provider_name())
        .copied()
        .unwrap_or(reliability_weight);
    (base + 0.2 * response.response.confidence).min(1.0)
}

/// `(per_metric_scores, internal_confidence)` for the weighted-ensemble
/// strategy. `provider_reliability` supplies the fallback weight for
/// providers not present in `base_weights`.
pub fn synthesize(
    responses: &[&FilteredResponse],
    base_weights: &EnsembleBaseWeights,
    provider_reliability: &HashMap<String, f64>,
) -> (HashMap<String, f64>, f64) {
    let metrics = union_metrics(responses);
    let mut per_metric = HashMap::with_capacity(metrics.len());

    let weights: Vec<f64> = responses
        .iter()
        .map(|r| {
            let reliability = provider_reliability.get(r.provider_name()).copied().unwrap_or(0.7);
            effective_weight(r, base_weights, reliability)
        })
        .collect();

    for metric in &metrics {
        let mut values = Vec::new();
        let mut these_weights = Vec::new();
        for (r, &w) in responses.iter().zip(&weights) {
            if let Some(&score) = r.response.scores.get(metric) {
                values.push(score);
                these_weights.push(w);
            }
        }
        if values.is_empty() {
            continue;
        }
        per_metric.insert(metric.clone(), weighted_mean(&values, &these_weights));
    }

    let confidence = internal_confidence(responses, &per_metric);
    (per_metric, confidence)
}
