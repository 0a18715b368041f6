//! Hybrid synthesis: runs Advanced Bayesian and Weighted Ensemble
//! independently, then blends their per-metric outputs weighted by each
//! strategy's own internal confidence, so the more self-consistent
//! strategy dominates the result.

use std::collections::{HashMap, HashSet};

use crate::convergence::config::{DomainPriors, EnsembleBaseWeights};
use crate::convergence::model::{Domain, FilteredResponse};

use super::{bayesian, ensemble};

/// `(per_metric_scores, internal_confidence)` for the hybrid strategy.
pub fn synthesize(
    responses: &[&FilteredResponse],
    domain: Domain,
    priors: &DomainPriors,
    base_weights: &EnsembleBaseWeights,
    provider_reliability: &HashMap<String, f64>,
) -> (HashMap<String, f64>, f64) {
    let (bayesian_metrics, bayesian_confidence) = bayesian::synthesize(responses, domain, priors);
    let (ensemble_metrics, ensemble_confidence) = ensemble::synthesize(responses, base_weights, provider_reliability);

    let confidence_sum = bayesian_confidence + ensemble_confidence;
    let (bayesian_weight, ensemble_weight) = if confidence_sum <= 0.0 {
        (0.5, 0.5)
    } else {
        (bayesian_confidence / confidence_sum, ensemble_confidence / confidence_sum)
    };

    let metrics: HashSet<String> = bayesian_metrics.keys().chain(ensemble_metrics.keys()).cloned().collect();
    let mut per_metric = HashMap::with_capacity(metrics.len());

    for metric in metrics {
        let blended = match (bayesian_metrics.get(&metric), ensemble_metrics.get(&metric)) {
            (Some(&b), Some(&e)) => bayesian_weight * b + ensemble_weight * e,
            (Some(&b), None) => b,
            (None, Some(&e)) => e,
            (None, None) => continue,
        };
        per_metric.insert(metric, blended);
    }

    let confidence = (confidence_sum / 2.0).clamp(0.0, 1.0);
    (per_metric, confidence)
}
