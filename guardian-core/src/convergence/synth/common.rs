//! Shared helpers for the four synthesis strategies: metric discovery and
//! the internal per-strategy confidence used to weight the Hybrid
//! combination — distinct from the Confidence Calibrator.

use std::collections::{BTreeSet, HashMap};

use crate::convergence::model::FilteredResponse;
use crate::convergence::stats::{mean, variance};

/// Union of metric names present across the retained cohort, in a stable
/// (sorted) order so output maps are deterministic regardless of arrival
/// order.
pub fn union_metrics(responses: &[&FilteredResponse]) -> Vec<String> {
    let mut set = BTreeSet::new();
    for r in responses {
        set.extend(r.response.scores.keys().cloned());
    }
    set.into_iter().collect()
}

/// Raw (score, confidence-weight) pairs for one metric, from responses
/// that report it.
pub fn metric_observations(responses: &[&FilteredResponse], metric: &str) -> Vec<(f64, f64)> {
    responses
        .iter()
        .filter_map(|r| {
            r.response
                .scores
                .get(metric)
                .map(|&score| (score, r.response.confidence))
        })
        .collect()
}

/// Internal per-strategy synthesis-quality confidence (supplemental
/// `0.5*mean(confidence) + 0.3*consensus_factor + 0.2*count_factor`.
pub fn internal_confidence(responses: &[&FilteredResponse], per_metric: &HashMap<String, f64>) -> f64 {
    if responses.is_empty() {
        return 0.0;
    }

    let confidences: Vec<f64> = responses.iter().map(|r| r.response.confidence).collect();
    let avg_confidence = mean(&confidences);

    let mut stddevs = Vec::new();
    for metric in per_metric.keys() {
        let values: Vec<f64> = responses
            .iter()
            .filter_map(|r| r.response.scores.get(metric).copied())
            .collect();
        if values.len() >= 2 {
            stddevs.push(variance(&values).sqrt());
        }
    }
    let mean_stddev = mean(&stddevs);
    let consensus_factor = 1.0 - (mean_stddev / 50.0).min(1.0);

    let count_factor = (responses.len() as f64 / 5.0).min(1.0);

    (0.5 * avg_confidence + 0.3 * consensus_factor + 0.2 * count_factor).clamp(0.0, 1.0)
}
