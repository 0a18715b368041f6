//! Advanced Bayesian synthesis: per-metric posterior mean over a
//! domain-specific Gaussian prior, updated by the retained cohort's
//! confidence-weighted observations.

use std::collections::HashMap;

use crate::convergence::config::DomainPriors;
use crate::convergence::model::{Domain, FilteredResponse, SynthesisStrategy};
use crate::convergence::stats::{variance, weighted_mean};

use super::common::{internal_confidence, union_metrics};

/// `(per_metric_scores, internal_confidence)` for the Bayesian strategy.
pub fn synthesize(
    responses: &[&FilteredResponse],
    domain: Domain,
    priors: &DomainPriors,
) -> (HashMap<String, f64>, f64) {
    let metrics = union_metrics(responses);
    let mut per_metric = HashMap::with_capacity(metrics.len());

    for metric in &metrics {
        let observations: Vec<(f64, f64)> = responses
            .iter()
            .filter_map(|r| r.response.scores.get(metric).map(|&s| (s, r.response.confidence)))
            .collect();
        if observations.is_empty() {
            continue;
        }

        let values: Vec<f64> = observations.iter().map(|(v, _)| *v).collect();
        let weights: Vec<f64> = observations.iter().map(|(_, w)| *w).collect();
        let weighted_x_bar = weighted_mean(&values, &weights);
        let weight_sum: f64 = weights.iter().sum();

        let observed_variance = if values.len() < 2 { 10.0 } else { variance(&values) };

        // Zero observed variance means infinite observation precision: the
        // data fully determines the posterior, independent of the prior.
        let posterior_mean = if observed_variance <= 0.0 {
            weighted_x_bar
        } else {
            let prior = priors.prior_for(domain, metric);
            let prior_precision = 1.0 / prior.variance;
            let observation_precision = weight_sum / observed_variance;
            (prior.mean * prior_precision + weighted_x_bar * weight_sum / observed_variance)
                / (prior_precision + observation_precision)
        };

        per_metric.insert(metric.clone(), posterior_mean.clamp(0.0, 100.0));
    }

    let confidence = internal_confidence(responses, &per_metric);
    (per_metric, confidence)
}
