//! Consensus Synthesizer: dispatches to one of four strategies over
//! the retained cohort and produces the shared disagreement/consensus
//! metrics that are independent of which strategy ran.

mod bayesian;
mod clustering;
mod common;
mod ensemble;
mod hybrid;

use std::collections::HashMap;

use crate::convergence::config::EngineConfig;
use crate::convergence::model::{Domain, FilteredResponse, SynthesisResult, SynthesisStrategy};
use crate::convergence::outlier::outlier_provider_names;
use crate::convergence::stats::{mean, variance};

/// Run the given strategy over `all` (the full, possibly outlier-filtered
/// cohort) and produce a complete `SynthesisResult`. `all` must already
/// have had validation, bias/poisoning, and outlier filtering applied to
/// its `retained` flags.
pub fn synthesize(
    strategy: SynthesisStrategy,
    all: &[FilteredResponse],
    domain: Domain,
    config: &EngineConfig,
    provider_reliability: &HashMap<String, f64>,
) -> SynthesisResult {
    let retained: Vec<&FilteredResponse> = all.iter().filter(|r| r.retained).collect();

    if retained.is_empty() {
        return SynthesisResult::empty();
    }

    let (per_metric, _internal_confidence) = match strategy {
        SynthesisStrategy::AdvancedBayesian => bayesian::synthesize(&retained, domain, &config.domain_priors),
        SynthesisStrategy::ConsensusClustering => clustering::synthesize(&retained),
        SynthesisStrategy::WeightedEnsemble => {
            ensemble::synthesize(&retained, &config.ensemble_base_weights, provider_reliability)
        }
        SynthesisStrategy::Hybrid => hybrid::synthesize(
            &retained,
            domain,
            &config.domain_priors,
            &config.ensemble_base_weights,
            provider_reliability,
        ),
        SynthesisStrategy::Empty | SynthesisStrategy::Auto => {
            // The router resolves `Auto` before calling in; `Empty` never reaches here
            // because the retained-cohort check above already short-circuited.
            (HashMap::new(), 0.0)
        }
    };

    let disagreement = disagreement_across_metrics(&retained, &per_metric);
    let consensus_score = mean(&per_metric.values().copied().collect::<Vec<_>>());

    SynthesisResult {
        per_metric_scores: per_metric,
        consensus_score,
        strategy,
        disagreement,
        consensus_strength: 1.0 - disagreement,
        outliers: outlier_provider_names(all),
    }
}

/// `min(1, mean_over_metrics(variance(raw scores)) / 100)` — independent
/// of which synthesis strategy produced the blended output.
fn disagreement_across_metrics(retained: &[&FilteredResponse], per_metric: &HashMap<String, f64>) -> f64 {
    if per_metric.is_empty() {
        return 1.0;
    }
    let mut variances = Vec::with_capacity(per_metric.len());
    for metric in per_metric.keys() {
        let values: Vec<f64> = retained
            .iter()
            .filter_map(|r| r.response.scores.get(metric).copied())
            .collect();
        variances.push(variance(&values));
    }
    (mean(&variances) / 100.0).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convergence::model::ProviderResponse;
    use std::time::Duration;

    fn retained(name: &str, value: f64) -> FilteredResponse {
        FilteredResponse {
            response: ProviderResponse {
                provider_name: name.to_string(),
                raw_text: Some("ok".to_string()),
                scores: HashMap::from([("completeness".to_string(), value)]),
                confidence: 0.9,
                elapsed: Duration::from_millis(5),
                success: true,
                error_kind: None,
                provenance_hash: Some("h".to_string()),
            },
            bias_score: 0.0,
            poisoning_score: 0.0,
            retained: true,
            rejection_reason: None,
        }
    }

    #[test]
    fn empty_cohort_produces_empty_result() {
        let config = EngineConfig::default();
        let result = synthesize(SynthesisStrategy::Hybrid, &[], Domain::Generic, &config, &HashMap::new());
        assert_eq!(result.strategy, SynthesisStrategy::Empty);
    }

    #[test]
    fn high_agreement_cohort_yields_low_disagreement() {
        let config = EngineConfig::default();
        let responses = vec![retained("a", 80.0), retained("b", 81.0), retained("c", 79.0)];
        let result = synthesize(
            SynthesisStrategy::WeightedEnsemble,
            &responses,
            Domain::Generic,
            &config,
            &HashMap::new(),
        );
        assert!(result.disagreement < 0.2);
        assert!(result.consensus_strength > 0.8);
    }

    #[test]
    fn low_agreement_cohort_yields_high_disagreement() {
        let config = EngineConfig::default();
        let responses = vec![retained("a", 95.0), retained("b", 5.0), retained("c", 50.0)];
        let result = synthesize(
            SynthesisStrategy::WeightedEnsemble,
            &responses,
            Domain::Generic,
            &config,
            &HashMap::new(),
        );
        assert!(result.disagreement > 0.2);
    }

    #[test]
    fn each_strategy_produces_a_result_for_the_same_cohort() {
        let config = EngineConfig::default();
        let responses = vec![retained("a", 80.0), retained("b", 84.0), retained("c", 78.0)];
        for strategy in [
            SynthesisStrategy::AdvancedBayesian,
            SynthesisStrategy::ConsensusClustering,
            SynthesisStrategy::WeightedEnsemble,
            SynthesisStrategy::Hybrid,
        ] {
            let result = synthesize(strategy, &responses, Domain::Generic, &config, &HashMap::new());
            assert_eq!(result.strategy, strategy);
            assert!(result.per_metric_scores.contains_key("completeness"));
        }
    }
}
