//! Outlier Filter: IQR-based removal of responses whose scores are
//! inconsistent with the cohort, applied only when at least 3 validated,
//! unfiltered responses exist, and only when it would not shrink the
//! cohort below 2 (coverage preservation, testable property 5).

use std::collections::HashSet;

use crate::convergence::model::FilteredResponse;

/// Quartiles and IQR bounds for a sorted slice of scores.
fn iqr_bounds(sorted: &[f64]) -> (f64, f64) {
    let q1 = quantile(sorted, 0.25);
    let q3 = quantile(sorted, 0.75);
    let iqr = q3 - q1;
    (q1 - 1.5 * iqr, q3 + 1.5 * iqr)
}

/// Linear-interpolation quantile over an already-sorted slice.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let frac = pos - lower as f64;
        sorted[lower] + (sorted[upper] - sorted[lower]) * frac
    }
}

/// Apply the outlier filter in place. Only mutates responses that
/// are currently retained; never touches ones already filtered by bias or
/// poisoning.
pub fn apply_outlier_filter(responses: &mut [FilteredResponse]) {
    let retained_indices: Vec<usize> = responses
        .iter()
        .enumerate()
        .filter(|(_, r)| r.retained)
        .map(|(i, _)| i)
        .collect();

    if retained_indices.len() < 3 {
        return;
    }

    let mut metric_names: HashSet<String> = HashSet::new();
    for &i in &retained_indices {
        metric_names.extend(responses[i].response.scores.keys().cloned());
    }

    let mut outlier_indices: HashSet<usize> = HashSet::new();
    for metric in &metric_names {
        let mut values: Vec<f64> = retained_indices
            .iter()
            .filter_map(|&i| responses[i].response.scores.get(metric).copied())
            .collect();
        if values.len() < 3 {
            continue;
        }
        values.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let (low, high) = iqr_bounds(&values);

        for &i in &retained_indices {
            if let Some(&score) = responses[i].response.scores.get(metric) {
                if score < low || score > high {
                    outlier_indices.insert(i);
                }
            }
        }
    }

    if outlier_indices.is_empty() {
        return;
    }

    let would_remain = retained_indices.len() - outlier_indices.len();
    if would_remain < 2 {
        // Preserve coverage: no removal occurs at all.
        return;
    }

    for i in outlier_indices {
        responses[i].retained = false;
        responses[i].rejection_reason = Some("outlier".to_string());
    }
}

/// Names of providers flagged as outliers after `apply_outlier_filter` ran,
/// for inclusion in `SynthesisResult::outliers`.
pub fn outlier_provider_names(responses: &[FilteredResponse]) -> Vec<String> {
    responses
        .iter()
        .filter(|r| r.rejection_reason.as_deref() == Some("outlier"))
        .map(|r| r.provider_name().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convergence::model::ProviderResponse;
    use std::collections::HashMap;
    use std::time::Duration;

    fn retained(name: &str, metric_value: f64) -> FilteredResponse {
        FilteredResponse {
            response: ProviderResponse {
                provider_name: name.to_string(),
                raw_text: Some("ok".to_string()),
                scores: HashMap::from([("completeness".to_string(), metric_value)]),
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
    fn does_not_run_below_three_responses() {
        let mut responses = vec![retained("a", 70.0), retained("b", 10.0)];
        apply_outlier_filter(&mut responses);
        assert!(responses.iter().all(|r| r.retained));
    }

    #[test]
    fn removes_a_single_outlier_among_three() {
        let mut responses = vec![retained("a", 70.0), retained("b", 72.0), retained("c", 8.0)];
        apply_outlier_filter(&mut responses);
        assert!(responses[0].retained);
        assert!(responses[1].retained);
        assert!(!responses[2].retained);
        assert_eq!(responses[2].rejection_reason.as_deref(), Some("outlier"));
    }

    #[test]
    fn preserves_coverage_when_removal_would_drop_below_two() {
        let mut responses = vec![retained("a", 70.0), retained("b", 5.0), retained("c", 3.0)];
        apply_outlier_filter(&mut responses);
        // "a" is the lone outlier relative to b/c; removing it leaves 2, which is allowed.
        let retained_count = responses.iter().filter(|r| r.retained).count();
        assert!(retained_count >= 2);
    }

    #[test]
    fn order_invariance_scores_identical_regardless_of_arrival_order() {
        let mut forward = vec![retained("a", 70.0), retained("b", 72.0), retained("c", 8.0)];
        let mut reversed = vec![retained("c", 8.0), retained("b", 72.0), retained("a", 70.0)];
        apply_outlier_filter(&mut forward);
        apply_outlier_filter(&mut reversed);

        let forward_names: HashMap<_, _> = forward
            .iter()
            .map(|r| (r.provider_name().to_string(), r.retained))
            .collect();
        let reversed_names: HashMap<_, _> = reversed
            .iter()
            .map(|r| (r.provider_name().to_string(), r.retained))
            .collect();
        assert_eq!(forward_names, reversed_names);
    }
}
