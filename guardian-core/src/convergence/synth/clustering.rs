//! Consensus Clustering synthesis: greedy grouping of responses by
//! similarity to a cluster's first member, then per-metric output is the
//! weighted mean of each cluster's own member-average, weighted by
//! cluster size and average member confidence.

use std::collections::HashMap;

use crate::convergence::model::FilteredResponse;
use crate::convergence::stats::weighted_mean;

use super::common::{internal_confidence, union_metrics};

const SIMILARITY_THRESHOLD: f64 = 0.7;

/// Similarity of two responses: `1 - mean(|a_m - b_m|) / 100` over metrics
/// both report. Responses sharing no metric are dissimilar by definition.
fn similarity(a: &FilteredResponse, b: &FilteredResponse) -> f64 {
    let mut diffs = Vec::new();
    for (metric, &va) in &a.response.scores {
        if let Some(&vb) = b.response.scores.get(metric) {
            diffs.push((va - vb).abs());
        }
    }
    if diffs.is_empty() {
        return 0.0;
    }
    let mean_diff = diffs.iter().sum::<f64>() / diffs.len() as f64;
    1.0 - (mean_diff / 100.0).min(1.0)
}

struct Cluster<'a> {
    representative: &'a FilteredResponse,
    members: Vec<&'a FilteredResponse>,
}

/// Greedily assign `responses` (in arrival order) to clusters, each keyed
/// by its first member as the representative.
fn build_clusters<'a>(responses: &[&'a FilteredResponse]) -> Vec<Cluster<'a>> {
    let mut clusters: Vec<Cluster<'a>> = Vec::new();
    for &r in responses {
        let home = clusters
            .iter_mut()
            .find(|c| similarity(c.representative, r) >= SIMILARITY_THRESHOLD);
        match home {
            Some(cluster) => cluster.members.push(r),
            None => clusters.push(Cluster {
                representative: r,
                members: vec![r],
            }),
        }
    }
    clusters
}

/// `(per_metric_scores, internal_confidence)` for the consensus-clustering
/// strategy.
pub fn synthesize(responses: &[&FilteredResponse]) -> (HashMap<String, f64>, f64) {
    let metrics = union_metrics(responses);
    let mut per_metric = HashMap::with_capacity(metrics.len());

    if responses.is_empty() {
        return (per_metric, 0.0);
    }

    let clusters = build_clusters(responses);
    let total = responses.len() as f64;

    let cluster_weights: Vec<f64> = clusters
        .iter()
        .map(|c| {
            let avg_confidence =
                c.members.iter().map(|m| m.response.confidence).sum::<f64>() / c.members.len() as f64;
            avg_confidence * (c.members.len() as f64 / total)
        })
        .collect();

    for metric in &metrics {
        let mut values = Vec::new();
        let mut weights = Vec::new();
        for (cluster, &weight) in clusters.iter().zip(&cluster_weights) {
            let member_scores: Vec<f64> =
                cluster.members.iter().filter_map(|m| m.response.scores.get(metric).copied()).collect();
            if member_scores.is_empty() {
                continue;
            }
            let cluster_mean = member_scores.iter().sum::<f64>() / member_scores.len() as f64;
            values.push(cluster_mean);
            weights.push(weight);
        }
        if values.is_empty() {
            continue;
        }
        per_metric.insert(metric.clone(), weighted_mean(&values, &weights));
    }

    let confidence = internal_confidence(responses, &per_metric);
    (per_metric, confidence)
}
