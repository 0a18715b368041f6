//! Router / Strategy Selector: resolves dispatch mode and synthesis
//! strategy, then carries out either dispatch. Parallel dispatch uses a
//! bounded semaphore and `join_all` with index-tagged order restoration;
//! daisy-chain dispatch is a sequential mode with early exit and
//! failure-tolerant chaining.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::Semaphore;

use crate::convergence::adapter::{CancelSignal, ProviderAdapter};
use crate::convergence::model::{Domain, DispatchMode, FilteredResponse, ProviderErrorKind, ProviderResponse, SynthesisStrategy};
use crate::convergence::stats::{mean, variance};

/// Resolve the dispatch mode the caller requested. `Auto` resolves to
/// `Parallel` ("parallel by default").
pub fn choose_dispatch_mode(requested: DispatchMode) -> DispatchMode {
    match requested {
        DispatchMode::Chain => DispatchMode::Chain,
        DispatchMode::Parallel | DispatchMode::Auto => DispatchMode::Parallel,
    }
}

/// Diversity of a retained cohort: mean per-metric score variance,
/// normalized to [0,1] by dividing by 100.
pub fn diversity(responses: &[&FilteredResponse]) -> f64 {
    let mut metric_names = std::collections::BTreeSet::new();
    for r in responses {
        metric_names.extend(r.response.scores.keys().cloned());
    }
    if metric_names.is_empty() {
        return 0.0;
    }
    let variances: Vec<f64> = metric_names
        .iter()
        .map(|metric| {
            let values: Vec<f64> = responses
                .iter()
                .filter_map(|r| r.response.scores.get(metric).copied())
                .collect();
            variance(&values)
        })
        .collect();
    (mean(&variances) / 100.0).clamp(0.0, 1.0)
}

/// Deterministic pseudo-random nudge to the diversity/variance thresholds,
/// seeded from the input hash. Never changes which providers are invoked,
/// never performs I/O. A no-op unless both the Cargo feature and
/// the caller's request opt-in are present.
#[cfg(feature = "quantum-routing")]
fn quantum_nudge(value: f64, input_hash: &str) -> f64 {
    let seed: u64 = input_hash.bytes().map(u64::from).sum();
    let nudge = ((seed % 21) as f64 - 10.0) / 1000.0;
    (value + nudge).clamp(0.0, 1.0)
}

#[cfg(not(feature = "quantum-routing"))]
fn quantum_nudge(value: f64, _input_hash: &str) -> f64 {
    value
}

/// Resolve the synthesis strategy the caller requested. `Auto` applies the
/// strategy-selection decision tree over the retained cohort.
pub fn choose_strategy(
    requested: SynthesisStrategy,
    retained: &[&FilteredResponse],
    domain: Domain,
    input_hash: &str,
    quantum_routing_requested: bool,
) -> SynthesisStrategy {
    if !matches!(requested, SynthesisStrategy::Auto) {
        return requested;
    }

    let n = retained.len();
    if n == 0 {
        return SynthesisStrategy::Empty;
    }

    let mut diversity_score = diversity(retained);
    if quantum_routing_requested {
        diversity_score = quantum_nudge(diversity_score, input_hash);
    }

    let confidences: Vec<f64> = retained.iter().map(|r| r.response.confidence).collect();
    let mean_confidence = mean(&confidences);
    let confidence_variance = variance(&confidences);

    if n >= 5 && diversity_score > 0.7 {
        SynthesisStrategy::ConsensusClustering
    } else if mean_confidence > 0.8 && confidence_variance < 0.1 {
        SynthesisStrategy::WeightedEnsemble
    } else if matches!(domain, Domain::AiEthics | Domain::QuantumSecurity) && n >= 3 {
        SynthesisStrategy::AdvancedBayesian
    } else {
        SynthesisStrategy::Hybrid
    }
}

/// Invoke every provider concurrently, bounded by `worker_pool_size`
/// simultaneous in-flight calls, under a single shared cohort deadline.
/// Providers still running when the deadline elapses are reported as
/// `deadline_exceeded`; a slow provider never blocks or cancels a fast one.
pub async fn dispatch_parallel(
    providers: &[Arc<dyn ProviderAdapter>],
    prompt: &str,
    input_hash: &str,
    deadline: Duration,
    cancel: CancelSignal,
    worker_pool_size: usize,
) -> Vec<ProviderResponse> {
    if providers.is_empty() {
        return Vec::new();
    }

    let semaphore = Arc::new(Semaphore::new(worker_pool_size.max(1)));
    let deadline_instant = Instant::now() + deadline;

    let handles: Vec<_> = providers
        .iter()
        .cloned()
        .enumerate()
        .map(|(index, provider)| {
            let semaphore = Arc::clone(&semaphore);
            let prompt = prompt.to_string();
            let input_hash = input_hash.to_string();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed unexpectedly");
                let remaining = deadline_instant.saturating_duration_since(Instant::now());
                let response = provider.invoke(&prompt, &input_hash, remaining, cancel).await;
                (index, response)
            })
        })
        .collect();

    let mut responses: Vec<Option<ProviderResponse>> = (0..providers.len()).map(|_| None).collect();
    if let Ok(joined) = tokio::time::timeout(deadline, join_all(handles)).await {
        for outcome in joined {
            if let Ok((index, response)) = outcome {
                responses[index] = Some(response);
            }
        }
    }

    responses
        .into_iter()
        .enumerate()
        .map(|(index, maybe)| {
            maybe.unwrap_or_else(|| {
                ProviderResponse::failure(providers[index].name(), ProviderErrorKind::DeadlineExceeded, deadline)
            })
        })
        .collect()
}

fn build_chain_prompt(original_input: &str, prior: Option<&ProviderResponse>) -> String {
    match prior {
        None => original_input.to_string(),
        Some(p) => {
            let scores_json = serde_json::to_string(&p.scores).unwrap_or_default();
            format!("{original_input}\n\nPrior analysis from {}: {scores_json}", p.provider_name)
        }
    }
}

/// Invoke providers one at a time, in descending reliability-weight order.
/// Each step's prompt is augmented with the last *successful* prior
/// analysis; failed steps do not break the chain. Stops early once
/// 3 successes have accumulated and the most recent response's confidence
/// exceeds 0.8, or when the caller cancels or the deadline elapses.
pub async fn dispatch_chain(
    mut ordered: Vec<(Arc<dyn ProviderAdapter>, f64)>,
    original_input: &str,
    input_hash: &str,
    deadline: Duration,
    cancel: CancelSignal,
) -> Vec<ProviderResponse> {
    ordered.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let deadline_instant = Instant::now() + deadline;

    let mut responses = Vec::with_capacity(ordered.len());
    let mut success_count = 0usize;
    let mut last_success: Option<ProviderResponse> = None;

    for (adapter, _) in ordered {
        if *cancel.borrow() {
            break;
        }
        let remaining = deadline_instant.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }

        let prompt = build_chain_prompt(original_input, last_success.as_ref());
        let response = adapter.invoke(&prompt, input_hash, remaining, cancel.clone()).await;
        let confidence = response.confidence;

        if response.success {
            success_count += 1;
            last_success = Some(response.clone());
        }
        responses.push(response);

        if success_count >= 3 && confidence > 0.8 {
            break;
        }
    }

    responses
}
