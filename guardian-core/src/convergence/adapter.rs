//! Provider Adapter: a uniform interface over one external
//! inference source, narrowed to the convergence engine's request shape
//! and never propagating errors across the trait boundary.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::watch;

use crate::convergence::hash::provenance_hash;
use crate::convergence::model::{ProviderErrorKind, ProviderResponse};

/// A cooperative cancellation signal, checked between I/O operations.
pub type CancelSignal = watch::Receiver<bool>;

/// Required of every provider adapter.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Stable provider name, matching its `ProviderDescriptor`.
    fn name(&self) -> &str;

    /// Invoke the provider. Must honor `deadline` and never return `Err`
    /// for provider-side failures — those are encoded in the returned
    /// `ProviderResponse`.
    async fn invoke(
        &self,
        prompt: &str,
        input_hash: &str,
        deadline: Duration,
        cancel: CancelSignal,
    ) -> ProviderResponse;

    /// Capability tags advertised by this provider.
    fn capabilities(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Normalize a raw numeric metric into [0, 100] (response
/// normalization): values in [0,1] are scaled up, values above 100 are
/// clamped, negatives clamp to 0.
pub fn normalize_score(raw: f64) -> f64 {
    let scaled = if (0.0..=1.0).contains(&raw) {
        raw * 100.0
    } else {
        raw
    };
    scaled.clamp(0.0, 100.0)
}

/// Extract and normalize the numeric metric map from an arbitrary JSON
/// value, dropping non-numeric entries.
pub fn scores_from_json(value: &Value) -> HashMap<String, f64> {
    let mut scores = HashMap::new();
    if let Value::Object(map) = value {
        for (key, v) in map {
            if let Some(n) = v.as_f64() {
                scores.insert(key.clone(), normalize_score(n));
            }
        }
    }
    scores
}

fn is_cancelled(cancel: &CancelSignal) -> bool {
    *cancel.borrow()
}

/// Generic JSON-over-HTTP adapter for remote scoring services (patent-scored
/// document evaluators and generic LLM completion endpoints alike).
pub struct HttpProviderAdapter {
    name: String,
    endpoint: String,
    headers: HashMap<String, String>,
    http: reqwest::Client,
    capabilities: Vec<String>,
}

impl HttpProviderAdapter {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            headers: HashMap::new(),
            http: reqwest::Client::new(),
            capabilities: Vec::new(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }
}

#[async_trait]
impl ProviderAdapter for HttpProviderAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Vec<String> {
        self.capabilities.clone()
    }

    async fn invoke(
        &self,
        prompt: &str,
        input_hash: &str,
        deadline: Duration,
        cancel: CancelSignal,
    ) -> ProviderResponse {
        let start = Instant::now();

        if is_cancelled(&cancel) {
            return ProviderResponse::failure(&self.name, ProviderErrorKind::Unavailable, start.elapsed());
        }

        let mut req = self.http.post(&self.endpoint).json(&serde_json::json!({
            "prompt": prompt,
        }));
        for (k, v) in &self.headers {
            req = req.header(k, v);
        }

        let call = req.send();
        let outcome = tokio::time::timeout(deadline, call).await;

        let elapsed = start.elapsed();
        let response = match outcome {
            Err(_) => {
                return ProviderResponse::failure(&self.name, ProviderErrorKind::DeadlineExceeded, elapsed);
            }
            Ok(Err(_)) => {
                return ProviderResponse::failure(&self.name, ProviderErrorKind::Unavailable, elapsed);
            }
            Ok(Ok(resp)) => resp,
        };

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return ProviderResponse::failure(&self.name, ProviderErrorKind::AuthMissing, elapsed);
        }
        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return ProviderResponse::failure(&self.name, ProviderErrorKind::RateLimited, elapsed);
        }
        if !response.status().is_success() {
            return ProviderResponse::failure(&self.name, ProviderErrorKind::RemoteError, elapsed);
        }

        let body: Value = match response.json().await {
            Ok(v) => v,
            Err(_) => {
                return ProviderResponse::failure(&self.name, ProviderErrorKind::Malformed, elapsed);
            }
        };

        build_success_response(&self.name, input_hash, &body, elapsed)
    }
}

fn build_success_response(
    name: &str,
    input_hash: &str,
    body: &Value,
    elapsed: Duration,
) -> ProviderResponse {
    let raw_text = body
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let scores = body
        .get("scores")
        .map(scores_from_json)
        .unwrap_or_default();
    let confidence = body
        .get("confidence")
        .and_then(Value::as_f64)
        .unwrap_or(0.5)
        .clamp(0.0, 1.0);

    let timestamp = Utc::now();
    let prov_hash = provenance_hash(name, input_hash, &raw_text, &timestamp.to_rfc3339());

    ProviderResponse {
        provider_name: name.to_string(),
        raw_text: Some(raw_text),
        scores,
        confidence,
        elapsed,
        success: true,
        error_kind: None,
        provenance_hash: Some(prov_hash),
    }
}

/// A local, synchronous (or already-async) scoring function, wrapped as a
/// `ProviderAdapter`. Used for deterministic, in-process providers — e.g.
/// the patent-scored document evaluators when co-located with the engine.
pub struct InProcessProviderAdapter<F> {
    name: String,
    capabilities: Vec<String>,
    scorer: F,
}

/// Trait object alias for a boxed in-process scorer.
#[async_trait]
pub trait InProcessScorer: Send + Sync {
    async fn score(&self, prompt: &str) -> (String, HashMap<String, f64>, f64);
}

impl<F> InProcessProviderAdapter<F>
where
    F: InProcessScorer,
{
    pub fn new(name: impl Into<String>, scorer: F) -> Self {
        Self {
            name: name.into(),
            capabilities: Vec::new(),
            scorer,
        }
    }

    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }
}

#[async_trait]
impl<F> ProviderAdapter for InProcessProviderAdapter<F>
where
    F: InProcessScorer,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Vec<String> {
        self.capabilities.clone()
    }

    async fn invoke(
        &self,
        prompt: &str,
        input_hash: &str,
        deadline: Duration,
        cancel: CancelSignal,
    ) -> ProviderResponse {
        let start = Instant::now();
        if is_cancelled(&cancel) {
            return ProviderResponse::failure(&self.name, ProviderErrorKind::Unavailable, start.elapsed());
        }

        let outcome = tokio::time::timeout(deadline, self.scorer.score(prompt)).await;
        let elapsed = start.elapsed();
        let (raw_text, scores, confidence) = match outcome {
            Ok(v) => v,
            Err(_) => {
                return ProviderResponse::failure(&self.name, ProviderErrorKind::DeadlineExceeded, elapsed);
            }
        };

        let normalized: HashMap<String, f64> = scores
            .into_iter()
            .map(|(k, v)| (k, normalize_score(v)))
            .collect();
        let timestamp = Utc::now();
        let prov_hash = provenance_hash(&self.name, input_hash, &raw_text, &timestamp.to_rfc3339());

        ProviderResponse {
            provider_name: self.name.clone(),
            raw_text: Some(raw_text),
            scores: normalized,
            confidence: confidence.clamp(0.0, 1.0),
            elapsed,
            success: true,
            error_kind: None,
            provenance_hash: Some(prov_hash),
        }
    }
}

/// Deterministic, configurable test double: scripted responses, optional
/// latency, and failure injection.
pub struct MockProviderAdapter {
    name: String,
    scores: HashMap<String, f64>,
    confidence: f64,
    raw_text: String,
    latency: Duration,
    fail_with: Option<ProviderErrorKind>,
    invocation_count: Arc<AtomicBool>,
}

impl MockProviderAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scores: HashMap::new(),
            confidence: 0.8,
            raw_text: String::new(),
            latency: Duration::from_millis(0),
            fail_with: None,
            invocation_count: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_scores(mut self, scores: HashMap<String, f64>) -> Self {
        self.scores = scores;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_raw_text(mut self, text: impl Into<String>) -> Self {
        self.raw_text = text.into();
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_failure(mut self, kind: ProviderErrorKind) -> Self {
        self.fail_with = Some(kind);
        self
    }

    pub fn was_invoked(&self) -> bool {
        self.invocation_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for MockProviderAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(
        &self,
        _prompt: &str,
        input_hash: &str,
        deadline: Duration,
        cancel: CancelSignal,
    ) -> ProviderResponse {
        self.invocation_count.store(true, Ordering::SeqCst);
        let start = Instant::now();

        if is_cancelled(&cancel) {
            return ProviderResponse::failure(&self.name, ProviderErrorKind::Unavailable, start.elapsed());
        }

        if self.latency > Duration::ZERO {
            if tokio::time::timeout(deadline, tokio::time::sleep(self.latency))
                .await
                .is_err()
            {
                return ProviderResponse::failure(
                    &self.name,
                    ProviderErrorKind::DeadlineExceeded,
                    start.elapsed(),
                );
            }
        }

        if let Some(kind) = self.fail_with {
            return ProviderResponse::failure(&self.name, kind, start.elapsed());
        }

        let timestamp = Utc::now();
        let prov_hash = provenance_hash(&self.name, input_hash, &self.raw_text, &timestamp.to_rfc3339());

        ProviderResponse {
            provider_name: self.name.clone(),
            raw_text: Some(self.raw_text.clone()),
            scores: self.scores.clone(),
            confidence: self.confidence,
            elapsed: start.elapsed(),
            success: true,
            error_kind: None,
            provenance_hash: Some(prov_hash),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_score_scales_unit_interval() {
        assert_eq!(normalize_score(0.8), 80.0);
        assert_eq!(normalize_score(0.0), 0.0);
    }

    #[test]
    fn normalize_score_clamps_above_100() {
        assert_eq!(normalize_score(150.0), 100.0);
    }

    #[test]
    fn normalize_score_clamps_negative() {
        assert_eq!(normalize_score(-5.0), 0.0);
    }

    #[tokio::test]
    async fn mock_adapter_returns_scripted_response() {
        let (_tx, rx) = watch::channel(false);
        let adapter = MockProviderAdapter::new("mock-a")
            .with_scores(HashMap::from([("completeness".to_string(), 80.0)]))
            .with_confidence(0.9);

        let response = adapter
            .invoke("prompt", "hash", Duration::from_secs(1), rx)
            .await;

        assert!(response.success);
        assert_eq!(response.confidence, 0.9);
        assert_eq!(response.scores.get("completeness"), Some(&80.0));
        assert!(response.provenance_hash.is_some());
    }

    #[tokio::test]
    async fn mock_adapter_honors_cancellation() {
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let adapter = MockProviderAdapter::new("mock-b");

        let response = adapter
            .invoke("prompt", "hash", Duration::from_secs(1), rx)
            .await;

        assert!(!response.success);
        assert_eq!(response.error_kind, Some(ProviderErrorKind::Unavailable));
    }

    #[tokio::test]
    async fn mock_adapter_deadline_exceeded_on_slow_latency() {
        let (_tx, rx) = watch::channel(false);
        let adapter = MockProviderAdapter::new("mock-c").with_latency(Duration::from_millis(50));

        let response = adapter
            .invoke("prompt", "hash", Duration::from_millis(5), rx)
            .await;

        assert!(!response.success);
        assert_eq!(response.error_kind, Some(ProviderErrorKind::DeadlineExceeded));
    }

    #[tokio::test]
    async fn mock_adapter_injected_failure_kind_is_surfaced() {
        let (_tx, rx) = watch::channel(false);
        let adapter = MockProviderAdapter::new("mock-d").with_failure(ProviderErrorKind::RateLimited);

        let response = adapter
            .invoke("prompt", "hash", Duration::from_secs(1), rx)
            .await;

        assert!(!response.success);
        assert_eq!(response.error_kind, Some(ProviderErrorKind::RateLimited));
    }
}
