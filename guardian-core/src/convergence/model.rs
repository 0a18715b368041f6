//! Core data model for the convergence pipeline: requests, provider
//! responses, filtered cohorts, synthesis output, and the audit/training
//! records derived from them.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Domain tag attached to a request, used to select synthesis priors and
/// bias the auto strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    AiEthics,
    QuantumSecurity,
    Cybersecurity,
    Generic,
}

impl Default for Domain {
    fn default() -> Self {
        Self::Generic
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AiEthics => write!(f, "ai_ethics"),
            Self::QuantumSecurity => write!(f, "quantum_security"),
            Self::Cybersecurity => write!(f, "cybersecurity"),
            Self::Generic => write!(f, "generic"),
        }
    }
}

/// Dispatch mode requested by the caller or chosen by the Router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    Parallel,
    Chain,
    Auto,
}

impl Default for DispatchMode {
    fn default() -> Self {
        Self::Auto
    }
}

/// Synthesis strategy requested by the caller or chosen by the Router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisStrategy {
    AdvancedBayesian,
    ConsensusClustering,
    WeightedEnsemble,
    Hybrid,
    /// No responses survived to synthesize; produced only by the engine,
    /// never requested by a caller.
    Empty,
    Auto,
}

impl Default for SynthesisStrategy {
    fn default() -> Self {
        Self::Auto
    }
}

impl std::fmt::Display for SynthesisStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AdvancedBayesian => write!(f, "advanced_bayesian"),
            Self::ConsensusClustering => write!(f, "consensus_clustering"),
            Self::WeightedEnsemble => write!(f, "weighted_ensemble"),
            Self::Hybrid => write!(f, "hybrid"),
            Self::Empty => write!(f, "empty"),
            Self::Auto => write!(f, "auto"),
        }
    }
}

/// Classification of a provider-level failure. Never escapes a
/// `ProviderAdapter::invoke` call as a Rust `Err` — it is always carried
/// inside a `ProviderResponse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    DeadlineExceeded,
    Unavailable,
    RateLimited,
    Malformed,
    RemoteError,
    AuthMissing,
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Unavailable => "unavailable",
            Self::RateLimited => "rate_limited",
            Self::Malformed => "malformed",
            Self::RemoteError => "remote_error",
            Self::AuthMissing => "auth_missing",
        };
        write!(f, "{s}")
    }
}

/// Options accompanying an `evaluate` call.
#[derive(Debug, Clone)]
pub struct EvaluateOptions {
    pub dispatch_mode: DispatchMode,
    pub strategy: SynthesisStrategy,
    pub target_confidence: f64,
    pub deadline: Duration,
    pub provider_allow_list: Option<Vec<String>>,
    /// Caller opt-in for the feature-flagged quantum-routing hook.
    /// Ignored unless the crate is built with the `quantum-routing` feature.
    pub quantum_routing: bool,
}

impl Default for EvaluateOptions {
    fn default() -> Self {
        Self {
            dispatch_mode: DispatchMode::Auto,
            strategy: SynthesisStrategy::Auto,
            target_confidence: 0.85,
            deadline: Duration::from_secs(60),
            provider_allow_list: None,
            quantum_routing: false,
        }
    }
}

impl EvaluateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dispatch_mode(mut self, mode: DispatchMode) -> Self {
        self.dispatch_mode = mode;
        self
    }

    pub fn with_strategy(mut self, strategy: SynthesisStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_target_confidence(mut self, target: f64) -> Self {
        self.target_confidence = target.clamp(0.0, 1.0);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_provider_allow_list(mut self, providers: Vec<String>) -> Self {
        self.provider_allow_list = Some(providers);
        self
    }

    pub fn with_quantum_routing(mut self, enabled: bool) -> Self {
        self.quantum_routing = enabled;
        self
    }
}

/// A single evaluation request. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: Uuid,
    pub input_text: String,
    pub domain: Domain,
    pub options: EvaluateOptions,
    pub created_at: DateTime<Utc>,
}

impl Request {
    pub fn new(input_text: impl Into<String>, domain: Domain, options: EvaluateOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            input_text: input_text.into(),
            domain,
            options,
            created_at: Utc::now(),
        }
    }

    /// SHA-256 hash of the input text, used for provenance and audit linkage.
    pub fn input_hash(&self) -> String {
        crate::convergence::hash::sha256_hex(self.input_text.as_bytes())
    }
}

/// Static description of one provider, configured at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub name: String,
    pub capability_tags: Vec<String>,
    pub reliability_weight: f64,
    pub timeout: Duration,
    pub max_concurrent: usize,
    pub chainable: bool,
}

impl ProviderDescriptor {
    pub fn new(name: impl Into<String>, reliability_weight: f64) -> Self {
        Self {
            name: name.into(),
            capability_tags: Vec::new(),
            reliability_weight: reliability_weight.clamp(0.0, 1.0),
            timeout: Duration::from_secs(20),
            max_concurrent: 4,
            chainable: true,
        }
    }

    pub fn with_capability_tags(mut self, tags: Vec<String>) -> Self {
        self.capability_tags = tags;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    pub fn with_chainable(mut self, chainable: bool) -> Self {
        self.chainable = chainable;
        self
    }
}

/// A raw response from one provider, before bias/poisoning/outlier filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub provider_name: String,
    pub raw_text: Option<String>,
    /// Metric scores normalized into [0, 100].
    pub scores: HashMap<String, f64>,
    pub confidence: f64,
    pub elapsed: Duration,
    pub success: bool,
    pub error_kind: Option<ProviderErrorKind>,
    pub provenance_hash: Option<String>,
}

impl ProviderResponse {
    /// Build a failure response. Scores are always empty for failures.
    pub fn failure(provider_name: impl Into<String>, kind: ProviderErrorKind, elapsed: Duration) -> Self {
        Self {
            provider_name: provider_name.into(),
            raw_text: None,
            scores: HashMap::new(),
            confidence: 0.0,
            elapsed,
            success: false,
            error_kind: Some(kind),
            provenance_hash: None,
        }
    }
}

/// A `ProviderResponse` after bias/poisoning evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilteredResponse {
    pub response: ProviderResponse,
    pub bias_score: f64,
    pub poisoning_score: f64,
    pub retained: bool,
    pub rejection_reason: Option<String>,
}

impl FilteredResponse {
    pub fn provider_name(&self) -> &str {
        &self.response.provider_name
    }
}

/// Output of the Consensus Synthesizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisResult {
    pub per_metric_scores: HashMap<String, f64>,
    pub consensus_score: f64,
    pub strategy: SynthesisStrategy,
    pub disagreement: f64,
    pub consensus_strength: f64,
    pub outliers: Vec<String>,
}

impl SynthesisResult {
    pub fn empty() -> Self {
        Self {
            per_metric_scores: HashMap::new(),
            consensus_score: 0.0,
            strategy: SynthesisStrategy::Empty,
            disagreement: 1.0,
            consensus_strength: 0.0,
            outliers: Vec::new(),
        }
    }
}

/// Final, calibrated result returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvergenceResult {
    pub synthesis: SynthesisResult,
    pub confidence: f64,
    pub confidence_boosted: bool,
    pub contributing_providers: Vec<String>,
    pub filtered_providers: Vec<(String, String)>,
    pub audit_record_id: Uuid,
    pub emergency_fallback: bool,
    pub reason: Option<String>,
}

/// Append-only audit record. Hash-chained to its predecessor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub schema_version: u32,
    pub id: Uuid,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub input_hash: String,
    pub participating_providers: Vec<String>,
    pub filtered_providers: Vec<(String, String)>,
    pub strategy: SynthesisStrategy,
    pub consensus_strength: f64,
    pub bias_mean: f64,
    pub poisoning_mean: f64,
    pub quantum_routing_applied: bool,
    pub all_failed: bool,
    pub reason: Option<String>,
    pub prev_hash: Option<String>,
    pub record_hash: String,
}

/// An (input, output, quality) triple captured for later recursive training.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatedSample {
    pub input_text: String,
    pub synthesized_output: HashMap<String, f64>,
    pub confidence: f64,
    pub bias_mitigation: f64,
    pub poisoning_resistance: f64,
    pub captured_at: DateTime<Utc>,
}

/// Rolling per-provider usage statistics, surfaced via `get_analytics()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderUsageStats {
    pub call_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub total_elapsed_ms: u64,
}

impl ProviderUsageStats {
    pub fn record(&mut self, success: bool, elapsed: Duration) {
        self.call_count += 1;
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        self.total_elapsed_ms += elapsed.as_millis() as u64;
    }

    pub fn average_elapsed_ms(&self) -> f64 {
        if self.call_count == 0 {
            0.0
        } else {
            self.total_elapsed_ms as f64 / self.call_count as f64
        }
    }
}

/// Snapshot of engine-wide analytics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyticsSnapshot {
    pub total_requests: u64,
    pub total_all_failed: u64,
    pub total_emergency_fallback: u64,
    pub total_training_samples: u64,
    pub average_confidence: f64,
    pub provider_usage: HashMap<String, ProviderUsageStats>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_input_hash_is_stable() {
        let req = Request::new("hello world", Domain::Generic, EvaluateOptions::default());
        let h1 = req.input_hash();
        let h2 = req.input_hash();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn synthesis_result_empty_has_zero_strength() {
        let result = SynthesisResult::empty();
        assert_eq!(result.strategy, SynthesisStrategy::Empty);
        assert_eq!(result.consensus_strength, 0.0);
        assert!(result.per_metric_scores.is_empty());
    }

    #[test]
    fn provider_usage_stats_average() {
        let mut stats = ProviderUsageStats::default();
        stats.record(true, Duration::from_millis(100));
        stats.record(false, Duration::from_millis(300));
        assert_eq!(stats.call_count, 2);
        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.failure_count, 1);
        assert_eq!(stats.average_elapsed_ms(), 200.0);
    }
}
