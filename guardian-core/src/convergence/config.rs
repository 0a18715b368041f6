//! Hot-reloadable engine configuration: thresholds, bias/poisoning tables,
//! domain priors, and ensemble weights. Published as immutable snapshots
//! (read-shared, write-exclusive) so in-flight requests never observe a
//! partial reload.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::convergence::model::Domain;

/// A per-metric Gaussian prior used by the Bayesian synthesis strategy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MetricPrior {
    pub mean: f64,
    pub variance: f64,
}

impl MetricPrior {
    pub fn new(mean: f64, variance: f64) -> Self {
        Self { mean, variance }
    }
}

/// Bayesian priors, keyed by domain then metric name, with a `generic`
/// fallback row used for unknown domains or unknown metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainPriors {
    pub by_domain: HashMap<Domain, HashMap<String, MetricPrior>>,
    pub default: MetricPrior,
}

impl DomainPriors {
    pub fn prior_for(&self, domain: Domain, metric: &str) -> MetricPrior {
        self.by_domain
            .get(&domain)
            .and_then(|metrics| metrics.get(metric))
            .copied()
            .unwrap_or(self.default)
    }
}

impl Default for DomainPriors {
    fn default() -> Self {
        let mut by_domain = HashMap::new();

        by_domain.insert(
            Domain::AiEthics,
            HashMap::from([
                ("completeness".to_string(), MetricPrior::new(68.0, 15.0)),
                ("clarity".to_string(), MetricPrior::new(72.0, 12.0)),
                ("enforceability".to_string(), MetricPrior::new(65.0, 18.0)),
            ]),
        );
        by_domain.insert(
            Domain::QuantumSecurity,
            HashMap::from([
                ("completeness".to_string(), MetricPrior::new(75.0, 10.0)),
                ("clarity".to_string(), MetricPrior::new(70.0, 14.0)),
                ("enforceability".to_string(), MetricPrior::new(78.0, 8.0)),
            ]),
        );
        by_domain.insert(
            Domain::Cybersecurity,
            HashMap::from([
                ("completeness".to_string(), MetricPrior::new(80.0, 12.0)),
                ("clarity".to_string(), MetricPrior::new(75.0, 10.0)),
                ("enforceability".to_string(), MetricPrior::new(82.0, 9.0)),
            ]),
        );

        Self {
            by_domain,
            default: MetricPrior::new(70.0, 15.0),
        }
    }
}

/// Default base weights for the weighted-ensemble strategy, keyed by
/// provider name. A provider absent from this table falls back
/// to its own `ProviderDescriptor::reliability_weight`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleBaseWeights {
    pub by_provider: HashMap<String, f64>,
}

impl Default for EnsembleBaseWeights {
    fn default() -> Self {
        Self {
            by_provider: HashMap::from([
                ("openai".to_string(), 0.95),
                ("anthropic".to_string(), 0.95),
                ("groq".to_string(), 0.85),
                ("together_ai".to_string(), 0.80),
                ("perplexity".to_string(), 0.80),
                ("ollama".to_string(), 0.75),
                ("huggingface".to_string(), 0.70),
            ]),
        }
    }
}

/// Bias-category token table. Hot-reloadable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiasConfig {
    pub categories: HashMap<String, Vec<String>>,
}

impl Default for BiasConfig {
    fn default() -> Self {
        Self {
            categories: HashMap::from([
                (
                    "gender".to_string(),
                    vec![
                        "he is better".to_string(),
                        "she is worse".to_string(),
                        "men are".to_string(),
                        "women are".to_string(),
                    ],
                ),
                (
                    "racial".to_string(),
                    vec!["those people".to_string(), "race determines".to_string()],
                ),
                (
                    "political".to_string(),
                    vec!["all liberals".to_string(), "all conservatives".to_string()],
                ),
                (
                    "religious".to_string(),
                    vec!["heathens".to_string(), "infidels".to_string()],
                ),
            ]),
        }
    }
}

/// Poisoning-detector phrase table. Hot-reloadable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoisoningConfig {
    pub injection_phrases: Vec<String>,
}

impl Default for PoisoningConfig {
    fn default() -> Self {
        Self {
            injection_phrases: vec![
                "ignore previous".to_string(),
                "ignore previous instructions".to_string(),
                "forget instructions".to_string(),
                "disregard the above".to_string(),
                "jailbreak".to_string(),
                "you are now dan".to_string(),
                "system prompt:".to_string(),
            ],
        }
    }
}

/// Process-wide thresholds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Thresholds {
    pub bias_threshold: f64,
    pub poisoning_threshold: f64,
    pub consensus_threshold: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            bias_threshold: 0.3,
            poisoning_threshold: 0.25,
            consensus_threshold: 0.7,
        }
    }
}

/// Full configuration snapshot. Reloaded atomically via `reload_config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub thresholds: Thresholds,
    pub bias: BiasConfig,
    pub poisoning: PoisoningConfig,
    pub domain_priors: DomainPriors,
    pub ensemble_base_weights: EnsembleBaseWeights,
    #[serde(with = "duration_secs")]
    pub default_deadline: Duration,
    /// Multiplier applied to provider count to size the bounded worker
    /// pool; the pool is additionally capped at `max_worker_pool`.
    pub worker_pool_multiplier: usize,
    pub max_worker_pool: usize,
    pub quantum_routing_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            bias: BiasConfig::default(),
            poisoning: PoisoningConfig::default(),
            domain_priors: DomainPriors::default(),
            ensemble_base_weights: EnsembleBaseWeights::default(),
            default_deadline: Duration::from_secs(60),
            worker_pool_multiplier: 2,
            max_worker_pool: 64,
            quantum_routing_enabled: false,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration document from a JSON string.
    pub fn from_json(json: &str) -> crate::error::Result<Self> {
        serde_json::from_str(json).map_err(crate::error::Error::Serialization)
    }

    /// Worker pool size for the given number of configured providers.
    pub fn worker_pool_size(&self, provider_count: usize) -> usize {
        (provider_count * self.worker_pool_multiplier)
            .max(1)
            .min(self.max_worker_pool)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
