//! The Convergence Engine: a concurrent multi-provider inference
//! orchestrator that dispatches one input to N providers, filters their
//! responses for bias and prompt-injection, synthesizes a calibrated
//! consensus, and records an append-only, hash-chained audit trail.
//!
//! Module layout mirrors the pipeline order: [`adapter`] and
//! [`validator`] sit at the boundary with providers; [`bias`],
//! [`poisoning`], and [`outlier`] filter the cohort; [`synth`] and
//! [`calibrator`] produce the calibrated result; [`router`] decides
//! dispatch mode and strategy; [`audit`] and [`training`] persist the
//! outcome; [`engine`] composes all of it behind the public facade.

pub mod adapter;
pub mod audit;
pub mod bias;
pub mod calibrator;
pub mod config;
pub mod engine;
pub mod hash;
pub mod model;
pub mod outlier;
pub mod poisoning;
pub mod router;
pub mod stats;
pub mod synth;
pub mod training;
pub mod validator;

pub use adapter::{
    scores_from_json, normalize_score, CancelSignal, HttpProviderAdapter, InProcessProviderAdapter,
    InProcessScorer, MockProviderAdapter, ProviderAdapter,
};
pub use audit::AuditLog;
pub use calibrator::calibrate;
pub use config::{
    BiasConfig, DomainPriors, EngineConfig, EnsembleBaseWeights, MetricPrior, PoisoningConfig, Thresholds,
};
pub use engine::{Engine, EngineBuilder};
pub use model::{
    AnalyticsSnapshot, AuditRecord, ConvergenceResult, Domain, DispatchMode, EvaluateOptions, FilteredResponse,
    ProviderDescriptor, ProviderErrorKind, ProviderResponse, ProviderUsageStats, Request, SynthesisResult,
    SynthesisStrategy, ValidatedSample,
};
pub use training::TrainingSink;
pub use validator::ValidationOutcome;
