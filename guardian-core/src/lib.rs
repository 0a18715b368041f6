//! # guardian-core
//!
//! The Convergence Engine: GUARDIAN's concurrent multi-provider inference
//! orchestration core. A single input is dispatched to N heterogeneous
//! inference providers — in parallel or as a sequential "daisy-chain"
//! refinement — filtered through bias and prompt-injection detectors,
//! synthesized into a calibrated consensus result, and recorded as an
//! append-only, hash-chained audit trail.
//!
//! ## Core Components
//!
//! - **[`convergence::adapter`]**: uniform interface over one inference
//!   provider (HTTP, in-process, or test double).
//! - **[`convergence::bias`] / [`convergence::poisoning`]**: deterministic
//!   per-response scoring used to filter the cohort before synthesis.
//! - **[`convergence::router`]**: dispatch-mode and synthesis-strategy
//!   selection, plus parallel and daisy-chain dispatch.
//! - **[`convergence::synth`]**: the four consensus strategies (Bayesian,
//!   clustering, weighted ensemble, hybrid).
//! - **[`convergence::audit`] / [`convergence::training`]**: the append-only
//!   audit trail and gated recursive-training sample store.
//! - **[`convergence::engine`]**: the public `Engine` facade that composes
//!   everything above.
//!
//! ## Example
//!
//! ```rust,no_run
//! use guardian_core::{Domain, Engine, EvaluateOptions};
//!
//! # async fn run() -> guardian_core::Result<()> {
//! let engine = Engine::in_memory()?;
//! let result = engine
//!     .evaluate("draft policy text", Domain::Cybersecurity, EvaluateOptions::default())
//!     .await?;
//! println!("confidence: {}", result.confidence);
//! # Ok(())
//! # }
//! ```

pub mod convergence;
pub mod error;

pub use convergence::{
    calibrate, normalize_score, scores_from_json, AnalyticsSnapshot, AuditLog, AuditRecord, BiasConfig,
    CancelSignal, ConvergenceResult, Domain, DispatchMode, DomainPriors, Engine, EngineBuilder, EngineConfig,
    EnsembleBaseWeights, EvaluateOptions, FilteredResponse, HttpProviderAdapter, InProcessProviderAdapter,
    InProcessScorer, MetricPrior, MockProviderAdapter, PoisoningConfig, ProviderAdapter, ProviderDescriptor,
    ProviderErrorKind, ProviderResponse, ProviderUsageStats, Request, SynthesisResult, SynthesisStrategy,
    Thresholds, TrainingSink, ValidatedSample, ValidationOutcome,
};
pub use error::{Error, Result};
