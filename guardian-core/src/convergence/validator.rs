//! Response Validator: rejects malformed responses before they
//! reach the bias/poisoning filters. Produces no transformed data beyond
//! a retained/rejected verdict — normalization already happened in the
//! Provider Adapter.

use crate::convergence::model::ProviderResponse;

/// Outcome of validating one `ProviderResponse`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Valid,
    Rejected(&'static str),
}

/// Validate a single provider response. Non-blocking, no I/O.
pub fn validate(response: &ProviderResponse) -> ValidationOutcome {
    if !response.success {
        return ValidationOutcome::Rejected("provider_failure");
    }
    if response.scores.is_empty() {
        return ValidationOutcome::Rejected("empty_score_map");
    }
    if !(0.0..=1.0).contains(&response.confidence) {
        return ValidationOutcome::Rejected("confidence_out_of_range");
    }
    ValidationOutcome::Valid
}
