//! Bias Detector: deterministic, lexical scoring against a
//! configurable category → token-list table. No network I/O.

use crate::convergence::config::BiasConfig;

/// Score response text for bias, using the given hot-reloaded table.
///
/// `score = min(1, matches / max(1, word_count))`, case-insensitive,
/// O(N) in text length.
pub fn bias_score(text: &str, config: &BiasConfig) -> f64 {
    let lower = text.to_lowercase();
    let word_count = lower.split_whitespace().count().max(1);

    let matches: usize = config
        .categories
        .values()
        .flatten()
        .filter(|phrase| lower.contains(phrase.to_lowercase().as_str()))
        .count();

    (matches as f64 / word_count as f64).min(1.0)
}
