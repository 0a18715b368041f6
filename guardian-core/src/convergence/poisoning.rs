//! Poisoning Detector: additive, deterministic scoring for
//! prompt-injection phrases, template-escape sequences, and anomalous
//! casing.

use std::collections::HashSet;

use crate::convergence::config::PoisoningConfig;

/// Score response text for prompt-injection likelihood. Each
/// signal contributes additively; the final score clamps to 1.
pub fn poisoning_score(text: &str, config: &PoisoningConfig) -> f64 {
    let lower = text.to_lowercase();

    let unique_phrase_hits: HashSet<&String> = config
        .injection_phrases
        .iter()
        .filter(|phrase| lower.contains(phrase.to_lowercase().as_str()))
        .collect();
    let mut score = 0.2 * unique_phrase_hits.len() as f64;

    if text.contains("{{") || text.contains("}}") {
        score += 0.1;
    }

    let uppercase_count = text.chars().filter(|c| c.is_uppercase()).count();
    let alpha_count = text.chars().filter(|c| c.is_alphabetic()).count().max(1);
    if uppercase_count as f64 / alpha_count as f64 > 0.5 {
        score += 0.1;
    }

    score.min(1.0)
}
