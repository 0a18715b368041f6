//! Training Sink: captures high-quality (input, output, quality)
//! triples for later recursive training, gated by a strict quality
//! threshold. Uses the same `rusqlite`-backed append-only idiom as
//! `audit::AuditLog`, but with its own table and lock, off the request's
//! critical path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{params, Connection};

use crate::convergence::model::ValidatedSample;
use crate::error::{Error, Result};

/// Capture iff `consensus_strength ≥ 0.7 ∧ bias_mitigation ≥ 0.7 ∧
/// poisoning_resistance ≥ 0.75`.
pub fn meets_capture_threshold(consensus_strength: f64, bias_mitigation: f64, poisoning_resistance: f64) -> bool {
    consensus_strength >= 0.7 && bias_mitigation >= 0.7 && poisoning_resistance >= 0.75
}

/// `1 - mean(bias_scores_of_retained)`, and analogously for poisoning.
pub fn mitigation_score(per_response_scores: &[f64]) -> f64 {
    if per_response_scores.is_empty() {
        return 1.0;
    }
    1.0 - (per_response_scores.iter().sum::<f64>() / per_response_scores.len() as f64)
}

/// Append-only store of captured training samples.
pub struct TrainingSink {
    conn: Arc<Mutex<Connection>>,
}

impl TrainingSink {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::MemoryStorage(e.to_string()))?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::MemoryStorage(e.to_string()))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS validated_samples (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                input_text TEXT NOT NULL,
                synthesized_output TEXT NOT NULL,
                confidence REAL NOT NULL,
                bias_mitigation REAL NOT NULL,
                poisoning_resistance REAL NOT NULL,
                captured_at TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| Error::MemoryStorage(e.to_string()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("failed to lock training sink connection: {e}")))?;
        f(&conn).map_err(|e| Error::MemoryStorage(e.to_string()))
    }

    /// Capture a sample iff it meets the quality threshold. Returns
    /// `Ok(true)` if captured, `Ok(false)` if below threshold.
    pub fn maybe_capture(
        &self,
        input_text: &str,
        synthesized_output: &HashMap<String, f64>,
        confidence: f64,
        consensus_strength: f64,
        bias_mitigation: f64,
        poisoning_resistance: f64,
    ) -> Result<bool> {
        if !meets_capture_threshold(consensus_strength, bias_mitigation, poisoning_resistance) {
            return Ok(false);
        }

        let captured_at = Utc::now();
        let output_json = serde_json::to_string(synthesized_output).unwrap_or_default();

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO validated_samples (
                    input_text, synthesized_output, confidence, bias_mitigation,
                    poisoning_resistance, captured_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    input_text,
                    output_json,
                    confidence,
                    bias_mitigation,
                    poisoning_resistance,
                    captured_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })?;

        Ok(true)
    }

    /// Total number of captured samples.
    pub fn count(&self) -> Result<u64> {
        self.with_conn(|conn| conn.query_row("SELECT COUNT(*) FROM validated_samples", [], |row| row.get(0)))
    }

    /// The most recently captured samples, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<ValidatedSample>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT input_text, synthesized_output, confidence, bias_mitigation,
                        poisoning_resistance, captured_at
                 FROM validated_samples ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit as i64], |row| {
                let output_json: String = row.get(1)?;
                let captured_at_str: String = row.get(5)?;
                Ok(ValidatedSample {
                    input_text: row.get(0)?,
                    synthesized_output: serde_json::from_str(&output_json).unwrap_or_default(),
                    confidence: row.get(2)?,
                    bias_mitigation: row.get(3)?,
                    poisoning_resistance: row.get(4)?,
                    captured_at: chrono::DateTime::parse_from_rfc3339(&captured_at_str)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                })
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_requires_all_three_conditions() {
        assert!(meets_capture_threshold(0.7, 0.7, 0.75));
        assert!(!meets_capture_threshold(0.69, 0.9, 0.9));
        assert!(!meets_capture_threshold(0.9, 0.69, 0.9));
        assert!(!meets_capture_threshold(0.9, 0.9, 0.74));
    }

    #[test]
    fn mitigation_score_of_no_bias_is_one() {
        assert_eq!(mitigation_score(&[]), 1.0);
        assert_eq!(mitigation_score(&[0.0, 0.0]), 1.0);
    }

    #[test]
    fn below_threshold_sample_is_not_captured() {
        let sink = TrainingSink::in_memory().unwrap();
        let captured = sink
            .maybe_capture("input", &HashMap::new(), 0.5, 0.5, 0.5, 0.5)
            .unwrap();
        assert!(!captured);
        assert_eq!(sink.count().unwrap(), 0);
    }

    #[test]
    fn above_threshold_sample_is_captured_and_retrievable() {
        let sink = TrainingSink::in_memory().unwrap();
        let output = HashMap::from([("completeness".to_string(), 90.0)]);
        let captured = sink
            .maybe_capture("good input", &output, 0.9, 0.8, 0.8, 0.8)
            .unwrap();
        assert!(captured);
        assert_eq!(sink.count().unwrap(), 1);

        let recent = sink.recent(5).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].input_text, "good input");
    }
}
