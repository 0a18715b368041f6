//! Audit Log: an append-only, hash-chained record of every evaluation.
//! Backed by an `Arc<Mutex<Connection>>` with an `open`/`in_memory`
//! constructor pair and a `with_conn` closure helper, narrowed to a single
//! `audit_records` table with one append lock.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::convergence::hash::sha256_hex;
use crate::convergence::model::{AuditRecord, SynthesisStrategy};
use crate::error::{Error, Result};

const SCHEMA_VERSION: u32 = 1;

/// Append-only audit store. Concurrent writers serialize at `append` only;
/// nothing upstream of it holds this lock.
pub struct AuditLog {
    conn: Arc<Mutex<Connection>>,
}

impl AuditLog {
    /// Open or create an audit log at the given path.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::MemoryStorage(e.to_string()))?;
        Self::from_connection(conn)
    }

    /// Create an in-memory audit log (the default test backend).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::MemoryStorage(e.to_string()))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS audit_records (
                sequence INTEGER PRIMARY KEY AUTOINCREMENT,
                schema_version INTEGER NOT NULL,
                id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                input_hash TEXT NOT NULL,
                participating_providers TEXT NOT NULL,
                filtered_providers TEXT NOT NULL,
                strategy TEXT NOT NULL,
                consensus_strength REAL NOT NULL,
                bias_mean REAL NOT NULL,
                poisoning_mean REAL NOT NULL,
                quantum_routing_applied INTEGER NOT NULL,
                all_failed INTEGER NOT NULL,
                reason TEXT,
                prev_hash TEXT,
                record_hash TEXT NOT NULL
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
            .map_err(|e| Error::Internal(format!("failed to lock audit log connection: {e}")))?;
        f(&conn).map_err(|e| Error::MemoryStorage(e.to_string()))
    }

    /// Append a new record, linking it to the previous record's hash.
    /// Fields describing the record are taken verbatim; `id`, `sequence`,
    /// `timestamp`, `prev_hash`, and `record_hash` are computed here.
    #[allow(clippy::too_many_arguments)]
    pub fn append(
        &self,
        input_hash: String,
        participating_providers: Vec<String>,
        filtered_providers: Vec<(String, String)>,
        strategy: SynthesisStrategy,
        consensus_strength: f64,
        bias_mean: f64,
        poisoning_mean: f64,
        quantum_routing_applied: bool,
        all_failed: bool,
        reason: Option<String>,
    ) -> Result<AuditRecord> {
        self.with_conn(|conn| {
            let prev_hash: Option<String> = conn
                .query_row(
                    "SELECT record_hash FROM audit_records ORDER BY sequence DESC LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()?;

            let id = Uuid::new_v4();
            let timestamp = Utc::now();
            let participating_json = serde_json::to_string(&participating_providers).unwrap_or_default();
            let filtered_json = serde_json::to_string(&filtered_providers).unwrap_or_default();
            let strategy_str = strategy.to_string();

            let chain_input = format!(
                "{}\x1e{}\x1e{}\x1e{}\x1e{}\x1e{}\x1e{}",
                prev_hash.as_deref().unwrap_or(""),
                id,
                input_hash,
                strategy_str,
                consensus_strength,
                bias_mean,
                poisoning_mean
            );
            let record_hash = sha256_hex(chain_input.as_bytes());

            conn.execute(
                "INSERT INTO audit_records (
                    schema_version, id, timestamp, input_hash, participating_providers,
                    filtered_providers, strategy, consensus_strength, bias_mean, poisoning_mean,
                    quantum_routing_applied, all_failed, reason, prev_hash, record_hash
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    SCHEMA_VERSION,
                    id.to_string(),
                    timestamp.to_rfc3339(),
                    input_hash,
                    participating_json,
                    filtered_json,
                    strategy_str,
                    consensus_strength,
                    bias_mean,
                    poisoning_mean,
                    quantum_routing_applied,
                    all_failed,
                    reason,
                    prev_hash,
                    record_hash,
                ],
            )?;

            let sequence = conn.last_insert_rowid() as u64;

            Ok(AuditRecord {
                schema_version: SCHEMA_VERSION,
                id,
                sequence,
                timestamp,
                input_hash,
                participating_providers,
                filtered_providers,
                strategy,
                consensus_strength,
                bias_mean,
                poisoning_mean,
                quantum_routing_applied,
                all_failed,
                reason,
                prev_hash,
                record_hash,
            })
        })
    }

    /// The most recent `n` records, oldest first.
    pub fn tail(&self, n: usize) -> Result<Vec<AuditRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT schema_version, id, sequence, timestamp, input_hash, participating_providers,
                        filtered_providers, strategy, consensus_strength, bias_mean, poisoning_mean,
                        quantum_routing_applied, all_failed, reason, prev_hash, record_hash
                 FROM audit_records ORDER BY sequence DESC LIMIT ?1",
            )?;

            let rows = stmt.query_map(params![n as i64], Self::row_to_record)?;
            let mut records: Vec<AuditRecord> = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            records.reverse();
            Ok(records)
        })
    }

    /// Recompute each record's chain hash from its fields and confirm it
    /// both matches the stored `record_hash` and links to the previous
    /// record's hash. Works over any prefix of the log, since each record's
    /// hash only depends on fields already present when it was appended.
    pub fn verify_chain(&self) -> Result<bool> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, input_hash, strategy, consensus_strength, bias_mean, poisoning_mean,
                        prev_hash, record_hash
                 FROM audit_records ORDER BY sequence ASC",
            )?;
            let rows = stmt.query_map([], |row| {
                let id: String = row.get(0)?;
                let input_hash: String = row.get(1)?;
                let strategy: String = row.get(2)?;
                let consensus_strength: f64 = row.get(3)?;
                let bias_mean: f64 = row.get(4)?;
                let poisoning_mean: f64 = row.get(5)?;
                let prev_hash: Option<String> = row.get(6)?;
                let record_hash: String = row.get(7)?;
                Ok((id, input_hash, strategy, consensus_strength, bias_mean, poisoning_mean, prev_hash, record_hash))
            })?;

            let mut expected_prev: Option<String> = None;
            for row in rows {
                let (id, input_hash, strategy, consensus_strength, bias_mean, poisoning_mean, prev_hash, record_hash) = row?;
                if prev_hash != expected_prev {
                    return Ok(false);
                }
                let chain_input = format!(
                    "{}\x1e{}\x1e{}\x1e{}\x1e{}\x1e{}\x1e{}",
                    prev_hash.as_deref().unwrap_or(""),
                    id,
                    input_hash,
                    strategy,
                    consensus_strength,
                    bias_mean,
                    poisoning_mean
                );
                if sha256_hex(chain_input.as_bytes()) != record_hash {
                    return Ok(false);
                }
                expected_prev = Some(record_hash);
            }
            Ok(true)
        })
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<AuditRecord> {
        let id_str: String = row.get(1)?;
        let timestamp_str: String = row.get(3)?;
        let participating_json: String = row.get(5)?;
        let filtered_json: String = row.get(6)?;
        let strategy_str: String = row.get(7)?;

        Ok(AuditRecord {
            schema_version: row.get(0)?,
            id: Uuid::parse_str(&id_str).unwrap_or_default(),
            sequence: row.get(2)?,
            timestamp: chrono::DateTime::parse_from_rfc3339(&timestamp_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            input_hash: row.get(4)?,
            participating_providers: serde_json::from_str(&participating_json).unwrap_or_default(),
            filtered_providers: serde_json::from_str(&filtered_json).unwrap_or_default(),
            strategy: parse_strategy(&strategy_str),
            consensus_strength: row.get(8)?,
            bias_mean: row.get(9)?,
            poisoning_mean: row.get(10)?,
            quantum_routing_applied: row.get(11)?,
            all_failed: row.get(12)?,
            reason: row.get(13)?,
            prev_hash: row.get(14)?,
            record_hash: row.get(15)?,
        })
    }
}

fn parse_strategy(value: &str) -> SynthesisStrategy {
    match value {
        "advanced_bayesian" => SynthesisStrategy::AdvancedBayesian,
        "consensus_clustering" => SynthesisStrategy::ConsensusClustering,
        "weighted_ensemble" => SynthesisStrategy::WeightedEnsemble,
        "hybrid" => SynthesisStrategy::Hybrid,
        "empty" => SynthesisStrategy::Empty,
        _ => SynthesisStrategy::Auto,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn append_one(log: &AuditLog, input_hash: &str) -> AuditRecord {
        log.append(
            input_hash.to_string(),
            vec!["openai".to_string()],
            Vec::new(),
            SynthesisStrategy::Hybrid,
            0.8,
            0.0,
            0.0,
            false,
            false,
            None,
        )
        .unwrap()
    }

    #[test]
    fn first_record_has_no_prev_hash() {
        let log = AuditLog::in_memory().unwrap();
        let record = append_one(&log, "hash-1");
        assert!(record.prev_hash.is_none());
    }

    #[test]
    fn second_record_chains_to_the_first() {
        let log = AuditLog::in_memory().unwrap();
        let first = append_one(&log, "hash-1");
        let second = append_one(&log, "hash-2");
        assert_eq!(second.prev_hash.as_deref(), Some(first.record_hash.as_str()));
    }

    #[test]
    fn tail_returns_records_oldest_first() {
        let log = AuditLog::in_memory().unwrap();
        append_one(&log, "hash-1");
        append_one(&log, "hash-2");
        append_one(&log, "hash-3");

        let tail = log.tail(2).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].input_hash, "hash-2");
        assert_eq!(tail[1].input_hash, "hash-3");
    }

    #[test]
    fn sequence_numbers_increase_monotonically() {
        let log = AuditLog::in_memory().unwrap();
        let first = append_one(&log, "hash-1");
        let second = append_one(&log, "hash-2");
        assert!(second.sequence > first.sequence);
    }

    #[test]
    fn chain_verifies_over_any_prefix() {
        let log = AuditLog::in_memory().unwrap();
        assert!(log.verify_chain().unwrap());
        append_one(&log, "hash-1");
        assert!(log.verify_chain().unwrap());
        append_one(&log, "hash-2");
        append_one(&log, "hash-3");
        assert!(log.verify_chain().unwrap());
    }

    #[test]
    fn chain_verification_fails_on_tampered_record() {
        let log = AuditLog::in_memory().unwrap();
        append_one(&log, "hash-1");
        append_one(&log, "hash-2");
        {
            let conn = log.conn.lock().unwrap();
            conn.execute("UPDATE audit_records SET input_hash = 'tampered' WHERE sequence = 1", [])
                .unwrap();
        }
        assert!(!log.verify_chain().unwrap());
    }
}
