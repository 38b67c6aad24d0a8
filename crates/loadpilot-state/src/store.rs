//! StateStore — redb-backed persistence of controller state.
//!
//! Holds the sections of a [`ControllerSnapshot`] in separate tables so
//! each can be inspected or replaced on its own. All values are
//! JSON-serialized into redb's `&[u8]` value columns. The store supports
//! both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;
use loadpilot_core::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

const ACTIVE_ALGORITHM_KEY: &str = "active_algorithm";
const SAVED_AT_KEY: &str = "saved_at";

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        for table in [
            ALLOCATIONS,
            ALGORITHMS,
            WEIGHTS,
            DECISIONS,
            EFFECTIVENESS,
            COMPLETIONS,
            META,
        ] {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Snapshot ───────────────────────────────────────────────────

    /// Replace all persisted state with `snapshot` in one transaction.
    pub fn save_snapshot(&self, snapshot: &ControllerSnapshot) -> StateResult<()> {
        let allocations = encode_rows(
            snapshot
                .current_allocations
                .iter()
                .map(|(k, v)| (k.clone(), v)),
        )?;
        let algorithms = encode_rows(
            snapshot
                .algorithm_performance
                .iter()
                .map(|(k, v)| (k.as_str().to_string(), v)),
        )?;
        let weights = encode_rows(
            snapshot
                .component_weights
                .iter()
                .map(|(k, v)| (k.clone(), v)),
        )?;
        let decisions = encode_rows(
            snapshot
                .recent_decisions
                .iter()
                .enumerate()
                .map(|(i, d)| (sequence_key(i), d)),
        )?;
        let effectiveness = encode_rows(
            snapshot
                .effectiveness_history
                .iter()
                .map(|(k, v)| (k.clone(), v)),
        )?;
        let completions = encode_rows(
            snapshot
                .completions
                .iter()
                .enumerate()
                .map(|(i, c)| (sequence_key(i), c)),
        )?;
        let mut meta = encode_rows([(SAVED_AT_KEY.to_string(), &snapshot.saved_at)])?;
        if let Some(algorithm) = &snapshot.active_algorithm {
            meta.extend(encode_rows([(ACTIVE_ALGORITHM_KEY.to_string(), algorithm)])?);
        }

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        for (table, rows) in [
            (ALLOCATIONS, &allocations),
            (ALGORITHMS, &algorithms),
            (WEIGHTS, &weights),
            (DECISIONS, &decisions),
            (EFFECTIVENESS, &effectiveness),
            (COMPLETIONS, &completions),
            (META, &meta),
        ] {
            txn.delete_table(table).map_err(map_err!(Table))?;
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            for (key, value) in rows {
                t.insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;

        debug!(
            allocations = allocations.len(),
            decisions = decisions.len(),
            completions = completions.len(),
            "controller snapshot saved"
        );
        Ok(())
    }

    /// Load the persisted snapshot. Rows that fail to decode are skipped.
    pub fn load_snapshot(&self) -> StateResult<ControllerSnapshot> {
        let mut snapshot = ControllerSnapshot {
            current_allocations: self.read_rows(ALLOCATIONS)?.into_iter().collect(),
            component_weights: self.read_rows(WEIGHTS)?.into_iter().collect(),
            effectiveness_history: self.read_rows(EFFECTIVENESS)?.into_iter().collect(),
            recent_decisions: self.read_values(DECISIONS)?,
            completions: self.read_values(COMPLETIONS)?,
            ..ControllerSnapshot::default()
        };

        for (key, perf) in self.read_rows::<AlgorithmPerformance>(ALGORITHMS)? {
            match key.parse::<Algorithm>() {
                Ok(algorithm) => {
                    snapshot.algorithm_performance.insert(algorithm, perf);
                }
                Err(e) => warn!(error = %e, "skipping persisted algorithm counters"),
            }
        }

        for (key, value) in self.read_raw(META)? {
            match key.as_str() {
                ACTIVE_ALGORITHM_KEY => snapshot.active_algorithm = decode(&key, &value),
                SAVED_AT_KEY => snapshot.saved_at = decode(&key, &value).unwrap_or_default(),
                _ => {}
            }
        }

        debug!(
            allocations = snapshot.current_allocations.len(),
            decisions = snapshot.recent_decisions.len(),
            "controller snapshot loaded"
        );
        Ok(snapshot)
    }

    /// Whether anything has ever been saved.
    pub fn has_snapshot(&self) -> StateResult<bool> {
        Ok(!self.read_raw(META)?.is_empty())
    }

    // ── Helpers ────────────────────────────────────────────────────

    fn read_raw(
        &self,
        table: TableDefinition<&str, &[u8]>,
    ) -> StateResult<Vec<(String, Vec<u8>)>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        let mut rows = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            rows.push((key.value().to_string(), value.value().to_vec()));
        }
        Ok(rows)
    }

    fn read_rows<T: DeserializeOwned>(
        &self,
        table: TableDefinition<&str, &[u8]>,
    ) -> StateResult<Vec<(String, T)>> {
        Ok(self
            .read_raw(table)?
            .into_iter()
            .filter_map(|(key, value)| decode(&key, &value).map(|v| (key, v)))
            .collect())
    }

    fn read_values<T: DeserializeOwned>(
        &self,
        table: TableDefinition<&str, &[u8]>,
    ) -> StateResult<Vec<T>> {
        // Keys are zero-padded sequence numbers, so table order is insertion order.
        Ok(self
            .read_rows(table)?
            .into_iter()
            .map(|(_, v)| v)
            .collect())
    }
}

fn sequence_key(index: usize) -> String {
    format!("{index:020}")
}

fn encode_rows<'a, T, I>(rows: I) -> StateResult<Vec<(String, Vec<u8>)>>
where
    T: Serialize + 'a,
    I: IntoIterator<Item = (String, &'a T)>,
{
    rows.into_iter()
        .map(|(key, value)| {
            serde_json::to_vec(value)
                .map(|bytes| (key, bytes))
                .map_err(map_err!(Serialize))
        })
        .collect()
}

fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Option<T> {
    match serde_json::from_slice(bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(%key, error = %e, "skipping undecodable persisted row");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn test_decision(component: &str, confidence: f64) -> ScalingDecision {
        ScalingDecision {
            id: format!("dec-{component}"),
            component: component.to_string(),
            trigger: TriggerType::Cpu,
            action: ScalingAction::ScaleUp,
            resource: ResourceType::Cpu,
            rule_id: format!("{component}:cpu"),
            metric_value: 85.0,
            threshold: 80.0,
            current_allocation: 2.0,
            target_allocation: 2.6,
            change_percent: 30.0,
            reason: "cpu 85.0 above 80.0".to_string(),
            confidence,
            cooldown_secs: 60,
            executed: true,
            success: true,
            effectiveness: Some(80.0),
            created_at: 1000,
            executed_at: Some(1001),
        }
    }

    fn test_snapshot() -> ControllerSnapshot {
        let mut perf = AlgorithmPerformance::new(Algorithm::LeastConnections);
        perf.total_requests = 42;
        perf.successful_requests = 40;
        perf.total_latency_ms = 420.0;

        ControllerSnapshot {
            saved_at: 1234,
            active_algorithm: Some(Algorithm::LeastConnections),
            current_allocations: HashMap::from([
                ("a".to_string(), ResourceVector::uniform(2.0)),
                ("b".to_string(), ResourceVector::uniform(1.5)),
            ]),
            algorithm_performance: HashMap::from([(Algorithm::LeastConnections, perf)]),
            component_weights: HashMap::from([("a".to_string(), 2.0)]),
            recent_decisions: vec![test_decision("a", 90.0), test_decision("b", 75.0)],
            effectiveness_history: HashMap::from([("a".to_string(), vec![80.0, 20.0])]),
            completions: vec![CompletionRecord {
                request_id: "req-1".to_string(),
                workload_type: WorkloadType::TradeExecution,
                priority: Priority::Critical,
                component: Some("a".to_string()),
                algorithm: Some(Algorithm::LeastConnections),
                outcome: RequestOutcome::Succeeded,
                latency_ms: 12.5,
                retry_count: 0,
                error: None,
                completed_at: 99,
            }],
        }
    }

    #[test]
    fn snapshot_save_and_load() {
        let store = StateStore::open_in_memory().unwrap();
        let snapshot = test_snapshot();

        store.save_snapshot(&snapshot).unwrap();
        let loaded = store.load_snapshot().unwrap();

        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn save_replaces_previous_rows() {
        let store = StateStore::open_in_memory().unwrap();
        store.save_snapshot(&test_snapshot()).unwrap();

        let mut smaller = test_snapshot();
        smaller.current_allocations.remove("b");
        smaller.recent_decisions.truncate(1);
        store.save_snapshot(&smaller).unwrap();

        let loaded = store.load_snapshot().unwrap();
        assert_eq!(loaded.current_allocations.len(), 1);
        assert_eq!(loaded.recent_decisions.len(), 1);
    }

    #[test]
    fn decisions_keep_their_order() {
        let store = StateStore::open_in_memory().unwrap();
        let mut snapshot = test_snapshot();
        snapshot.recent_decisions = (0..12)
            .map(|i| test_decision(&format!("c{i}"), f64::from(i)))
            .collect();

        store.save_snapshot(&snapshot).unwrap();
        let loaded = store.load_snapshot().unwrap();

        let confidences: Vec<f64> = loaded.recent_decisions.iter().map(|d| d.confidence).collect();
        assert_eq!(confidences, (0..12).map(f64::from).collect::<Vec<_>>());
    }

    #[test]
    fn empty_store_loads_default_snapshot() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(!store.has_snapshot().unwrap());
        assert_eq!(store.load_snapshot().unwrap(), ControllerSnapshot::default());
    }

    #[test]
    fn undecodable_rows_are_skipped() {
        let store = StateStore::open_in_memory().unwrap();
        store.save_snapshot(&test_snapshot()).unwrap();

        {
            let txn = store.db.begin_write().unwrap();
            {
                let mut table = txn.open_table(ALLOCATIONS).unwrap();
                table.insert("corrupt", b"not json".as_slice()).unwrap();
            }
            txn.commit().unwrap();
        }

        let loaded = store.load_snapshot().unwrap();
        assert_eq!(loaded.current_allocations.len(), 2);
        assert!(!loaded.current_allocations.contains_key("corrupt"));
    }

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("loadpilot.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.save_snapshot(&test_snapshot()).unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        let loaded = store.load_snapshot().unwrap();
        assert_eq!(loaded.active_algorithm, Some(Algorithm::LeastConnections));
        assert_eq!(loaded.current_allocations["a"].cpu, 2.0);
    }
}
