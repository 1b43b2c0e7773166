//! Snapshot persistence.
//!
//! [`serialize`]/[`deserialize`] convert the reconciled state to and from a
//! plain-JSON form: iteration-keyed maps become objects keyed by the string
//! form of the iteration number, and keys that fail to parse back are skipped
//! with a warning rather than failing the whole restore.
//!
//! The external store is reached through the [`Store`] trait
//! (save/get/list/delete). [`FsStore`] is the bundled implementation: one
//! directory per record under `<root>/records/rec-NNN/` with `state.json` and
//! `meta.json`, record ids auto-incrementing by directory scan.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::model::IterationSnapshot;
use crate::state::{CachedNodeOutput, ReconciledState};

/// JSON-facing form of [`ReconciledState`]: iteration keys as strings.
#[derive(Debug, Serialize, Deserialize)]
struct SerializedState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    run_id: Option<String>,
    #[serde(default)]
    snapshots: BTreeMap<String, IterationSnapshot>,
    #[serde(default)]
    node_outputs: BTreeMap<String, Vec<CachedNodeOutput>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    node_errors: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    run_error: Option<String>,
    #[serde(default)]
    frozen: bool,
    #[serde(default)]
    seen: Vec<(String, u32)>,
}

/// Convert the state to its plain-JSON form.
pub fn serialize(state: &ReconciledState) -> Value {
    let mut seen: Vec<(String, u32)> = state.seen.iter().cloned().collect();
    seen.sort();
    let serialized = SerializedState {
        run_id: state.run_id.clone(),
        snapshots: state
            .snapshots
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect(),
        node_outputs: state
            .node_outputs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect(),
        node_errors: state.node_errors.clone(),
        run_error: state.run_error.clone(),
        frozen: state.frozen,
        seen,
    };
    serde_json::to_value(serialized).expect("state serializes to JSON")
}

/// Restore a state from its plain-JSON form.
///
/// Iteration keys that fail to parse as integers are skipped with a warning;
/// a structurally wrong document is a hard error.
pub fn deserialize(value: &Value) -> Result<ReconciledState> {
    let serialized: SerializedState =
        serde_json::from_value(value.clone()).context("Failed to parse serialized state")?;

    fn parse_keys<V>(map: BTreeMap<String, V>, what: &str) -> BTreeMap<u32, V> {
        let mut out = BTreeMap::new();
        for (key, v) in map {
            match key.parse::<u32>() {
                Ok(iter) => {
                    out.insert(iter, v);
                }
                Err(_) => {
                    tracing::warn!(key, what, "skipping non-numeric iteration key");
                }
            }
        }
        out
    }

    Ok(ReconciledState {
        run_id: serialized.run_id,
        snapshots: parse_keys(serialized.snapshots, "snapshots"),
        node_outputs: parse_keys(serialized.node_outputs, "node_outputs"),
        node_errors: serialized.node_errors,
        run_error: serialized.run_error,
        frozen: serialized.frozen,
        seen: serialized.seen.into_iter().collect(),
    })
}

/// External persistence service boundary.
pub trait Store {
    /// Persist a serialized state; returns the new record id.
    fn save(&self, state: &Value) -> Result<String>;
    /// Fetch a record's serialized state.
    fn get(&self, record_id: &str) -> Result<Value>;
    /// All record ids, sorted ascending.
    fn list(&self) -> Result<Vec<String>>;
    /// Remove a record.
    fn delete(&self, record_id: &str) -> Result<()>;
}

/// Metadata written next to each stored record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordMeta {
    /// Record ID (e.g., "rec-001")
    pub id: String,
    /// ISO 8601 timestamp when the record was saved
    pub timestamp: String,
    /// Run the record belongs to, if the state carried one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

/// Filesystem-backed store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsStore { root: root.into() }
    }

    fn records_dir(&self) -> PathBuf {
        self.root.join("records")
    }

    fn record_dir(&self, record_id: &str) -> PathBuf {
        self.records_dir().join(record_id)
    }

    /// Generate the next record ID by scanning existing records.
    fn next_record_id(&self) -> String {
        let mut max = 0u32;
        if let Ok(entries) = fs::read_dir(self.records_dir()) {
            for entry in entries.flatten() {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if let Some(num_str) = name.strip_prefix("rec-")
                    && let Ok(num) = num_str.parse::<u32>()
                {
                    max = max.max(num);
                }
            }
        }
        format!("rec-{:03}", max + 1)
    }

    /// Load metadata for a stored record.
    pub fn load_meta(&self, record_id: &str) -> Result<RecordMeta> {
        let path = self.record_dir(record_id).join("meta.json");
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read record metadata: {}", path.display()))?;
        serde_json::from_str(&content).context("Failed to parse record metadata")
    }
}

impl Store for FsStore {
    fn save(&self, state: &Value) -> Result<String> {
        let record_id = self.next_record_id();
        let dest = self.record_dir(&record_id);
        fs::create_dir_all(&dest).context("Failed to create record directory")?;

        let state_json =
            serde_json::to_string_pretty(state).context("Failed to serialize state")?;
        fs::write(dest.join("state.json"), state_json).context("Failed to write state")?;

        let meta = RecordMeta {
            id: record_id.clone(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            run_id: state
                .get("run_id")
                .and_then(Value::as_str)
                .map(str::to_string),
        };
        let meta_json =
            serde_json::to_string_pretty(&meta).context("Failed to serialize record metadata")?;
        fs::write(dest.join("meta.json"), meta_json).context("Failed to write record metadata")?;

        Ok(record_id)
    }

    fn get(&self, record_id: &str) -> Result<Value> {
        let path = self.record_dir(record_id).join("state.json");
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read record: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse record '{}'", record_id))
    }

    fn list(&self) -> Result<Vec<String>> {
        let dir = self.records_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(&dir).context("Failed to read records directory")? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                let name = entry.file_name().to_string_lossy().to_string();
                if name.starts_with("rec-") {
                    ids.push(name);
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn delete(&self, record_id: &str) -> Result<()> {
        let dir = self.record_dir(record_id);
        if !dir.exists() {
            anyhow::bail!("Record '{}' not found", record_id);
        }
        fs::remove_dir_all(&dir)
            .with_context(|| format!("Failed to delete record '{}'", record_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Candidate, Score};
    use serde_json::json;
    use tempfile::TempDir;

    fn sample_state() -> ReconciledState {
        let mut state = ReconciledState::new(Some("run-7".into()));
        let mut snap = IterationSnapshot::new(1);
        snap.passed.push(Candidate {
            id: Some("m1".into()),
            smiles: "CCO".into(),
            parent_id: None,
            score: Some(Score {
                total: Some(8.0),
                surface_anchoring: Some(8.0),
                energy_level: Some(7.0),
                packing_density: Some(9.0),
            }),
            description: Some("anchor-rich".into()),
        });
        snap.recompute_best();
        state.snapshots.insert(1, snap);
        state.node_outputs.insert(
            1,
            vec![CachedNodeOutput {
                node_id: "generator".into(),
                role: crate::classify::Role::Generation,
                outputs: json!({"output": [{"smiles": "CCO"}]}),
            }],
        );
        state.seen.insert(("generator".into(), 1));
        state.frozen = true;
        state
    }

    #[test]
    fn test_round_trip_is_lossless() {
        let state = sample_state();
        let restored = deserialize(&serialize(&state)).unwrap();
        assert_eq!(restored, state);
    }

    #[test]
    fn test_iteration_keys_are_strings_in_json() {
        let value = serialize(&sample_state());
        assert!(value["snapshots"].get("1").is_some());
        assert!(value["node_outputs"].get("1").is_some());
    }

    #[test]
    fn test_bad_iteration_key_skipped_not_fatal() {
        let mut value = serialize(&sample_state());
        let snap = value["snapshots"]["1"].clone();
        value["snapshots"]["not-a-number"] = snap;
        let restored = deserialize(&value).unwrap();
        assert_eq!(restored.snapshots.len(), 1);
        assert!(restored.snapshots.contains_key(&1));
    }

    #[test]
    fn test_structurally_wrong_document_errors() {
        assert!(deserialize(&json!({"snapshots": 42})).is_err());
        assert!(deserialize(&json!("nope")).is_err());
    }

    #[test]
    fn test_fs_store_save_get_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = FsStore::new(tmp.path());
        let value = serialize(&sample_state());

        let id = store.save(&value).unwrap();
        assert_eq!(id, "rec-001");
        let loaded = store.get(&id).unwrap();
        assert_eq!(loaded, value);

        let meta = store.load_meta(&id).unwrap();
        assert_eq!(meta.id, "rec-001");
        assert_eq!(meta.run_id.as_deref(), Some("run-7"));
    }

    #[test]
    fn test_fs_store_ids_increment() {
        let tmp = TempDir::new().unwrap();
        let store = FsStore::new(tmp.path());
        let value = serialize(&ReconciledState::default());
        assert_eq!(store.save(&value).unwrap(), "rec-001");
        assert_eq!(store.save(&value).unwrap(), "rec-002");
        assert_eq!(store.list().unwrap(), vec!["rec-001", "rec-002"]);
    }

    #[test]
    fn test_fs_store_delete() {
        let tmp = TempDir::new().unwrap();
        let store = FsStore::new(tmp.path());
        let value = serialize(&ReconciledState::default());
        let id = store.save(&value).unwrap();
        store.delete(&id).unwrap();
        assert!(store.list().unwrap().is_empty());
        assert!(store.get(&id).is_err());
        assert!(store.delete(&id).is_err());
    }

    #[test]
    fn test_get_missing_record_errors() {
        let tmp = TempDir::new().unwrap();
        let store = FsStore::new(tmp.path());
        assert!(store.get("rec-999").is_err());
    }
}
