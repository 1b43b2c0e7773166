//! Wire types for the workflow engine's event stream.
//!
//! The engine delivers an ordered JSONL stream: one `run_start`, any
//! interleaving of per-node `log` events, then one `run_end`. Node output
//! payloads are opaque JSON; the recognized sub-shapes (`output`,
//! `passed_items`, `iteration_outputs`, item fields) are modeled here as
//! tolerant partial views over `serde_json::Value`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::BufRead;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error on line {line}: {source}")]
    Json {
        line: usize,
        source: serde_json::Error,
    },
}

/// One event from the workflow engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    RunStart {
        run_id: String,
    },
    Log {
        node_id: String,
        event: LogKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<NodePayload>,
    },
    RunEnd {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Error {
        error: String,
    },
}

/// Sub-kind of a `log` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    NodeStart,
    NodeEnd,
    NodeError,
}

/// Payload attached to `node_end` / `node_error` log events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NodePayload {
    /// "success" or "error" for node_end events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Opaque node outputs; recognized sub-shapes are probed lazily.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Value>,
    /// Loop iteration this node execution belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NodePayload {
    pub fn is_success(&self) -> bool {
        self.status.as_deref() == Some("success")
    }
}

/// Candidate id as emitted on the wire: a string or a bare number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ItemId {
    Num(i64),
    Str(String),
}

impl ItemId {
    /// Normalized string form used as the identity key.
    pub fn as_key(&self) -> String {
        match self {
            ItemId::Num(n) => n.to_string(),
            ItemId::Str(s) => s.clone(),
        }
    }
}

/// One candidate item as emitted inside a node's outputs.
///
/// Every field is optional because different node kinds emit different
/// subsets; unrecognized fields are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
pub struct RawItem {
    #[serde(default)]
    pub id: Option<ItemId>,
    #[serde(default, alias = "SMILES")]
    pub smiles: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default, alias = "opt_des")]
    pub description: Option<String>,
    #[serde(default, rename = "surfaceAnchoring")]
    pub surface_anchoring: Option<f64>,
    #[serde(default, rename = "energyLevel")]
    pub energy_level: Option<f64>,
    #[serde(default, rename = "packingDensity")]
    pub packing_density: Option<f64>,
    #[serde(default, alias = "parent_id")]
    pub previous_id: Option<ItemId>,
}

impl RawItem {
    pub fn id_key(&self) -> Option<String> {
        self.id.as_ref().map(ItemId::as_key)
    }
}

/// Parse every object in `value` (an array, or a single object) as a
/// `RawItem`, skipping elements that are not objects. Items with neither an
/// id nor a SMILES are dropped: there is nothing to key them on.
pub fn items_in(value: &Value) -> Vec<RawItem> {
    let elems: Vec<&Value> = match value {
        Value::Array(arr) => arr.iter().collect(),
        Value::Object(_) => vec![value],
        _ => return Vec::new(),
    };
    elems
        .into_iter()
        .filter_map(|v| {
            if !v.is_object() {
                tracing::debug!("skipping non-object item in node output");
                return None;
            }
            match serde_json::from_value::<RawItem>(v.clone()) {
                Ok(item) if item.id.is_some() || item.smiles.is_some() => Some(item),
                Ok(_) => {
                    tracing::debug!("skipping item with no id and no smiles");
                    None
                }
                Err(err) => {
                    tracing::warn!("skipping malformed item: {}", err);
                    None
                }
            }
        })
        .collect()
}

/// Items found under `outputs.output` (the generation/evaluation shape).
pub fn output_items(outputs: &Value) -> Vec<RawItem> {
    outputs.get("output").map(items_in).unwrap_or_default()
}

/// Items found under `outputs.passed_items` / `outputs.pending_items`.
pub fn listed_items(outputs: &Value, list: &str) -> Vec<RawItem> {
    outputs.get(list).map(items_in).unwrap_or_default()
}

/// The `resolved_inputs.prompt` string of the `iteration_outputs` entries
/// matching `iteration`, in emission order.
pub fn iteration_prompts(outputs: &Value, iteration: u32) -> Vec<String> {
    let Some(Value::Array(entries)) = outputs.get("iteration_outputs") else {
        return Vec::new();
    };
    entries
        .iter()
        .filter(|e| e.get("iteration").and_then(Value::as_u64) == Some(u64::from(iteration)))
        .filter_map(|e| {
            e.get("resolved_inputs")
                .and_then(|r| r.get("prompt"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .collect()
}

/// Read a JSONL event stream, reporting the line number of the first
/// malformed line. Blank lines are skipped.
pub fn read_events(reader: impl BufRead) -> Result<Vec<RunEvent>, StreamError> {
    let mut events = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let event: RunEvent =
            serde_json::from_str(trimmed).map_err(|source| StreamError::Json {
                line: idx + 1,
                source,
            })?;
        events.push(event);
    }
    Ok(events)
}
