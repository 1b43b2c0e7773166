//! Run-level driver over the event stream.
//!
//! Owns one [`ReconciledState`] per run and routes the engine's events into
//! it: `run_start` resets, successful `node_end`s are merged, `run_end`
//! freezes. Persistence is split the way the transport demands it: `save` is
//! fire-and-forget (a failure is logged and the state left untouched, to be
//! retried at the next save point), while `restore` is a blocking boundary
//! call whose failure is surfaced to the caller.

use anyhow::{Context, Result};

use crate::classify::Classifier;
use crate::config::Config;
use crate::event::{LogKind, RunEvent};
use crate::extract::Extractor;
use crate::persist::{self, Store};
use crate::state::ReconciledState;

#[derive(Debug)]
pub struct Engine {
    classifier: Classifier,
    extractor: Extractor,
    pub state: ReconciledState,
}

impl Engine {
    pub fn new(config: &Config) -> Self {
        Engine {
            classifier: Classifier::new(config.classifier.rules.clone()),
            extractor: Extractor::new(&config.extractor.labels),
            state: ReconciledState::default(),
        }
    }

    /// Apply one event from the stream.
    pub fn apply(&mut self, event: &RunEvent) {
        match event {
            RunEvent::RunStart { run_id } => {
                tracing::info!(run_id, "run started");
                self.state = ReconciledState::new(Some(run_id.clone()));
            }
            RunEvent::Log {
                node_id,
                event: LogKind::NodeStart,
                ..
            } => {
                tracing::debug!(node_id, "node started");
            }
            RunEvent::Log {
                node_id,
                event: LogKind::NodeEnd,
                payload,
            } => {
                let Some(payload) = payload else {
                    tracing::warn!(node_id, "node_end without payload; skipped");
                    return;
                };
                if payload.is_success() {
                    self.state.merge_node_output(
                        &self.classifier,
                        &self.extractor,
                        node_id,
                        payload,
                    );
                } else {
                    let error = payload.error.clone().unwrap_or_else(|| "unknown".into());
                    tracing::warn!(node_id, error, "node failed");
                    self.state.node_errors.insert(node_id.clone(), error);
                }
            }
            RunEvent::Log {
                node_id,
                event: LogKind::NodeError,
                payload,
            } => {
                let error = payload
                    .as_ref()
                    .and_then(|p| p.error.clone())
                    .unwrap_or_else(|| "unknown".into());
                tracing::warn!(node_id, error, "node errored");
                self.state.node_errors.insert(node_id.clone(), error);
            }
            RunEvent::RunEnd { success, error } => {
                if !success {
                    self.state.run_error = error.clone().or_else(|| Some("run failed".into()));
                }
                self.state.freeze();
                tracing::info!(success, "run ended");
            }
            RunEvent::Error { error } => {
                // Stream-level failure: the state stays exactly as
                // accumulated; every partial snapshot remains consumable.
                tracing::error!(error, "run stream error");
                self.state.run_error = Some(error.clone());
            }
        }
    }

    /// Apply a whole ordered event stream.
    pub fn ingest<'a>(&mut self, events: impl IntoIterator<Item = &'a RunEvent>) {
        for event in events {
            self.apply(event);
        }
    }

    /// Persist the current state, fire-and-forget.
    ///
    /// Returns the record id on success. A failure is logged and swallowed;
    /// the in-memory state is never touched and the save is simply retried
    /// at the next natural save point.
    pub fn save(&self, store: &dyn Store) -> Option<String> {
        let value = persist::serialize(&self.state);
        match store.save(&value) {
            Ok(record_id) => {
                tracing::info!(record_id, "state saved");
                Some(record_id)
            }
            Err(err) => {
                tracing::warn!("state save failed (will retry at next save point): {:#}", err);
                None
            }
        }
    }

    /// Build an engine from a stored record. Blocking boundary call: a
    /// failure is surfaced and nothing is partially applied.
    pub fn restore(config: &Config, store: &dyn Store, record_id: &str) -> Result<Self> {
        let value = store
            .get(record_id)
            .with_context(|| format!("Failed to load record '{}'", record_id))?;
        let state = persist::deserialize(&value)
            .with_context(|| format!("Record '{}' holds a corrupt state", record_id))?;
        let mut engine = Engine::new(config);
        engine.state = state;
        Ok(engine)
    }
}
