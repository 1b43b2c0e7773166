//! The reconciled run state and its event reducer.
//!
//! `ReconciledState` is an explicit value owned by one consumer and mutated
//! only through [`ReconciledState::merge_node_output`]. The reducer is
//! idempotent (re-applying a seen `(node_id, iteration)` event is a no-op)
//! and tolerates any interleaving of node events within an iteration: each
//! merge re-resolves scores for the iteration's candidates against every
//! cached evaluation/summary output, and score filling never overwrites a
//! value already present.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

use crate::classify::{Classifier, Role};
use crate::event::{listed_items, output_items, NodePayload, RawItem};
use crate::extract::Extractor;
use crate::model::{Candidate, IterationSnapshot};

/// One node's outputs, cached per iteration so lineage and score resolution
/// can re-run without replaying the transport stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedNodeOutput {
    pub node_id: String,
    pub role: Role,
    pub outputs: Value,
}

/// Aggregate reconciled state for one run.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReconciledState {
    pub run_id: Option<String>,
    /// Per-iteration reconciled snapshots.
    pub snapshots: BTreeMap<u32, IterationSnapshot>,
    /// Raw per-node output cache, keyed by iteration.
    pub node_outputs: BTreeMap<u32, Vec<CachedNodeOutput>>,
    /// Per-node errors reported by the engine, for diagnostics.
    pub node_errors: BTreeMap<String, String>,
    /// Run-level error, if the stream reported one.
    pub run_error: Option<String>,
    /// Set once `run_end` is observed; further node events are ignored.
    pub frozen: bool,
    /// `(node_id, iteration)` pairs already merged (at-least-once transport).
    pub(crate) seen: HashSet<(String, u32)>,
}

impl ReconciledState {
    pub fn new(run_id: Option<String>) -> Self {
        ReconciledState {
            run_id,
            ..Default::default()
        }
    }

    /// Latest iteration in which a candidate matching `(id, smiles)` appears.
    pub fn latest_iteration_of(&self, id: Option<&str>, smiles: &str) -> Option<u32> {
        self.snapshots
            .iter()
            .rev()
            .find(|(_, snap)| snap.find(id, smiles).is_some())
            .map(|(iter, _)| *iter)
    }

    /// Snapshots in iteration order.
    pub fn iteration_snapshots(&self) -> impl Iterator<Item = &IterationSnapshot> {
        self.snapshots.values()
    }

    /// Mark the run finished; the state is read-only from here on.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Merge one successful `node_end` payload into the state.
    ///
    /// Nodes classified as [`Role::Other`] and events with no iteration tag
    /// contribute nothing. Malformed items are skipped at item granularity;
    /// a bad item never aborts the merge.
    pub fn merge_node_output(
        &mut self,
        classifier: &Classifier,
        extractor: &Extractor,
        node_id: &str,
        payload: &NodePayload,
    ) {
        if self.frozen {
            tracing::warn!(node_id, "ignoring node output after run_end");
            return;
        }
        let Some(iteration) = payload.iteration else {
            tracing::debug!(node_id, "node output carries no iteration tag; skipped");
            return;
        };
        if !self.seen.insert((node_id.to_string(), iteration)) {
            return; // already merged
        }
        let Some(outputs) = payload.outputs.as_ref() else {
            return;
        };

        let role = classifier.classify(node_id, None, Some(outputs));
        if role == Role::Other {
            tracing::debug!(node_id, iteration, "node excluded from reconciliation");
            return;
        }
        tracing::debug!(node_id, iteration, role = %role, "merging node output");

        self.node_outputs
            .entry(iteration)
            .or_default()
            .push(CachedNodeOutput {
                node_id: node_id.to_string(),
                role,
                outputs: outputs.clone(),
            });

        let mut snapshot = self
            .snapshots
            .remove(&iteration)
            .unwrap_or_else(|| IterationSnapshot::new(iteration));

        match role {
            Role::Generation => {
                let mut emitted = output_items(outputs);
                emitted.extend(listed_items(outputs, "pending_items"));
                emitted.extend(listed_items(outputs, "passed_items"));
                for item in emitted {
                    self.admit_item(&mut snapshot, &item);
                }
            }
            Role::Evaluation | Role::Summary => {
                for item in output_items(outputs) {
                    self.admit_known_item(&mut snapshot, &item);
                }
            }
            Role::Other => unreachable!(),
        }

        self.resolve_scores(&mut snapshot, extractor, iteration);
        self.promote_passed(&mut snapshot, iteration);
        snapshot.recompute_best();
        self.snapshots.insert(iteration, snapshot);
    }

    /// Add a generation item to the snapshot, or refresh the fields of the
    /// candidate it matches.
    fn admit_item(&self, snapshot: &mut IterationSnapshot, item: &RawItem) {
        let id = item.id_key();
        let smiles = match item.smiles.clone() {
            Some(s) => s,
            // Items keyed only by id: reuse the id as the display string.
            None => match &id {
                Some(i) => i.clone(),
                None => return,
            },
        };
        let update = |c: &mut Candidate| {
            if c.id.is_none() {
                c.id = id.clone();
            }
            if c.description.is_none() {
                c.description = item.description.clone();
            }
            if c.parent_id.is_none() {
                c.parent_id = item.previous_id.as_ref().map(|p| p.as_key());
            }
        };
        if let Some(existing) = find_mut(snapshot, id.as_deref(), &smiles) {
            update(existing);
            return;
        }
        let mut candidate = Candidate::new(smiles);
        candidate.id = id.clone();
        update(&mut candidate);
        snapshot.pending.push(candidate);
    }

    /// Admit an evaluation/summary item only when it matches a candidate
    /// already known to this snapshot or to an earlier iteration (summary
    /// nodes re-emit survivors of previous iterations). Unknown identities
    /// are skipped: scoring nodes do not mint candidates.
    fn admit_known_item(&self, snapshot: &mut IterationSnapshot, item: &RawItem) {
        let id = item.id_key();
        let Some(smiles) = item
            .smiles
            .clone()
            .or_else(|| self.smiles_for(id.as_deref()))
        else {
            return;
        };
        if snapshot.find(id.as_deref(), &smiles).is_some() {
            if let Some(existing) = find_mut(snapshot, id.as_deref(), &smiles)
                && existing.description.is_none()
            {
                existing.description = item.description.clone();
            }
            return;
        }
        let known_earlier = self
            .snapshots
            .values()
            .any(|s| s.find(id.as_deref(), &smiles).is_some());
        if !known_earlier {
            tracing::debug!(smiles, "scored item matches no known candidate; skipped");
            return;
        }
        let mut candidate = Candidate::new(smiles);
        candidate.id = id;
        candidate.description = item.description.clone();
        snapshot.pending.push(candidate);
    }

    /// SMILES recorded for an id in any snapshot, for id-only items.
    fn smiles_for(&self, id: Option<&str>) -> Option<String> {
        let id = id?;
        self.snapshots
            .values()
            .flat_map(|s| s.members())
            .find(|c| c.id.as_deref() == Some(id))
            .map(|c| c.smiles.clone())
    }

    /// Re-resolve every candidate's score against all cached
    /// evaluation/summary outputs of the iteration. Filling never
    /// overwrites, so repeat passes are no-ops.
    fn resolve_scores(&self, snapshot: &mut IterationSnapshot, extractor: &Extractor, iteration: u32) {
        let scoring: Vec<&CachedNodeOutput> = self
            .node_outputs
            .get(&iteration)
            .map(|outputs| {
                outputs
                    .iter()
                    .filter(|o| matches!(o.role, Role::Evaluation | Role::Summary))
                    .collect()
            })
            .unwrap_or_default();
        if scoring.is_empty() {
            return;
        }
        for candidate in snapshot.passed.iter_mut().chain(snapshot.pending.iter_mut()) {
            for cached in &scoring {
                if candidate.description.is_none() {
                    candidate.description = crate::extract::find_description(
                        &cached.outputs,
                        candidate.id.as_deref(),
                        &candidate.smiles,
                    );
                }
                let found = extractor.extract(
                    candidate.id.as_deref(),
                    &candidate.smiles,
                    &cached.outputs,
                    iteration,
                    candidate.description.as_deref(),
                );
                if let Some(found) = found {
                    match candidate.score.as_mut() {
                        Some(score) => score.fill_missing_from(&found),
                        None => candidate.score = Some(found),
                    }
                }
            }
        }
    }

    /// Move pending candidates named by any cached `passed_items` list of
    /// the iteration into `passed`. Passing is only ever explicit; score
    /// magnitude never promotes.
    fn promote_passed(&self, snapshot: &mut IterationSnapshot, iteration: u32) {
        let passed_items: Vec<RawItem> = self
            .node_outputs
            .get(&iteration)
            .map(|outputs| {
                outputs
                    .iter()
                    .flat_map(|o| listed_items(&o.outputs, "passed_items"))
                    .collect()
            })
            .unwrap_or_default();
        if passed_items.is_empty() {
            return;
        }
        let mut still_pending = Vec::new();
        for candidate in snapshot.pending.drain(..) {
            let promoted = passed_items.iter().any(|item| {
                candidate.matches(
                    item.id_key().as_deref(),
                    item.smiles.as_deref().unwrap_or_default(),
                )
            });
            if promoted {
                snapshot.passed.push(candidate);
            } else {
                still_pending.push(candidate);
            }
        }
        snapshot.pending = still_pending;
    }
}

fn find_mut<'a>(
    snapshot: &'a mut IterationSnapshot,
    id: Option<&str>,
    smiles: &str,
) -> Option<&'a mut Candidate> {
    snapshot
        .passed
        .iter_mut()
        .chain(snapshot.pending.iter_mut())
        .find(|c| c.matches(id, smiles))
}
