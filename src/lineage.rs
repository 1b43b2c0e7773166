//! Best-effort lineage tracing across iterations.
//!
//! Walks backward from a target candidate: an explicit `previous_id` /
//! `parent_id` recorded alongside the candidate wins; otherwise the previous
//! iteration's best candidate stands in as a heuristic guess. Each edge is
//! tagged with how its parent was determined so consumers can distinguish
//! unreliable chains. Malformed data (a cycle, or an iteration step that
//! fails to decrease) aborts the trace and returns what was accumulated,
//! marked incomplete.

use std::collections::HashSet;

use crate::event::{listed_items, output_items};
use crate::model::{Candidate, Confidence, LineageEdge, LineageTrace};
use crate::state::ReconciledState;

/// Trace the evolution chain of `target`, oldest edge first.
///
/// The root of the chain is reported as an edge with `parent: None`. A
/// candidate unknown to the state yields an empty, complete trace.
pub fn trace_lineage(state: &ReconciledState, target: &Candidate) -> LineageTrace {
    let Some(start_iter) = state.latest_iteration_of(target.id.as_deref(), &target.smiles) else {
        return LineageTrace {
            edges: Vec::new(),
            complete: true,
        };
    };
    // By construction of latest_iteration_of, the candidate is present.
    let mut current = state.snapshots[&start_iter]
        .find(target.id.as_deref(), &target.smiles)
        .cloned()
        .expect("candidate present in its latest iteration");
    let mut iter = start_iter;

    let mut edges: Vec<LineageEdge> = Vec::new(); // newest first, reversed below
    let mut visited: HashSet<(String, u32)> = HashSet::new();
    let mut complete = true;

    loop {
        if !visited.insert((current.key().to_string(), iter)) {
            tracing::warn!(key = current.key(), iter, "lineage cycle detected; trace aborted");
            complete = false;
            break;
        }
        if iter == 0 {
            edges.push(root_edge(current, iter));
            break;
        }

        let explicit = explicit_parent_id(state, iter, &current)
            .and_then(|pid| resolve_by_id(state, iter, &pid).map(|found| (found, Confidence::Explicit)));
        let step = explicit.or_else(|| {
            heuristic_parent(state, iter, &current).map(|found| (found, Confidence::Heuristic))
        });

        let Some(((parent, parent_iter), confidence)) = step else {
            edges.push(root_edge(current, iter));
            break;
        };
        if parent_iter >= iter {
            tracing::warn!(
                key = current.key(),
                iter,
                parent_iter,
                "lineage step does not decrease iteration; trace aborted"
            );
            complete = false;
            break;
        }
        edges.push(LineageEdge {
            child: current,
            parent: Some(parent.clone()),
            iteration: iter,
            confidence,
        });
        current = parent;
        iter = parent_iter;
    }

    edges.reverse();
    LineageTrace { edges, complete }
}

fn root_edge(child: Candidate, iteration: u32) -> LineageEdge {
    LineageEdge {
        child,
        parent: None,
        iteration,
        confidence: Confidence::Explicit,
    }
}

/// Explicit parent reference: the one recorded on the candidate, or one
/// found on the candidate's raw item in the iteration's cached outputs.
fn explicit_parent_id(state: &ReconciledState, iteration: u32, candidate: &Candidate) -> Option<String> {
    if let Some(pid) = &candidate.parent_id {
        return Some(pid.clone());
    }
    let outputs = state.node_outputs.get(&iteration)?;
    for cached in outputs {
        let mut items = output_items(&cached.outputs);
        items.extend(listed_items(&cached.outputs, "passed_items"));
        items.extend(listed_items(&cached.outputs, "pending_items"));
        for item in items {
            let matches = candidate.matches(
                item.id_key().as_deref(),
                item.smiles.as_deref().unwrap_or_default(),
            );
            if matches && let Some(prev) = &item.previous_id {
                return Some(prev.as_key());
            }
        }
    }
    None
}

/// Resolve an explicit parent id in the nearest earlier iteration.
fn resolve_by_id(state: &ReconciledState, iteration: u32, parent_id: &str) -> Option<(Candidate, u32)> {
    state
        .snapshots
        .range(..iteration)
        .rev()
        .find_map(|(i, snap)| {
            snap.members()
                .find(|c| c.id.as_deref() == Some(parent_id) || c.smiles == parent_id)
                .map(|c| (c.clone(), *i))
        })
}

/// Positional fallback: the previous iteration's best when it is a different
/// identity, else any other candidate present there.
fn heuristic_parent(state: &ReconciledState, iteration: u32, current: &Candidate) -> Option<(Candidate, u32)> {
    let prev_iter = iteration.checked_sub(1)?;
    let snap = state.snapshots.get(&prev_iter)?;
    let differs = |c: &Candidate| !c.matches(current.id.as_deref(), &current.smiles);
    snap.best
        .as_ref()
        .filter(|b| differs(b))
        .or_else(|| snap.members().find(|c| differs(c)))
        .map(|c| (c.clone(), prev_iter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Classifier;
    use crate::event::NodePayload;
    use crate::extract::Extractor;
    use serde_json::{json, Value};

    fn merge(state: &mut ReconciledState, node_id: &str, iteration: u32, outputs: Value) {
        let payload = NodePayload {
            status: Some("success".into()),
            outputs: Some(outputs),
            iteration: Some(iteration),
            ..Default::default()
        };
        state.merge_node_output(
            &Classifier::default(),
            &Extractor::default(),
            node_id,
            &payload,
        );
    }

    #[test]
    fn test_explicit_chain() {
        let mut state = ReconciledState::default();
        merge(&mut state, "gen", 0, json!({"output": [{"id": "m1", "smiles": "CCO"}]}));
        merge(
            &mut state,
            "gen",
            1,
            json!({"output": [{"id": "m2", "smiles": "CCN", "previous_id": "m1"}]}),
        );
        merge(
            &mut state,
            "gen",
            2,
            json!({"output": [{"id": "m3", "smiles": "CCC", "previous_id": "m2"}]}),
        );

        let target = state.snapshots[&2].pending[0].clone();
        let trace = trace_lineage(&state, &target);
        assert!(trace.complete);
        assert_eq!(trace.edges.len(), 3);
        // oldest first: the root edge, then m1→m2, then m2→m3
        assert_eq!(trace.edges[0].child.id.as_deref(), Some("m1"));
        assert!(trace.edges[0].parent.is_none());
        assert_eq!(trace.edges[1].confidence, Confidence::Explicit);
        assert_eq!(trace.edges[2].child.id.as_deref(), Some("m3"));
        assert_eq!(
            trace.edges[2].parent.as_ref().unwrap().id.as_deref(),
            Some("m2")
        );
    }

    #[test]
    fn test_heuristic_falls_back_to_previous_best() {
        let mut state = ReconciledState::default();
        merge(
            &mut state,
            "gen",
            0,
            json!({"output": [{"smiles": "CCO"}, {"smiles": "CCN"}]}),
        );
        merge(
            &mut state,
            "evaluation",
            0,
            json!({"output": [{"smiles": "CCO", "score": 8.0}, {"smiles": "CCN", "score": 5.0}]}),
        );
        // no explicit parent recorded in iteration 1
        merge(&mut state, "gen", 1, json!({"output": [{"smiles": "CCC"}]}));

        let target = state.snapshots[&1].pending[0].clone();
        let trace = trace_lineage(&state, &target);
        assert!(trace.complete);
        assert_eq!(trace.edges.len(), 2);
        assert_eq!(trace.edges[1].confidence, Confidence::Heuristic);
        assert_eq!(trace.edges[1].parent.as_ref().unwrap().smiles, "CCO");
    }

    #[test]
    fn test_heuristic_skips_own_identity() {
        let mut state = ReconciledState::default();
        merge(
            &mut state,
            "gen",
            0,
            json!({"output": [{"smiles": "CCO"}, {"smiles": "CCN"}]}),
        );
        merge(
            &mut state,
            "evaluation",
            0,
            json!({"output": [{"smiles": "CCO", "score": 9.0}]}),
        );
        // CCO survives into iteration 1; its heuristic parent must not be itself
        merge(&mut state, "summary", 1, json!({"output": [{"smiles": "CCO", "score": 9.5}]}));

        let target = state.snapshots[&1].pending[0].clone();
        let trace = trace_lineage(&state, &target);
        assert!(trace.complete);
        let edge = trace.edges.last().unwrap();
        assert_eq!(edge.parent.as_ref().unwrap().smiles, "CCN");
        assert_eq!(edge.confidence, Confidence::Heuristic);
    }

    #[test]
    fn test_monotonic_iterations() {
        let mut state = ReconciledState::default();
        for i in 0..4u32 {
            merge(
                &mut state,
                "gen",
                i,
                json!({"output": [{"id": format!("m{}", i), "smiles": format!("C{}", i),
                                    "previous_id": if i > 0 { Value::from(format!("m{}", i - 1)) } else { Value::Null }}]}),
            );
        }
        let target = state.snapshots[&3].pending[0].clone();
        let trace = trace_lineage(&state, &target);
        assert!(trace.complete);
        let iters: Vec<u32> = trace.edges.iter().map(|e| e.iteration).collect();
        let mut sorted = iters.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(iters, sorted, "iterations must strictly increase oldest→newest");
    }

    #[test]
    fn test_unknown_candidate_empty_trace() {
        let state = ReconciledState::default();
        let trace = trace_lineage(&state, &Candidate::new("CCO"));
        assert!(trace.complete);
        assert!(trace.edges.is_empty());
    }

    #[test]
    fn test_stops_when_no_predecessor() {
        let mut state = ReconciledState::default();
        // iteration 2 only — nothing before it
        merge(&mut state, "gen", 2, json!({"output": [{"smiles": "CCO"}]}));
        let target = state.snapshots[&2].pending[0].clone();
        let trace = trace_lineage(&state, &target);
        assert!(trace.complete);
        assert_eq!(trace.edges.len(), 1);
        assert!(trace.edges[0].parent.is_none());
        assert_eq!(trace.edges[0].iteration, 2);
    }
}
