//! Cross-iteration analytics derived from the reconciled snapshots.
//!
//! Pure projections: nothing here mutates state, so these can run interleaved
//! with further event ingestion.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::state::ReconciledState;

/// One point of a candidate's score trend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub iter: u32,
    pub total: f64,
}

/// One (candidate, iteration) scatter point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParetoPoint {
    pub iter: u32,
    pub total: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub smiles: String,
}

/// Derived analytics for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Analytics {
    /// Per-candidate-identity series of resolved totals, ordered by
    /// iteration. Iterations where a candidate has no resolved score are
    /// omitted from its series, never zero-filled.
    pub candidate_trends: BTreeMap<String, Vec<TrendPoint>>,
    /// One point per scored (candidate, iteration) appearance.
    pub pareto_points: Vec<ParetoPoint>,
    /// True iff at least one snapshot contributed at least one scored point.
    pub has_data: bool,
}

/// Compute trend series and scatter points over all snapshots.
pub fn compute_analytics(state: &ReconciledState) -> Analytics {
    // Fold id-less appearances of a known molecule into its id-keyed
    // identity: first appearance with both id and SMILES wins.
    let mut id_for_smiles: BTreeMap<&str, &str> = BTreeMap::new();
    for snap in state.iteration_snapshots() {
        for c in snap.members() {
            if let Some(id) = c.id.as_deref() {
                id_for_smiles.entry(&c.smiles).or_insert(id);
            }
        }
    }

    let mut analytics = Analytics::default();
    for snap in state.iteration_snapshots() {
        for c in snap.members() {
            let Some(total) = c.score.as_ref().and_then(|s| s.total) else {
                continue;
            };
            let key = c
                .id
                .as_deref()
                .or_else(|| id_for_smiles.get(c.smiles.as_str()).copied())
                .unwrap_or(&c.smiles)
                .to_string();
            analytics
                .candidate_trends
                .entry(key)
                .or_default()
                .push(TrendPoint {
                    iter: snap.iter,
                    total,
                });
            analytics.pareto_points.push(ParetoPoint {
                iter: snap.iter,
                total,
                id: c.id.clone(),
                smiles: c.smiles.clone(),
            });
        }
    }
    analytics.has_data = !analytics.pareto_points.is_empty();
    analytics
}
