use serde::{Deserialize, Serialize};

/// Multi-dimensional score for a candidate.
///
/// Every field is a true optional: absent means "not computed", and a present
/// value is taken at face value (including zero). Upstream payloads that use
/// `<= 0` as an unscored marker are normalized at extraction time, never here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Score {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub surface_anchoring: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub energy_level: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packing_density: Option<f64>,
}

impl Score {
    /// All per-dimension values that are defined, in fixed order.
    pub fn defined_dims(&self) -> Vec<f64> {
        [self.surface_anchoring, self.energy_level, self.packing_density]
            .into_iter()
            .flatten()
            .collect()
    }

    /// True if neither the total nor any dimension is defined.
    pub fn is_empty(&self) -> bool {
        self.total.is_none() && self.defined_dims().is_empty()
    }

    /// Fill any field still missing from `other`, never overwriting a value
    /// already present.
    pub fn fill_missing_from(&mut self, other: &Score) {
        if self.total.is_none() {
            self.total = other.total;
        }
        if self.surface_anchoring.is_none() {
            self.surface_anchoring = other.surface_anchoring;
        }
        if self.energy_level.is_none() {
            self.energy_level = other.energy_level;
        }
        if self.packing_density.is_none() {
            self.packing_density = other.packing_density;
        }
    }

    /// If the total is missing but at least one dimension is defined, set it
    /// to the mean of the defined dimensions, rounded to one decimal.
    pub fn derive_total(&mut self) {
        if self.total.is_some() {
            return;
        }
        let dims = self.defined_dims();
        if dims.is_empty() {
            return;
        }
        let mean = dims.iter().sum::<f64>() / dims.len() as f64;
        self.total = Some((mean * 10.0).round() / 10.0);
    }
}

/// One design artifact (a generated molecule) tracked across iterations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    /// Stable identifier assigned by the upstream engine, when it emits one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Canonical SMILES string; identity fallback when `id` is absent.
    pub smiles: String,
    /// Explicit parent reference, when the upstream engine recorded one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<Score>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Candidate {
    pub fn new(smiles: impl Into<String>) -> Self {
        Candidate {
            id: None,
            smiles: smiles.into(),
            parent_id: None,
            score: None,
            description: None,
        }
    }

    /// Identity key: the explicit id when present, otherwise the SMILES.
    pub fn key(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.smiles)
    }

    /// Whether an item identified by `(id, smiles)` refers to this candidate.
    ///
    /// When both sides carry an id, only the ids decide. Otherwise the SMILES
    /// string is the shared key, so an id-less re-emission of a known
    /// molecule still lands on the same logical candidate.
    pub fn matches(&self, id: Option<&str>, smiles: &str) -> bool {
        match (self.id.as_deref(), id) {
            (Some(a), Some(b)) => a == b,
            _ => self.smiles == smiles,
        }
    }
}

/// Reconciled passed/pending/best state of all candidates for one iteration.
///
/// Invariants: a candidate identity appears in at most one of
/// `passed`/`pending`, and `best` is a member of their union with the maximal
/// `score.total` (ties resolved by first-seen order).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct IterationSnapshot {
    pub iter: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub passed: Vec<Candidate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending: Vec<Candidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best: Option<Candidate>,
}

impl IterationSnapshot {
    pub fn new(iter: u32) -> Self {
        IterationSnapshot {
            iter,
            ..Default::default()
        }
    }

    /// All candidates, passed first, in insertion order within each list.
    pub fn members(&self) -> impl Iterator<Item = &Candidate> {
        self.passed.iter().chain(self.pending.iter())
    }

    /// Locate a candidate matching `(id, smiles)` in either list.
    pub fn find(&self, id: Option<&str>, smiles: &str) -> Option<&Candidate> {
        self.members().find(|c| c.matches(id, smiles))
    }

    /// Recompute `best` as the max-total candidate among scored members,
    /// earliest inserted winning ties. Unscored members are skipped, except
    /// that a lone candidate is surfaced as best even without a score.
    pub fn recompute_best(&mut self) {
        let mut best: Option<&Candidate> = None;
        for c in self.passed.iter().chain(self.pending.iter()) {
            let Some(total) = c.score.as_ref().and_then(|s| s.total) else {
                continue;
            };
            let current = best.and_then(|b| b.score.as_ref()).and_then(|s| s.total);
            if current.is_none_or(|t| total > t) {
                best = Some(c);
            }
        }
        if best.is_none() && self.passed.len() + self.pending.len() == 1 {
            best = self.passed.iter().chain(self.pending.iter()).next();
        }
        self.best = best.cloned();
    }
}

/// How a lineage edge's parent was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    /// The upstream engine recorded an explicit parent id.
    Explicit,
    /// Guessed from iteration structure (previous iteration's best).
    Heuristic,
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Confidence::Explicit => write!(f, "explicit"),
            Confidence::Heuristic => write!(f, "heuristic"),
        }
    }
}

/// One parent→child step in a candidate's evolution chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineageEdge {
    pub child: Candidate,
    /// None for the root of the chain (no predecessor found).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<Candidate>,
    /// Iteration in which the child appears.
    pub iteration: u32,
    pub confidence: Confidence,
}

/// Result of a lineage trace, oldest edge first.
///
/// `complete` is false when the walk was cut short by malformed data (a cycle
/// or a non-decreasing iteration step); the edges accumulated up to that
/// point are still returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageTrace {
    pub edges: Vec<LineageEdge>,
    pub complete: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(smiles: &str, total: f64) -> Candidate {
        Candidate {
            score: Some(Score {
                total: Some(total),
                ..Default::default()
            }),
            ..Candidate::new(smiles)
        }
    }

    #[test]
    fn test_derive_total_rounds_mean() {
        let mut score = Score {
            surface_anchoring: Some(8.0),
            energy_level: Some(7.0),
            packing_density: Some(9.0),
            ..Default::default()
        };
        score.derive_total();
        assert_eq!(score.total, Some(8.0));

        let mut score = Score {
            surface_anchoring: Some(8.2),
            energy_level: Some(6.5),
            ..Default::default()
        };
        score.derive_total();
        // mean(8.2, 6.5) = 7.35 → 7.4 to one decimal
        assert_eq!(score.total, Some(7.4));
    }

    #[test]
    fn test_derive_total_keeps_existing() {
        let mut score = Score {
            total: Some(5.0),
            surface_anchoring: Some(9.0),
            ..Default::default()
        };
        score.derive_total();
        assert_eq!(score.total, Some(5.0));
    }

    #[test]
    fn test_derive_total_no_dims_stays_absent() {
        let mut score = Score::default();
        score.derive_total();
        assert_eq!(score.total, None);
    }

    #[test]
    fn test_fill_missing_never_overwrites() {
        let mut a = Score {
            total: Some(8.0),
            surface_anchoring: Some(7.0),
            ..Default::default()
        };
        let b = Score {
            total: Some(1.0),
            surface_anchoring: Some(1.0),
            energy_level: Some(6.0),
            ..Default::default()
        };
        a.fill_missing_from(&b);
        assert_eq!(a.total, Some(8.0));
        assert_eq!(a.surface_anchoring, Some(7.0));
        assert_eq!(a.energy_level, Some(6.0));
    }

    #[test]
    fn test_identity_id_wins_over_smiles() {
        let mut c = Candidate::new("CCO");
        c.id = Some("mol-1".into());
        assert!(c.matches(Some("mol-1"), "CCCC"));
        assert!(!c.matches(Some("mol-2"), "CCO"));
        // id-less item falls back to SMILES
        assert!(c.matches(None, "CCO"));
    }

    #[test]
    fn test_recompute_best_max_total_first_seen_ties() {
        let mut snap = IterationSnapshot::new(1);
        snap.passed.push(scored("CCO", 8.0));
        snap.passed.push(scored("CCN", 8.0));
        snap.pending.push(scored("CCC", 5.0));
        snap.recompute_best();
        assert_eq!(snap.best.as_ref().unwrap().smiles, "CCO");
    }

    #[test]
    fn test_recompute_best_skips_unscored() {
        let mut snap = IterationSnapshot::new(1);
        snap.passed.push(Candidate::new("CCO"));
        snap.pending.push(scored("CCC", 3.0));
        snap.recompute_best();
        assert_eq!(snap.best.as_ref().unwrap().smiles, "CCC");
    }

    #[test]
    fn test_recompute_best_lone_unscored_candidate() {
        let mut snap = IterationSnapshot::new(1);
        snap.pending.push(Candidate::new("CCO"));
        snap.recompute_best();
        assert_eq!(snap.best.as_ref().unwrap().smiles, "CCO");
    }

    #[test]
    fn test_recompute_best_none_when_all_unscored() {
        let mut snap = IterationSnapshot::new(1);
        snap.passed.push(Candidate::new("CCO"));
        snap.pending.push(Candidate::new("CCN"));
        snap.recompute_best();
        assert!(snap.best.is_none());
    }
}
