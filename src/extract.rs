//! Score extraction.
//!
//! Different node kinds emit candidate scores in incompatible shapes:
//! structured item fields, per-candidate blocks embedded in a resolved prompt
//! string, or labeled numbers inside free-form description text. Each shape
//! gets its own resolver; `Extractor::extract` composes them in a fixed
//! order, later resolvers only filling fields the earlier ones left missing.
//!
//! The upstream engine emits `<= 0` for dimensions it never computed, so
//! every resolver treats non-positive payload values as absent. That sentinel
//! stays on the read side: a returned [`Score`] only ever carries values the
//! upstream actually produced.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;

use crate::event::{iteration_prompts, listed_items, output_items, RawItem};
use crate::model::Score;

/// The three scored dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dim {
    SurfaceAnchoring,
    EnergyLevel,
    PackingDensity,
}

/// Label synonyms used to recognize each dimension in prompt blocks and
/// free-text descriptions. Defaults cover the English and Chinese labels the
/// upstream engine is known to emit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionLabels {
    #[serde(default = "default_surface_anchoring")]
    pub surface_anchoring: Vec<String>,
    #[serde(default = "default_energy_level")]
    pub energy_level: Vec<String>,
    #[serde(default = "default_packing_density")]
    pub packing_density: Vec<String>,
}

fn default_surface_anchoring() -> Vec<String> {
    vec!["surface anchoring".into(), "表面锚定".into()]
}

fn default_energy_level() -> Vec<String> {
    vec!["energy level match".into(), "energy level".into(), "能级".into()]
}

fn default_packing_density() -> Vec<String> {
    vec!["packing density".into(), "堆积密度".into()]
}

impl Default for DimensionLabels {
    fn default() -> Self {
        DimensionLabels {
            surface_anchoring: default_surface_anchoring(),
            energy_level: default_energy_level(),
            packing_density: default_packing_density(),
        }
    }
}

/// Treat non-positive upstream values as "not computed".
fn positive(v: Option<f64>) -> Option<f64> {
    v.filter(|x| *x > 0.0)
}

/// Brace-delimited blocks inside prompt text (no nesting — the upstream
/// engine emits flat per-candidate blocks).
static BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{[^{}]*\}").unwrap());

/// Score extractor: an ordered chain of shape-specific resolvers.
#[derive(Debug, Clone)]
pub struct Extractor {
    /// One labeled-number regex per dimension, alternating over synonyms.
    dim_patterns: Vec<(Dim, Regex)>,
}

impl Default for Extractor {
    fn default() -> Self {
        Extractor::new(&DimensionLabels::default())
    }
}

impl Extractor {
    pub fn new(labels: &DimensionLabels) -> Self {
        let compile = |dim: Dim, synonyms: &[String]| {
            let alternation = synonyms
                .iter()
                .map(|s| regex::escape(s))
                .collect::<Vec<_>>()
                .join("|");
            // Label, optional separator (ASCII or fullwidth colon, equals),
            // then the first number that follows.
            let pattern = format!(
                r"(?i)(?:{})[\s:：=]*(-?\d+(?:\.\d+)?)",
                alternation
            );
            (dim, Regex::new(&pattern).expect("dimension label regex"))
        };
        Extractor {
            dim_patterns: vec![
                compile(Dim::SurfaceAnchoring, &labels.surface_anchoring),
                compile(Dim::EnergyLevel, &labels.energy_level),
                compile(Dim::PackingDensity, &labels.packing_density),
            ],
        }
    }

    /// Resolve a candidate's score from one node's outputs.
    ///
    /// `description_hint` is the candidate's already-known description (used
    /// by the free-text fallback when the node's own item carries none).
    /// Returns `None` when nothing resolves; the caller must not substitute
    /// a zero score.
    pub fn extract(
        &self,
        id: Option<&str>,
        smiles: &str,
        outputs: &Value,
        iteration: u32,
        description_hint: Option<&str>,
    ) -> Option<Score> {
        let mut score = Score::default();
        let mut description = description_hint.map(str::to_string);

        // 1. Structured match: items carrying the fields directly.
        for item in matching_items(outputs, id, smiles) {
            score.fill_missing_from(&structured_score(&item));
            if description.is_none() {
                description = item.description.clone();
            }
        }

        // 2. Prompt-indexed fallback: only consulted when the structured
        //    shape produced a total but left dimensions open.
        if score.total.is_some() && score.defined_dims().len() < 3 {
            for prompt in iteration_prompts(outputs, iteration) {
                let found = self.prompt_block_score(&prompt, id, smiles);
                score.fill_missing_from(&found);
                if score.defined_dims().len() == 3 {
                    break;
                }
            }
        }

        // 3. Free-text fallback over the description.
        if score.defined_dims().len() < 3 {
            if let Some(text) = description.as_deref() {
                score.fill_missing_from(&self.labeled_scores(text));
            }
        }

        // 4. Derived total from whatever dimensions are now known.
        score.derive_total();

        if score.is_empty() { None } else { Some(score) }
    }

    /// Parse per-candidate score blocks embedded in a resolved prompt.
    ///
    /// Blocks are JSON-like (`{"candidate_id": "mol-3", "aspect": "surface
    /// anchoring", "score": 8.2}`); blocks that fail to parse as JSON are
    /// retried with the labeled-number regexes as long as they mention the
    /// candidate's key.
    fn prompt_block_score(&self, prompt: &str, id: Option<&str>, smiles: &str) -> Score {
        let mut score = Score::default();
        for m in BLOCK_RE.find_iter(prompt) {
            let block = m.as_str();
            match serde_json::from_str::<Value>(block) {
                Ok(value) => {
                    if !block_refers_to(&value, id, smiles) {
                        continue;
                    }
                    let Some(aspect) = block_field(&value, &["aspect", "critic_aspect", "dimension", "criterion"])
                        .and_then(Value::as_str)
                    else {
                        continue;
                    };
                    let Some(dim) = self.dim_for_label(aspect) else {
                        tracing::debug!(aspect, "unrecognized critic aspect in prompt block");
                        continue;
                    };
                    if let Some(v) = positive(
                        block_field(&value, &["score", "value", "rating"]).and_then(Value::as_f64),
                    ) {
                        set_dim(&mut score, dim, v);
                    }
                }
                Err(_) => {
                    // Not valid JSON; fall back to label scanning if the
                    // block mentions this candidate at all.
                    let key_present = id.is_some_and(|i| block.contains(i)) || block.contains(smiles);
                    if key_present {
                        score.fill_missing_from(&self.labeled_scores(block));
                    }
                }
            }
        }
        score
    }

    /// Scan free text for labeled dimension scores.
    fn labeled_scores(&self, text: &str) -> Score {
        let mut score = Score::default();
        for (dim, re) in &self.dim_patterns {
            if let Some(caps) = re.captures(text)
                && let Ok(v) = caps[1].parse::<f64>()
                && let Some(v) = positive(Some(v))
            {
                set_dim(&mut score, *dim, v);
            }
        }
        score
    }

    fn dim_for_label(&self, label: &str) -> Option<Dim> {
        // The per-dimension regexes double as label recognizers; a bare
        // label has no trailing number, so test the label text directly
        // against the alternation by appending a probe value.
        let probe = format!("{}: 1", label);
        self.dim_patterns
            .iter()
            .find(|(_, re)| re.is_match(&probe))
            .map(|(dim, _)| *dim)
    }
}

fn set_dim(score: &mut Score, dim: Dim, v: f64) {
    let slot = match dim {
        Dim::SurfaceAnchoring => &mut score.surface_anchoring,
        Dim::EnergyLevel => &mut score.energy_level,
        Dim::PackingDensity => &mut score.packing_density,
    };
    if slot.is_none() {
        *slot = Some(v);
    }
}

/// First description carried by an item matching the candidate.
pub fn find_description(outputs: &Value, id: Option<&str>, smiles: &str) -> Option<String> {
    matching_items(outputs, id, smiles)
        .into_iter()
        .find_map(|item| item.description)
}

/// All items in the node's recognized lists that match the candidate key.
fn matching_items(outputs: &Value, id: Option<&str>, smiles: &str) -> Vec<RawItem> {
    let mut items = output_items(outputs);
    items.extend(listed_items(outputs, "passed_items"));
    items.extend(listed_items(outputs, "pending_items"));
    items.retain(|item| item_matches(item, id, smiles));
    items
}

fn item_matches(item: &RawItem, id: Option<&str>, smiles: &str) -> bool {
    match (item.id_key(), id) {
        (Some(a), Some(b)) => a == b,
        _ => item.smiles.as_deref() == Some(smiles),
    }
}

/// Direct field read from a structured item, with the non-positive guard.
fn structured_score(item: &RawItem) -> Score {
    Score {
        total: positive(item.score),
        surface_anchoring: positive(item.surface_anchoring),
        energy_level: positive(item.energy_level),
        packing_density: positive(item.packing_density),
    }
}

fn block_refers_to(value: &Value, id: Option<&str>, smiles: &str) -> bool {
    let candidate = block_field(value, &["id", "candidate_id", "candidate"]);
    match candidate {
        Some(Value::String(s)) => id == Some(s.as_str()) || s == smiles,
        Some(Value::Number(n)) => id == Some(n.to_string().as_str()),
        _ => false,
    }
}

fn block_field<'a>(value: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|n| value.get(n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn extract(outputs: &Value, smiles: &str) -> Option<Score> {
        Extractor::default().extract(None, smiles, outputs, 1, None)
    }

    #[test]
    fn test_structured_match_by_smiles() {
        let outputs = json!({"output": [
            {"smiles": "CCO", "score": 8.0, "surfaceAnchoring": 8.0,
             "energyLevel": 7.0, "packingDensity": 9.0},
            {"smiles": "CCN", "score": 5.0}
        ]});
        let score = extract(&outputs, "CCO").unwrap();
        assert_eq!(score.total, Some(8.0));
        assert_eq!(score.energy_level, Some(7.0));

        let score = extract(&outputs, "CCN").unwrap();
        assert_eq!(score.total, Some(5.0));
        assert_eq!(score.surface_anchoring, None);
    }

    #[test]
    fn test_structured_match_by_id() {
        let outputs = json!({"output": [{"id": 3, "smiles": "CCO", "score": 6.5}]});
        let score = Extractor::default()
            .extract(Some("3"), "XXX", &outputs, 1, None)
            .unwrap();
        assert_eq!(score.total, Some(6.5));
    }

    #[test]
    fn test_nonpositive_values_are_absent() {
        let outputs = json!({"output": [
            {"smiles": "X", "score": 0, "surfaceAnchoring": -1.0}
        ]});
        assert_eq!(extract(&outputs, "X"), None);
    }

    #[test]
    fn test_prompt_fallback_fills_missing_dims() {
        let outputs = json!({
            "output": [{"id": "mol-3", "smiles": "CCO", "score": 8.0, "surfaceAnchoring": 8.2}],
            "iteration_outputs": [
                {"iteration": 1, "resolved_inputs": {"prompt":
                    "critic results: {\"candidate_id\": \"mol-3\", \"aspect\": \"energy level match\", \"score\": 6.5} \
                     {\"candidate_id\": \"mol-3\", \"aspect\": \"packing density\", \"score\": 7.0} \
                     {\"candidate_id\": \"mol-9\", \"aspect\": \"packing density\", \"score\": 1.0}"}}
            ]
        });
        let score = Extractor::default()
            .extract(Some("mol-3"), "CCO", &outputs, 1, None)
            .unwrap();
        assert_eq!(score.surface_anchoring, Some(8.2));
        assert_eq!(score.energy_level, Some(6.5));
        assert_eq!(score.packing_density, Some(7.0));
        // structured total is kept, not recomputed
        assert_eq!(score.total, Some(8.0));
    }

    #[test]
    fn test_prompt_fallback_wrong_iteration_ignored() {
        let outputs = json!({
            "output": [{"id": "mol-3", "smiles": "CCO", "score": 8.0}],
            "iteration_outputs": [
                {"iteration": 2, "resolved_inputs": {"prompt":
                    "{\"candidate_id\": \"mol-3\", \"aspect\": \"packing density\", \"score\": 7.0}"}}
            ]
        });
        let score = Extractor::default()
            .extract(Some("mol-3"), "CCO", &outputs, 1, None)
            .unwrap();
        assert_eq!(score.packing_density, None);
    }

    #[test]
    fn test_prompt_fallback_never_overwrites() {
        let outputs = json!({
            "output": [{"id": "m", "smiles": "CCO", "score": 8.0, "energyLevel": 7.0}],
            "iteration_outputs": [
                {"iteration": 1, "resolved_inputs": {"prompt":
                    "{\"candidate_id\": \"m\", \"aspect\": \"energy level match\", \"score\": 2.0}"}}
            ]
        });
        let score = Extractor::default()
            .extract(Some("m"), "CCO", &outputs, 1, None)
            .unwrap();
        assert_eq!(score.energy_level, Some(7.0));
    }

    #[test]
    fn test_free_text_fallback() {
        let outputs = json!({"output": [
            {"smiles": "CCO",
             "opt_des": "Strong surface anchoring: 8.2, energy level match: 6.5; packing density: 7.0 overall."}
        ]});
        let score = extract(&outputs, "CCO").unwrap();
        assert_eq!(score.surface_anchoring, Some(8.2));
        assert_eq!(score.energy_level, Some(6.5));
        assert_eq!(score.packing_density, Some(7.0));
        // derived: mean(8.2, 6.5, 7.0) = 7.2(33) → 7.2
        assert_eq!(score.total, Some(7.2));
    }

    #[test]
    fn test_free_text_localized_labels() {
        let outputs = json!({"output": [
            {"smiles": "CCO", "description": "表面锚定：8.0，能级:6.0"}
        ]});
        let score = extract(&outputs, "CCO").unwrap();
        assert_eq!(score.surface_anchoring, Some(8.0));
        assert_eq!(score.energy_level, Some(6.0));
        assert_eq!(score.total, Some(7.0));
    }

    #[test]
    fn test_description_hint_used_when_item_has_none() {
        let outputs = json!({"output": [{"smiles": "CCO"}]});
        let score = Extractor::default()
            .extract(None, "CCO", &outputs, 1, Some("packing density: 7.5"))
            .unwrap();
        assert_eq!(score.packing_density, Some(7.5));
        assert_eq!(score.total, Some(7.5));
    }

    #[test]
    fn test_derived_total_single_dim() {
        let outputs = json!({"output": [{"smiles": "CCO", "surfaceAnchoring": 9.0}]});
        let score = extract(&outputs, "CCO").unwrap();
        assert_eq!(score.total, Some(9.0));
    }

    #[test]
    fn test_nothing_resolved_returns_none() {
        let outputs = json!({"output": [{"smiles": "CCO", "opt_des": "no numbers here"}]});
        assert_eq!(extract(&outputs, "CCO"), None);
        let outputs = json!({"output": "plain text"});
        assert_eq!(extract(&outputs, "CCO"), None);
    }

    #[test]
    fn test_custom_labels() {
        let labels = DimensionLabels {
            surface_anchoring: vec!["adhesion".into()],
            ..Default::default()
        };
        let extractor = Extractor::new(&labels);
        let outputs = json!({"output": [{"smiles": "CCO", "opt_des": "adhesion = 4.5"}]});
        let score = extractor.extract(None, "CCO", &outputs, 1, None).unwrap();
        assert_eq!(score.surface_anchoring, Some(4.5));
    }
}
