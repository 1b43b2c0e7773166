//! Node role classification.
//!
//! The upstream engine does not label its nodes, so roles are assigned by an
//! ordered table of rules, each a pure predicate over the node's display name
//! and output shape. The default table encodes the known naming conventions
//! (including localized tokens and the positional `llm1`–`llm4` aliases) but
//! deployments can supply their own table via `evotrace.toml`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::output_items;

/// Role of a node within the generate→evaluate→summarize loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Emits new candidate items.
    Generation,
    /// Scores existing candidates.
    Evaluation,
    /// Wraps up an iteration; may also carry scores.
    Summary,
    /// Not part of the loop; excluded from reconciliation.
    Other,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Generation => write!(f, "generation"),
            Role::Evaluation => write!(f, "evaluation"),
            Role::Summary => write!(f, "summary"),
            Role::Other => write!(f, "other"),
        }
    }
}

/// One predicate in the rule table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RulePattern {
    /// Display name (or node kind) contains any of the tokens,
    /// case-insensitively.
    NameContains { tokens: Vec<String> },
    /// `outputs.output` holds items carrying a SMILES field.
    OutputItemsWithSmiles,
    /// `outputs.output` is a string longer than `min_chars` (long narrative
    /// text is assumed to be a wrap-up).
    LongTextOutput { min_chars: usize },
    /// Any non-empty output at all (conservative default: assume scored
    /// content until proven otherwise).
    AnyOutput,
}

impl RulePattern {
    fn matches(&self, display_name: &str, node_kind: Option<&str>, outputs: Option<&Value>) -> bool {
        match self {
            RulePattern::NameContains { tokens } => {
                let name = display_name.to_lowercase();
                let kind = node_kind.map(str::to_lowercase);
                tokens.iter().any(|t| {
                    let t = t.to_lowercase();
                    name.contains(&t) || kind.as_deref().is_some_and(|k| k.contains(&t))
                })
            }
            RulePattern::OutputItemsWithSmiles => outputs.is_some_and(|o| {
                output_items(o).iter().any(|item| item.smiles.is_some())
            }),
            RulePattern::LongTextOutput { min_chars } => outputs
                .and_then(|o| o.get("output"))
                .and_then(Value::as_str)
                .is_some_and(|s| s.chars().count() > *min_chars),
            RulePattern::AnyOutput => outputs.is_some_and(has_nonempty_output),
        }
    }
}

fn has_nonempty_output(outputs: &Value) -> bool {
    let nonempty = |v: &Value| match v {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        _ => true,
    };
    ["output", "passed_items", "pending_items"]
        .iter()
        .filter_map(|k| outputs.get(*k))
        .any(|v| nonempty(v))
        || outputs
            .get("iteration_outputs")
            .is_some_and(|v| nonempty(v))
}

/// One entry of the ordered rule table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierRule {
    pub role: Role,
    pub pattern: RulePattern,
}

/// Ordered-table classifier; the first matching rule decides the role.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<ClassifierRule>,
}

impl Default for Classifier {
    fn default() -> Self {
        Classifier {
            rules: default_rules(),
        }
    }
}

impl Classifier {
    pub fn new(rules: Vec<ClassifierRule>) -> Self {
        Classifier { rules }
    }

    /// Assign a role to one node execution. Falls through to `Role::Other`
    /// when no rule matches.
    pub fn classify(
        &self,
        display_name: &str,
        node_kind: Option<&str>,
        outputs: Option<&Value>,
    ) -> Role {
        for rule in &self.rules {
            if rule.pattern.matches(display_name, node_kind, outputs) {
                return rule.role;
            }
        }
        Role::Other
    }
}

/// The default rule table, in priority order.
pub fn default_rules() -> Vec<ClassifierRule> {
    let name = |role, tokens: &[&str]| ClassifierRule {
        role,
        pattern: RulePattern::NameContains {
            tokens: tokens.iter().map(|s| s.to_string()).collect(),
        },
    };
    vec![
        name(Role::Summary, &["summary", "总结", "llm4"]),
        name(Role::Evaluation, &["evaluation", "评估", "critic", "llm1", "llm2", "llm3"]),
        ClassifierRule {
            role: Role::Generation,
            pattern: RulePattern::OutputItemsWithSmiles,
        },
        ClassifierRule {
            role: Role::Summary,
            pattern: RulePattern::LongTextOutput { min_chars: 200 },
        },
        ClassifierRule {
            role: Role::Evaluation,
            pattern: RulePattern::AnyOutput,
        },
    ]
}
