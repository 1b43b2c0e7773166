//! `evotrace lineage` — trace a candidate's evolution chain.

use anyhow::{bail, Result};
use std::path::Path;

use evotrace::lineage::trace_lineage;
use evotrace::model::Candidate;

use super::{candidate_label, load_state};

pub fn run(dir: &Path, candidate: &str, record: Option<&str>, json: bool) -> Result<()> {
    let state = load_state(dir, record)?;

    // The argument may be an id or a SMILES; prefer the id interpretation.
    let target = state
        .iteration_snapshots()
        .flat_map(|s| s.members())
        .find(|c| c.id.as_deref() == Some(candidate))
        .or_else(|| {
            state
                .iteration_snapshots()
                .flat_map(|s| s.members())
                .find(|c| c.smiles == candidate)
        })
        .cloned()
        .unwrap_or_else(|| Candidate::new(candidate));

    let trace = trace_lineage(&state, &target);

    if json {
        println!("{}", serde_json::to_string_pretty(&trace)?);
        return Ok(());
    }

    if trace.edges.is_empty() {
        bail!("Candidate '{}' not found in any iteration", candidate);
    }
    println!("Lineage for {}:\n", candidate_label(&target));
    for edge in &trace.edges {
        match &edge.parent {
            Some(parent) => println!(
                "  iter {:>3}  {}  <- {}  [{}]",
                edge.iteration,
                candidate_label(&edge.child),
                candidate_label(parent),
                edge.confidence
            ),
            None => println!(
                "  iter {:>3}  {}  (root)",
                edge.iteration,
                candidate_label(&edge.child)
            ),
        }
    }
    if !trace.complete {
        eprintln!("\nWarning: lineage incomplete (cycle or malformed iteration data)");
    }
    Ok(())
}
