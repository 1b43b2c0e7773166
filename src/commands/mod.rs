pub mod analytics_cmd;
pub mod ingest;
pub mod lineage_cmd;
pub mod records;

use std::path::Path;

use anyhow::{Context, Result};

use evotrace::persist::{deserialize, FsStore, Store};
use evotrace::state::ReconciledState;

/// Load a reconciled state from the record store.
///
/// `record` defaults to the latest stored record.
pub fn load_state(dir: &Path, record: Option<&str>) -> Result<ReconciledState> {
    let store = FsStore::new(dir);
    let record_id = match record {
        Some(id) => id.to_string(),
        None => store
            .list()?
            .pop()
            .context("No stored records. Run 'evotrace ingest --save' first.")?,
    };
    let value = store
        .get(&record_id)
        .with_context(|| format!("Failed to load record '{}'", record_id))?;
    deserialize(&value).with_context(|| format!("Record '{}' holds a corrupt state", record_id))
}

/// One-line rendering of a candidate for human output.
pub fn candidate_label(candidate: &evotrace::model::Candidate) -> String {
    match &candidate.id {
        Some(id) => format!("{} ({})", id, candidate.smiles),
        None => candidate.smiles.clone(),
    }
}
