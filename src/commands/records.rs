//! `evotrace records` — list, show, and delete stored records.

use anyhow::Result;
use std::path::Path;

use evotrace::persist::{FsStore, Store};

use super::{candidate_label, load_state};

pub fn run_list(dir: &Path, json: bool) -> Result<()> {
    let store = FsStore::new(dir);
    let ids = store.list()?;
    if ids.is_empty() {
        if json {
            println!("[]");
        } else {
            println!("No stored records.");
        }
        return Ok(());
    }

    let mut metas = Vec::new();
    for id in &ids {
        match store.load_meta(id) {
            Ok(meta) => metas.push(meta),
            Err(e) => {
                eprintln!("Warning: could not load metadata for {}: {}", id, e);
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&metas)?);
    } else {
        println!("Stored records:\n");
        for meta in &metas {
            println!("  {} ({})", meta.id, meta.timestamp);
            if let Some(run_id) = &meta.run_id {
                println!("    Run: {}", run_id);
            }
        }
    }
    Ok(())
}

pub fn run_show(dir: &Path, record: &str, json: bool) -> Result<()> {
    let state = load_state(dir, Some(record))?;

    if json {
        let snapshots: Vec<_> = state.iteration_snapshots().collect();
        println!("{}", serde_json::to_string_pretty(&snapshots)?);
        return Ok(());
    }

    if let Some(run_id) = &state.run_id {
        println!("Run: {}", run_id);
    }
    for snap in state.iteration_snapshots() {
        println!("\nIteration {}:", snap.iter);
        for c in &snap.passed {
            println!("  passed   {}", candidate_label(c));
        }
        for c in &snap.pending {
            println!("  pending  {}", candidate_label(c));
        }
        if let Some(best) = &snap.best {
            println!("  best     {}", candidate_label(best));
        }
    }
    Ok(())
}

pub fn run_delete(dir: &Path, record: &str) -> Result<()> {
    let store = FsStore::new(dir);
    store.delete(record)?;
    println!("Deleted {}", record);
    Ok(())
}
