//! `evotrace ingest` — reconcile an event stream into iteration snapshots.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use evotrace::config::Config;
use evotrace::engine::Engine;
use evotrace::event::read_events;
use evotrace::persist::FsStore;

use super::candidate_label;

pub fn run(dir: &Path, file: Option<&Path>, save: bool, json: bool) -> Result<()> {
    let config = Config::load(dir)?;
    let events = match file {
        Some(path) if path.as_os_str() != "-" => {
            let f = File::open(path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            read_events(BufReader::new(f))?
        }
        _ => read_events(io::stdin().lock())?,
    };

    let mut engine = Engine::new(&config);
    engine.ingest(&events);

    if save {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let store = FsStore::new(dir);
        match engine.save(&store) {
            Some(record_id) => eprintln!("Saved as {}", record_id),
            None => eprintln!("Warning: state could not be saved; continuing"),
        }
    }

    let state = &engine.state;
    if json {
        let snapshots: Vec<_> = state.iteration_snapshots().collect();
        println!("{}", serde_json::to_string_pretty(&snapshots)?);
        return Ok(());
    }

    if let Some(run_id) = &state.run_id {
        println!("Run: {}", run_id);
    }
    if let Some(error) = &state.run_error {
        println!("Run error: {}", error);
    }
    if state.snapshots.is_empty() {
        println!("No iterations reconciled.");
        return Ok(());
    }
    for snap in state.iteration_snapshots() {
        println!("\nIteration {}:", snap.iter);
        println!("  Passed:  {}", snap.passed.len());
        println!("  Pending: {}", snap.pending.len());
        match &snap.best {
            Some(best) => {
                let total = best
                    .score
                    .as_ref()
                    .and_then(|s| s.total)
                    .map(|t| format!("{:.1}", t))
                    .unwrap_or_else(|| "unscored".into());
                println!("  Best:    {} [{}]", candidate_label(best), total);
            }
            None => println!("  Best:    (none scored)"),
        }
    }
    if !state.node_errors.is_empty() {
        println!("\nNode errors:");
        for (node_id, error) in &state.node_errors {
            println!("  {}: {}", node_id, error);
        }
    }
    Ok(())
}
