//! `evotrace trends` and `evotrace pareto` — derived cross-iteration views.

use anyhow::Result;
use std::path::Path;

use evotrace::analytics::compute_analytics;

use super::load_state;

pub fn run_trends(dir: &Path, record: Option<&str>, json: bool) -> Result<()> {
    let state = load_state(dir, record)?;
    let analytics = compute_analytics(&state);

    if json {
        println!("{}", serde_json::to_string_pretty(&analytics.candidate_trends)?);
        return Ok(());
    }

    if !analytics.has_data {
        println!("No scored candidates yet.");
        return Ok(());
    }
    println!("Score trends:\n");
    for (key, series) in &analytics.candidate_trends {
        let rendered: Vec<String> = series
            .iter()
            .map(|p| format!("{}:{:.1}", p.iter, p.total))
            .collect();
        println!("  {:<24} {}", key, rendered.join("  "));
    }
    Ok(())
}

pub fn run_pareto(dir: &Path, record: Option<&str>, json: bool) -> Result<()> {
    let state = load_state(dir, record)?;
    let analytics = compute_analytics(&state);

    if json {
        println!("{}", serde_json::to_string_pretty(&analytics.pareto_points)?);
        return Ok(());
    }

    if !analytics.has_data {
        println!("No scored candidates yet.");
        return Ok(());
    }
    println!("{:>5}  {:>6}  {}", "iter", "total", "candidate");
    for point in &analytics.pareto_points {
        let label = match &point.id {
            Some(id) => format!("{} ({})", id, point.smiles),
            None => point.smiles.clone(),
        };
        println!("{:>5}  {:>6.1}  {}", point.iter, point.total, label);
    }
    Ok(())
}
