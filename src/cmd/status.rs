//! `quasar status`: reports each phase's fabric state and any unresolved
//! discoveries for an in-progress or completed run.

use crate::config::RunPaths;
use crate::fabric::{FabricStore, PhaseStatus};
use anyhow::Result;
use std::collections::HashMap;

pub struct StatusReport {
    pub phase_states: HashMap<String, PhaseStatus>,
    pub unresolved_discoveries: usize,
}

pub fn run(paths: &RunPaths) -> Result<StatusReport> {
    paths.ensure_dirs()?;
    let fabric = FabricStore::open(&paths.fabric_db_path())?;
    let phase_states = fabric.all_phase_states()?;
    let unresolved_discoveries = fabric.unresolved_discoveries()?.len();
    Ok(StatusReport {
        phase_states,
        unresolved_discoveries,
    })
}

pub fn render(report: &StatusReport) -> String {
    let mut ids: Vec<&String> = report.phase_states.keys().collect();
    ids.sort();
    let mut out = String::new();
    for id in ids {
        out.push_str(&format!("{id}: {:?}\n", report.phase_states[id]));
    }
    out.push_str(&format!(
        "unresolved discoveries: {}\n",
        report.unresolved_discoveries
    ));
    out
}
