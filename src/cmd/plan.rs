//! `quasar plan`: prints the wave grouping and resolved execution for every
//! phase without dispatching any work (spec 4.9 "plan-level approval").

use crate::cmd::validate::build_dag;
use crate::complexity::RoutingContext;
use crate::config::{RunManifest, RunPaths};
use crate::phase_spec::{self, PhaseSpec};
use crate::resolver::{self, ResolvedExecution};
use anyhow::Result;

pub struct PlannedWave {
    pub phases: Vec<(PhaseSpec, ResolvedExecution)>,
}

pub fn run(paths: &RunPaths) -> Result<Vec<PlannedWave>> {
    let manifest = RunManifest::load(&paths.manifest_path()).unwrap_or_default();
    let specs = phase_spec::load_all(&paths.phases_dir())?;
    let dag = build_dag(&specs)?;
    let by_id: std::collections::HashMap<_, _> =
        specs.iter().map(|s| (s.id.clone(), s.clone())).collect();

    let routing = if manifest.execution.routing.enabled {
        let tiers = manifest
            .execution
            .routing
            .tiers
            .clone()
            .unwrap_or_default();
        RoutingContext::new(tiers).ok()
    } else {
        None
    };

    let mut waves = Vec::new();
    for wave in dag.waves() {
        let mut phases = Vec::new();
        for id in wave {
            let spec = by_id[&id].clone();
            let ancestor_depth = dag.ancestors(&id).len();
            let resolved = resolver::resolve(
                &spec,
                &manifest.execution,
                routing.as_ref(),
                ancestor_depth,
                manifest.execution.model.as_deref(),
            );
            phases.push((spec, resolved));
        }
        waves.push(PlannedWave { phases });
    }
    Ok(waves)
}

/// Renders a plan as human-readable text for the CLI's stdout.
pub fn render(waves: &[PlannedWave]) -> String {
    let mut out = String::new();
    for (i, wave) in waves.iter().enumerate() {
        out.push_str(&format!("wave {}:\n", i + 1));
        for (spec, resolved) in &wave.phases {
            out.push_str(&format!(
                "  {} [{}] model={} max_cycles={} budget=${:.2}\n",
                spec.id,
                spec.title,
                resolved.model.as_deref().unwrap_or("default"),
                resolved.max_cycles,
                resolved.max_budget_usd,
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase_spec::PhaseSpec;
    use tempfile::tempdir;

    fn write_spec(dir: &std::path::Path, id: &str, depends_on: &str) {
        std::fs::write(
            dir.join(format!("{id}.md")),
            format!("+++\nid = \"{id}\"\ntitle = \"Phase {id}\"\ndepends_on = {depends_on}\n+++\nbody\n"),
        )
        .unwrap();
    }

    #[test]
    fn plans_waves_in_dependency_order() {
        let dir = tempdir().unwrap();
        let paths = RunPaths::new(dir.path());
        paths.ensure_dirs().unwrap();
        write_spec(&paths.phases_dir(), "01", "[]");
        write_spec(&paths.phases_dir(), "02", "[\"01\"]");

        let waves = run(&paths).unwrap();
        assert_eq!(waves.len(), 2);
        assert_eq!(waves[0].phases.len(), 1);
        assert_eq!(waves[0].phases[0].0.id, "01");
        assert_eq!(waves[1].phases[0].0.id, "02");
    }

    #[test]
    fn render_includes_phase_titles() {
        let spec = PhaseSpec {
            id: "01".into(),
            title: "Setup".into(),
            body: String::new(),
            phase_type: crate::phase_spec::PhaseType::Task,
            priority: 0,
            depends_on: Vec::new(),
            scope: Vec::new(),
            labels: Vec::new(),
            gate: None,
            max_cycles: None,
            max_budget_usd: None,
            model: None,
        };
        let resolved = resolver::resolve(&spec, &Default::default(), None, 0, None);
        let waves = vec![PlannedWave { phases: vec![(spec, resolved)] }];
        let text = render(&waves);
        assert!(text.contains("Setup"));
        assert!(text.contains("wave 1"));
    }
}
