//! `quasar validate`: load the run manifest and phase specs, build the DAG,
//! and report any structural problems without executing anything.

use crate::config::RunPaths;
use crate::dag::DagCore;
use crate::phase_spec::{self, PhaseSpec};
use anyhow::{Result, bail};

pub struct ValidationReport {
    pub phase_count: usize,
    pub wave_count: usize,
    pub warnings: Vec<String>,
}

pub fn build_dag(specs: &[PhaseSpec]) -> Result<DagCore> {
    let mut dag = DagCore::new();
    for spec in specs {
        dag.add_node(spec.id.as_str(), spec.priority);
    }
    for spec in specs {
        for dep in &spec.depends_on {
            if !dag.contains(dep) {
                bail!(
                    "phase '{}' depends on unknown phase '{}'",
                    spec.id,
                    dep
                );
            }
            dag.add_edge(&spec.id, dep)?;
        }
    }
    Ok(dag)
}

pub fn run(paths: &RunPaths) -> Result<ValidationReport> {
    let _manifest = crate::config::RunManifest::load(&paths.manifest_path())
        .unwrap_or_default();
    let specs = phase_spec::load_all(&paths.phases_dir())?;
    if specs.is_empty() {
        bail!("no phase-spec files found under {}", paths.phases_dir().display());
    }

    let dag = build_dag(&specs)?;
    let mut warnings = Vec::new();
    for spec in &specs {
        if spec.scope.is_empty() {
            warnings.push(format!("phase '{}' declares an empty scope", spec.id));
        }
    }

    Ok(ValidationReport {
        phase_count: specs.len(),
        wave_count: dag.waves().len(),
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_spec(dir: &std::path::Path, id: &str, depends_on: &str) {
        std::fs::write(
            dir.join(format!("{id}.md")),
            format!("+++\nid = \"{id}\"\ntitle = \"t\"\ndepends_on = {depends_on}\n+++\nbody\n"),
        )
        .unwrap();
    }

    #[test]
    fn validates_clean_run() {
        let dir = tempdir().unwrap();
        let paths = RunPaths::new(dir.path());
        paths.ensure_dirs().unwrap();
        write_spec(&paths.phases_dir(), "01", "[]");
        write_spec(&paths.phases_dir(), "02", "[\"01\"]");

        let report = run(&paths).unwrap();
        assert_eq!(report.phase_count, 2);
        assert_eq!(report.wave_count, 2);
    }

    #[test]
    fn rejects_unknown_dependency() {
        let dir = tempdir().unwrap();
        let paths = RunPaths::new(dir.path());
        paths.ensure_dirs().unwrap();
        write_spec(&paths.phases_dir(), "01", "[\"missing\"]");

        assert!(run(&paths).is_err());
    }

    #[test]
    fn empty_phase_dir_errors() {
        let dir = tempdir().unwrap();
        let paths = RunPaths::new(dir.path());
        paths.ensure_dirs().unwrap();
        assert!(run(&paths).is_err());
    }
}
