//! `quasar apply`: executes a run end to end via the worker group.

use crate::agent::{Invoker, LintRunner};
use crate::cmd::invoker::{ShellInvoker, ShellLintRunner};
use crate::cmd::validate::build_dag;
use crate::complexity::RoutingContext;
use crate::config::{RunManifest, RunPaths};
use crate::fabric::FabricStore;
use crate::phase_spec;
use crate::telemetry::{NdjsonTelemetry, NullTelemetry, TelemetryEmitter};
use crate::tracker::GitTracker;
use crate::worker_group::{RunSummary, WorkerGroup};
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

pub struct ApplyOptions {
    pub auto: bool,
    pub max_workers: Option<u32>,
    pub watch: bool,
    pub resume: bool,
    pub routing: bool,
    pub agent_cmd: String,
    pub lint_cmd: Option<String>,
}

pub async fn run(project_dir: &Path, paths: &RunPaths, opts: ApplyOptions) -> Result<RunSummary> {
    paths.ensure_dirs()?;
    let mut manifest = RunManifest::load(&paths.manifest_path()).unwrap_or_default();
    if let Some(max_workers) = opts.max_workers {
        manifest.execution.max_workers = max_workers;
    }
    if opts.routing {
        manifest.execution.routing.enabled = true;
    }
    if opts.auto {
        manifest.execution.gate = Some(crate::phase_spec::GateMode::Trust);
    } else if opts.watch {
        manifest.execution.gate = Some(crate::phase_spec::GateMode::Watch);
    }

    let specs = phase_spec::load_all(&paths.phases_dir())?;
    let dag = build_dag(&specs)?;
    let fabric = FabricStore::open(&paths.fabric_db_path())?;
    let git = GitTracker::new(project_dir)?;

    let routing = if manifest.execution.routing.enabled {
        RoutingContext::new(
            manifest
                .execution
                .routing
                .tiers
                .clone()
                .unwrap_or_default(),
        )
        .ok()
    } else {
        None
    };

    let invoker: Arc<dyn Invoker> = Arc::new(ShellInvoker::new(opts.agent_cmd));
    let lint: Arc<dyn LintRunner> = match opts.lint_cmd {
        Some(cmd) => Arc::new(ShellLintRunner::new(cmd, Vec::new())),
        None => Arc::new(ShellLintRunner::new("true".to_string(), Vec::new())),
    };
    let telemetry: Arc<dyn TelemetryEmitter> = match NdjsonTelemetry::open(&paths.telemetry_path())
    {
        Ok(t) => Arc::new(t),
        Err(_) => Arc::new(NullTelemetry),
    };

    let group = WorkerGroup::new(
        dag,
        fabric,
        specs,
        manifest.execution,
        routing,
        paths.clone(),
        invoker,
        lint,
        git,
        telemetry,
        project_dir.to_path_buf(),
        String::new(),
        opts.resume,
    );

    group.run().await
}
