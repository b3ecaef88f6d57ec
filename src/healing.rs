//! Healing and decomposition controller (spec 4.8).
//!
//! Two failure-response paths share the architect role. Decomposition is
//! evaluated first, at struggle-detection points before a phase actually
//! fails; healing only fires once a phase has terminated in a healable
//! error (Open Question 2, resolved — see DESIGN.md).

use crate::agent::{CycleState, Finding, Invoker, Role};
use crate::config::HealingConfig;
use crate::dag::DagCore;
use crate::errors::QuasarError;
use crate::phase_spec::{GateMode, PhaseSpec};

const OUTPUT_EXCERPT_BUDGET: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    MaxCycles,
    BudgetExceeded,
    FilterFailure,
    Unhealable,
}

#[derive(Debug, Clone)]
pub struct FailureDiagnosis {
    pub phase_id: String,
    pub kind: FailureKind,
    pub healable: bool,
    pub summary: String,
    pub last_coder_out: String,
    pub last_review_out: String,
    pub filter_name: Option<String>,
    pub filter_output: Option<String>,
    pub findings: Vec<Finding>,
    pub cycles_used: u32,
    pub budget_spent: f64,
}

fn excerpt(s: &str) -> String {
    if s.chars().count() <= OUTPUT_EXCERPT_BUDGET {
        s.to_string()
    } else {
        s.chars().take(OUTPUT_EXCERPT_BUDGET).collect()
    }
}

/// Classifies a terminal phase error against the last cycle's state.
pub fn analyze_failure(err: &QuasarError, state: &CycleState) -> FailureDiagnosis {
    let (kind, healable, summary, filter_name, filter_output) = match err {
        QuasarError::MaxCyclesExceeded { .. } => (
            FailureKind::MaxCycles,
            true,
            "exhausted cycles without reviewer approval".to_string(),
            None,
            None,
        ),
        QuasarError::BudgetExceeded { spent_usd, budget_usd, .. } => (
            FailureKind::BudgetExceeded,
            true,
            format!("spent ${spent_usd:.2} of ${budget_usd:.2} budget"),
            None,
            None,
        ),
        QuasarError::LintFilterFailure { filter_name, output, .. } => (
            FailureKind::FilterFailure,
            true,
            format!("lint filter '{filter_name}' kept failing"),
            Some(filter_name.clone()),
            Some(excerpt(output)),
        ),
        other => (
            FailureKind::Unhealable,
            false,
            other.to_string(),
            None,
            None,
        ),
    };

    FailureDiagnosis {
        phase_id: state.task_id.clone(),
        kind,
        healable,
        summary,
        last_coder_out: excerpt(&state.coder_output),
        last_review_out: excerpt(&state.review_output),
        filter_name,
        filter_output,
        findings: state.all_findings.clone(),
        cycles_used: state.cycle,
        budget_spent: state.total_cost_usd,
    }
}

/// `HealingPolicy.CanHeal`: enabled, the diagnosis is healable, under the
/// max-attempts cap, and budget reserve remains positive.
pub fn can_heal(policy: &HealingConfig, diag: &FailureDiagnosis, prior_attempts: u32) -> bool {
    policy.enabled
        && diag.healable
        && prior_attempts < policy.max_attempts
        && policy.budget_reserve_usd > 0.0
}

/// Prompt handed to the architect role to synthesize a single remediation
/// phase.
pub fn build_remediation_request(diag: &FailureDiagnosis, fabric_snapshot_summary: &str, failed_spec: &PhaseSpec) -> String {
    format!(
        "Phase '{}' ({}) failed: {}\n\nOriginal task:\n{}\n\nLast coder output:\n{}\n\nLast review output:\n{}\n\nFabric context:\n{}\n\nPropose a single remediation phase spec that fixes this.",
        diag.phase_id,
        failed_spec.title,
        diag.summary,
        failed_spec.body,
        diag.last_coder_out,
        diag.last_review_out,
        fabric_snapshot_summary,
    )
}

/// Finalizes an architect-proposed remediation into a concrete spec: ID
/// becomes `heal-<originalID>`, scope and gate are inherited from the
/// failed phase, and an `auto-healing` label is appended.
pub fn finalize_remediation_spec(failed_spec: &PhaseSpec, title: String, body: String) -> PhaseSpec {
    let mut labels = failed_spec.labels.clone();
    labels.push("auto-healing".to_string());
    PhaseSpec {
        id: format!("heal-{}", failed_spec.id),
        title,
        body,
        phase_type: failed_spec.phase_type,
        priority: failed_spec.priority,
        depends_on: Vec::new(),
        scope: failed_spec.scope.clone(),
        labels,
        gate: failed_spec.gate,
        max_cycles: failed_spec.max_cycles,
        max_budget_usd: failed_spec.max_budget_usd,
        model: failed_spec.model.clone(),
    }
}

/// Inserts the remediation phase in place of the failed one: it takes over
/// the failed phase's outgoing edges (dependents now depend on it instead).
pub fn insert_remediation(dag: &mut DagCore, original_id: &str, remediation_id: &str) -> Result<(), QuasarError> {
    let priority = dag.priority(original_id).unwrap_or(0);
    let predecessors = dag.direct_dependencies(original_id);
    let dependents = dag.direct_dependents(original_id);
    let snapshot = dag.clone();

    dag.add_node(remediation_id, priority);
    for p in &predecessors {
        if let Err(e) = dag.add_edge(remediation_id, p) {
            *dag = snapshot;
            return Err(e.into());
        }
    }
    for d in &dependents {
        if let Err(e) = dag.add_edge(d, remediation_id) {
            *dag = snapshot;
            return Err(e.into());
        }
    }
    Ok(())
}

/// Struggle signals that trigger decomposition before a phase terminally
/// fails: recurring findings, low satisfaction across cycles, or early
/// budget burn relative to the configured thresholds.
#[derive(Debug, Clone, Copy)]
pub struct StruggleSignals {
    pub recurring_finding_count: u32,
    pub consecutive_low_satisfaction_cycles: u32,
    pub budget_spent_fraction: f64,
}

pub fn is_struggling(signals: StruggleSignals, budget_threshold_fraction: f64) -> bool {
    signals.recurring_finding_count >= 2
        || signals.consecutive_low_satisfaction_cycles >= 2
        || signals.budget_spent_fraction >= budget_threshold_fraction
}

/// Atomic graph surgery replacing `original_id` with 2-3 sub-phases (spec
/// 4.8). Predecessors fan out to every sub-phase; every sub-phase fans in to
/// every original dependent; `inter_deps` wires declared sub-phase-to-
/// sub-phase edges. Rolls back to the pre-surgery graph if any edge would
/// create a cycle.
pub fn apply_decomposition(
    dag: &mut DagCore,
    original_id: &str,
    sub_phase_ids: &[String],
    inter_deps: &[(String, String)],
) -> Result<(), QuasarError> {
    let priority = dag.priority(original_id).unwrap_or(0);
    let predecessors = dag.direct_dependencies(original_id);
    let dependents = dag.direct_dependents(original_id);
    let snapshot = dag.clone();

    dag.remove_node(original_id);
    for sub in sub_phase_ids {
        dag.add_node(sub.as_str(), priority);
    }

    let surgery = (|| -> Result<(), crate::dag::CycleError> {
        for sub in sub_phase_ids {
            for p in &predecessors {
                dag.add_edge(sub, p)?;
            }
        }
        for d in &dependents {
            for sub in sub_phase_ids {
                dag.add_edge(d, sub)?;
            }
        }
        for (dependent, dependency) in inter_deps {
            dag.add_edge(dependent, dependency)?;
        }
        Ok(())
    })();

    match surgery {
        Ok(()) => Ok(()),
        Err(e) => {
            *dag = snapshot;
            Err(e.into())
        }
    }
}

/// True under gate modes where healing/decomposition must block on a hail
/// before proceeding (spec 4.8).
pub fn requires_approval(gate: GateMode) -> bool {
    matches!(gate, GateMode::Approve | GateMode::Watch)
}

/// Invokes the architect role with a decompose-mode prompt; a thin wrapper
/// kept separate from `run_phase` since decomposition has no coder/reviewer
/// cycle of its own.
pub async fn invoke_architect(
    invoker: &dyn Invoker,
    system_prompt: &str,
    prompt: &str,
    working_dir: &std::path::Path,
    model: Option<&str>,
    budget_usd: f64,
) -> Result<String, QuasarError> {
    let result = invoker
        .invoke(Role::Architect, system_prompt, prompt, working_dir, model, budget_usd)
        .await?;
    Ok(result.text)
}
