//! Per-phase agent loop: coder/lint-fix/reviewer state machine, findings
//! tracking, and checkpointing (spec 4.5, 4.11).

mod checkpoint;
mod cycle;
mod findings;

pub use checkpoint::{CheckpointError, CyclePhase, CycleState, load_checkpoint, write_checkpoint};
pub use cycle::{
    Hail, InvokeResult, Invoker, LintOutcome, LintRunner, MAX_LINT_FIX_ITERATIONS, ParsedReview,
    PhaseOutcome, Risk, Role, Satisfaction, Strictness, ReviewReport, evaluate_hail,
    parse_review_output, run_phase, strictness_for_cycle,
};
pub use findings::{Finding, FindingStatus, Severity, render_findings};
