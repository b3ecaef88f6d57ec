//! The per-phase coder → lint-fix → reviewer loop (spec 4.5).
//!
//! `Invoker` and `LintRunner` are contracts only — no subprocess-spawning
//! implementation ships in this crate (out of scope per spec section 1).
//! Tests exercise the loop against in-memory scripted fixtures.

use super::checkpoint::{CyclePhase, CycleState, load_checkpoint, write_checkpoint};
use super::findings::{Finding, FindingStatus, Severity, render_findings};
use crate::errors::QuasarError;
use crate::healing::{self, StruggleSignals};
use crate::phase_spec::PhaseSpec;
use crate::resolver::ResolvedExecution;
use crate::telemetry::{EventKind, TelemetryEmitter};
use crate::tracker::GitTracker;
use async_trait::async_trait;
use std::path::Path;

/// Fixed lint-fix iteration cap per cycle (Open Question 1, resolved in
/// SPEC_FULL.md 4.5).
pub const MAX_LINT_FIX_ITERATIONS: u32 = 3;

/// Budget-burn fraction past which a phase is considered struggling even
/// without recurring findings or a low-satisfaction streak (Open Question 3,
/// resolved in SPEC_FULL.md 4.8).
const STRUGGLE_BUDGET_THRESHOLD_FRACTION: f64 = 0.8;

fn role_str(role: Role) -> &'static str {
    match role {
        Role::Coder => "coder",
        Role::Reviewer => "reviewer",
        Role::Architect => "architect",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Coder,
    Reviewer,
    Architect,
}

#[derive(Debug, Clone)]
pub struct InvokeResult {
    pub text: String,
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub session_id: String,
}

/// Contract with the external agent-invocation backend (spec 6). System
/// prompt composition order is stable across calls for cache locality:
/// `[project snapshot] \n\n---\n\n [role base prompt] \n\n [fabric protocol]`.
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(
        &self,
        role: Role,
        system_prompt: &str,
        user_prompt: &str,
        working_dir: &Path,
        model: Option<&str>,
        budget_usd: f64,
    ) -> Result<InvokeResult, QuasarError>;
}

#[derive(Debug, Clone)]
pub struct LintOutcome {
    pub success: bool,
    pub output: String,
    pub filter_name: Option<String>,
}

#[async_trait]
pub trait LintRunner: Send + Sync {
    async fn run(&self, working_dir: &Path) -> LintOutcome;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strictness {
    Lenient,
    Standard,
    Strict,
}

/// `StrictnessForCycle(c, M)` (spec section 8 boundary property).
pub fn strictness_for_cycle(cycle: u32, max_cycles: u32) -> Strictness {
    if max_cycles <= 1 {
        return Strictness::Strict;
    }
    if max_cycles == 2 {
        return if cycle <= 1 {
            Strictness::Standard
        } else {
            Strictness::Strict
        };
    }
    match cycle {
        1 | 2 => Strictness::Lenient,
        3 | 4 => Strictness::Standard,
        _ => Strictness::Strict,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Satisfaction {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Risk {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone)]
pub struct ReviewReport {
    pub satisfaction: Satisfaction,
    pub risk: Risk,
    pub needs_human_review: bool,
    pub summary: String,
}

#[derive(Debug, Clone)]
pub struct ParsedReview {
    pub approved: bool,
    pub issues: Vec<(Severity, String)>,
    pub report: Option<ReviewReport>,
    pub verifications: Vec<(String, FindingStatus)>,
}

/// Parses the reviewer's free-text output for `ISSUE:` blocks, an optional
/// `APPROVED:` marker, a trailing `REPORT:` block, and `VERIFICATION:`
/// blocks for findings raised in prior cycles (spec 6).
pub fn parse_review_output(text: &str) -> ParsedReview {
    let approved = text.contains("APPROVED:");
    let mut issues = Vec::new();
    let mut verifications = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("ISSUE:") {
            let rest = rest.trim();
            let (severity, desc) = if let Some(d) = rest.strip_prefix("critical:") {
                (Severity::Critical, d.trim())
            } else if let Some(d) = rest.strip_prefix("major:") {
                (Severity::Major, d.trim())
            } else if let Some(d) = rest.strip_prefix("minor:") {
                (Severity::Minor, d.trim())
            } else {
                (Severity::Major, rest)
            };
            issues.push((severity, desc.to_string()));
        } else if let Some(rest) = trimmed.strip_prefix("VERIFICATION:") {
            let rest = rest.trim();
            let mut parts = rest.splitn(2, ' ');
            if let (Some(id_part), Some(status_part)) = (parts.next(), parts.next())
                && let Some(id) = id_part.strip_prefix("id=")
            {
                let status = match status_part.trim() {
                    "fixed" => Some(FindingStatus::Fixed),
                    "still_present" => Some(FindingStatus::StillPresent),
                    "regressed" => Some(FindingStatus::Regressed),
                    _ => None,
                };
                if let Some(status) = status {
                    verifications.push((id.to_string(), status));
                }
            }
        }
    }

    let report = parse_report_block(text);

    ParsedReview {
        approved,
        issues,
        report,
        verifications,
    }
}

fn parse_report_block(text: &str) -> Option<ReviewReport> {
    if !text.contains("REPORT:") {
        return None;
    }
    let mut satisfaction = Satisfaction::Medium;
    let mut risk = Risk::Low;
    let mut needs_human_review = false;
    let mut summary = String::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(v) = trimmed.strip_prefix("SATISFACTION:") {
            satisfaction = match v.trim().to_lowercase().as_str() {
                "low" => Satisfaction::Low,
                "high" => Satisfaction::High,
                _ => Satisfaction::Medium,
            };
        } else if let Some(v) = trimmed.strip_prefix("RISK:") {
            risk = match v.trim().to_lowercase().as_str() {
                "high" => Risk::High,
                "medium" => Risk::Medium,
                _ => Risk::Low,
            };
        } else if let Some(v) = trimmed.strip_prefix("NEEDS_HUMAN_REVIEW:") {
            needs_human_review = matches!(v.trim().to_lowercase().as_str(), "yes" | "true");
        } else if let Some(v) = trimmed.strip_prefix("SUMMARY:") {
            summary = v.trim().to_string();
        }
    }

    Some(ReviewReport {
        satisfaction,
        risk,
        needs_human_review,
        summary,
    })
}

#[derive(Debug, Clone)]
pub struct Hail {
    pub phase_id: String,
    pub reason: String,
    pub blocking: bool,
}

/// Raises a hail when any of: a critical finding, `needs_human_review`,
/// `satisfaction=low && risk=high`, or exhausted cycles (spec 4.5). Hails
/// are informational unless the caller's gate mode demands blocking.
pub fn evaluate_hail(
    phase_id: &str,
    report: Option<&ReviewReport>,
    new_findings: &[(Severity, String)],
    exhausted: bool,
) -> Option<Hail> {
    if new_findings.iter().any(|(s, _)| *s == Severity::Critical) {
        return Some(Hail {
            phase_id: phase_id.to_string(),
            reason: "critical finding raised".into(),
            blocking: false,
        });
    }
    if let Some(r) = report {
        if r.needs_human_review {
            return Some(Hail {
                phase_id: phase_id.to_string(),
                reason: "reviewer flagged needs_human_review".into(),
                blocking: false,
            });
        }
        if r.satisfaction == Satisfaction::Low && r.risk == Risk::High {
            return Some(Hail {
                phase_id: phase_id.to_string(),
                reason: "low satisfaction with high risk".into(),
                blocking: false,
            });
        }
    }
    if exhausted {
        return Some(Hail {
            phase_id: phase_id.to_string(),
            reason: "exhausted max cycles without approval".into(),
            blocking: false,
        });
    }
    None
}

#[derive(Debug, Clone)]
pub struct PhaseOutcome {
    pub final_commit_sha: String,
    pub cycles_used: u32,
    pub total_cost_usd: f64,
    pub all_findings: Vec<Finding>,
    pub hail: Option<Hail>,
}

fn base_system_prompt(role: Role, project_snapshot: &str, fabric_protocol: &str) -> String {
    let role_prompt = match role {
        Role::Coder => "You are the coder agent for this phase.",
        Role::Reviewer => "You are the reviewer agent for this phase.",
        Role::Architect => "You are the architect agent for this phase.",
    };
    format!("{project_snapshot}\n\n---\n\n{role_prompt}\n\n{fabric_protocol}")
}

/// Runs one phase's full cycle loop to completion or exhaustion.
///
/// `checkpoint_paths` is `Some((final, tmp))` when the caller wants
/// `CycleState` persisted after every phase transition (spec 4.5's
/// checkpoint hook); `resume` requests loading and validating an existing
/// checkpoint before the loop starts (spec 4.11).
#[allow(clippy::too_many_arguments)]
pub async fn run_phase(
    phase: &PhaseSpec,
    resolved: &ResolvedExecution,
    invoker: &dyn Invoker,
    lint: &dyn LintRunner,
    git: &GitTracker,
    working_dir: &Path,
    fabric_protocol: &str,
    checkpoint_paths: Option<(&Path, &Path)>,
    resume: bool,
    telemetry: &dyn TelemetryEmitter,
) -> Result<PhaseOutcome, QuasarError> {
    let resumed = if resume {
        checkpoint_paths.and_then(|(final_path, _)| {
            if !final_path.exists() {
                return None;
            }
            match load_checkpoint(final_path, |sha| git.is_reachable(sha)) {
                Ok(state) => Some(state),
                Err(e) => {
                    tracing::warn!(
                        phase_id = %phase.id,
                        error = %e,
                        "discarding checkpoint, starting phase fresh"
                    );
                    None
                }
            }
        })
    } else {
        None
    };

    let base_commit_sha = resumed
        .as_ref()
        .map(|s| s.base_commit_sha.clone())
        .unwrap_or_else(|| git.head_sha().unwrap_or_default());
    let mut total_cost_usd = resumed.as_ref().map(|s| s.total_cost_usd).unwrap_or(0.0);
    let mut all_findings: Vec<Finding> = resumed
        .as_ref()
        .map(|s| s.all_findings.clone())
        .unwrap_or_default();
    let mut cycle_commits: Vec<String> = resumed
        .as_ref()
        .map(|s| s.cycle_commits.clone())
        .unwrap_or_default();
    // At `ReviewComplete`/`Approved` the interrupted cycle already finished
    // its reviewer pass: resume at the next one. At `Coding`/`LintFixing`/
    // `Reviewing` the cycle was interrupted mid-flight: restart it,
    // discarding the partial in-memory agent output (spec 4.11).
    let start_cycle = resumed
        .as_ref()
        .map(|s| match s.phase {
            CyclePhase::ReviewComplete | CyclePhase::Approved => s.cycle + 1,
            _ => s.cycle,
        })
        .unwrap_or(1);
    let mut consecutive_low_satisfaction: u32 = 0;

    let write_state = |cycle_phase: CyclePhase,
                        cycle: u32,
                        total_cost_usd: f64,
                        coder_output: &str,
                        review_output: &str,
                        lint_output: &str,
                        cycle_commits: &[String],
                        all_findings: &[Finding],
                        head_sha: &str| {
        let Some((final_path, tmp_path)) = checkpoint_paths else {
            return;
        };
        let mut state = CycleState::new(
            phase.id.clone(),
            phase.title.clone(),
            resolved.max_cycles,
            resolved.max_budget_usd,
            base_commit_sha.clone(),
        );
        state.cycle = cycle;
        state.phase = cycle_phase;
        state.total_cost_usd = total_cost_usd;
        state.coder_output = coder_output.to_string();
        state.review_output = review_output.to_string();
        state.lint_output = lint_output.to_string();
        state.cycle_commits = cycle_commits.to_vec();
        state.all_findings = all_findings.to_vec();
        state.git_head_sha = head_sha.to_string();
        if let Err(e) = write_checkpoint(final_path, tmp_path, &state) {
            tracing::warn!(phase_id = %phase.id, error = %e, "failed to write checkpoint");
        }
    };

    if start_cycle > resolved.max_cycles {
        return Err(QuasarError::MaxCyclesExceeded {
            phase_id: phase.id.clone(),
            max_cycles: resolved.max_cycles,
        });
    }

    for cycle in start_cycle..=resolved.max_cycles {
        telemetry.emit(EventKind::CycleStart { phase_id: phase.id.clone(), cycle });
        let strictness = strictness_for_cycle(cycle, resolved.max_cycles);

        let coder_prompt = format!(
            "{}\n\nPrior findings:\n{}\n",
            phase.body,
            render_findings(&all_findings)
        );
        let coder_sys = base_system_prompt(Role::Coder, &phase.title, fabric_protocol);
        telemetry.emit(EventKind::AgentStart { phase_id: phase.id.clone(), role: role_str(Role::Coder).to_string(), cycle });
        let coder_result = invoker
            .invoke(
                Role::Coder,
                &coder_sys,
                &coder_prompt,
                working_dir,
                resolved.model.as_deref(),
                resolved.max_budget_usd - total_cost_usd,
            )
            .await?;
        total_cost_usd += coder_result.cost_usd;
        check_budget(phase, resolved, total_cost_usd)?;
        telemetry.emit(EventKind::AgentDone {
            phase_id: phase.id.clone(),
            role: role_str(Role::Coder).to_string(),
            cycle,
            cost_usd: coder_result.cost_usd,
            duration_ms: coder_result.duration_ms,
        });

        let mut last_cycle_sha = git
            .seal_cycle(&phase.id, cycle, "coder pass")
            .map_err(|e| QuasarError::UnhealableError {
                phase_id: phase.id.clone(),
                message: e.to_string(),
            })?;
        write_state(
            CyclePhase::Coding,
            cycle,
            total_cost_usd,
            &coder_result.text,
            "",
            "",
            &cycle_commits,
            &all_findings,
            &last_cycle_sha,
        );

        // Lint-fix loop, bounded at MAX_LINT_FIX_ITERATIONS.
        let mut lint_iterations = 0;
        let mut lint_output = String::new();
        loop {
            let outcome = lint.run(working_dir).await;
            telemetry.emit(EventKind::FilterResult {
                phase_id: phase.id.clone(),
                filter_name: outcome.filter_name.clone().unwrap_or_else(|| "lint".to_string()),
                success: outcome.success,
            });
            if outcome.success {
                break;
            }
            lint_output = outcome.output.clone();
            lint_iterations += 1;
            if lint_iterations > MAX_LINT_FIX_ITERATIONS {
                // Exceeding the cap is logged, not fatal: the cycle still
                // seals and the reviewer runs against the unfixed state.
                tracing::warn!(
                    phase_id = %phase.id,
                    cycle,
                    filter = ?outcome.filter_name,
                    "lint-fix cap exceeded"
                );
                break;
            }
            let fix_prompt = format!(
                "Lint failed ({}): {}\nFix it.",
                outcome.filter_name.clone().unwrap_or_default(),
                outcome.output
            );
            telemetry.emit(EventKind::AgentStart { phase_id: phase.id.clone(), role: role_str(Role::Coder).to_string(), cycle });
            let fix_result = invoker
                .invoke(
                    Role::Coder,
                    &coder_sys,
                    &fix_prompt,
                    working_dir,
                    resolved.model.as_deref(),
                    resolved.max_budget_usd - total_cost_usd,
                )
                .await?;
            total_cost_usd += fix_result.cost_usd;
            check_budget(phase, resolved, total_cost_usd)?;
            telemetry.emit(EventKind::AgentDone {
                phase_id: phase.id.clone(),
                role: role_str(Role::Coder).to_string(),
                cycle,
                cost_usd: fix_result.cost_usd,
                duration_ms: fix_result.duration_ms,
            });
            last_cycle_sha = git
                .seal_cycle(&phase.id, cycle, "lint fix")
                .map_err(|e| QuasarError::UnhealableError {
                    phase_id: phase.id.clone(),
                    message: e.to_string(),
                })?;
            write_state(
                CyclePhase::LintFixing,
                cycle,
                total_cost_usd,
                &coder_result.text,
                "",
                &lint_output,
                &cycle_commits,
                &all_findings,
                &last_cycle_sha,
            );
        }
        write_state(
            CyclePhase::Reviewing,
            cycle,
            total_cost_usd,
            &coder_result.text,
            "",
            &lint_output,
            &cycle_commits,
            &all_findings,
            &last_cycle_sha,
        );

        let reviewer_sys = base_system_prompt(Role::Reviewer, &phase.title, fabric_protocol);
        let reviewer_prompt = format!(
            "Strictness: {strictness:?}\n\nFindings so far:\n{}\n",
            render_findings(&all_findings)
        );
        telemetry.emit(EventKind::AgentStart { phase_id: phase.id.clone(), role: role_str(Role::Reviewer).to_string(), cycle });
        let review_result = invoker
            .invoke(
                Role::Reviewer,
                &reviewer_sys,
                &reviewer_prompt,
                working_dir,
                resolved.model.as_deref(),
                resolved.max_budget_usd - total_cost_usd,
            )
            .await?;
        total_cost_usd += review_result.cost_usd;
        check_budget(phase, resolved, total_cost_usd)?;
        telemetry.emit(EventKind::AgentDone {
            phase_id: phase.id.clone(),
            role: role_str(Role::Reviewer).to_string(),
            cycle,
            cost_usd: review_result.cost_usd,
            duration_ms: review_result.duration_ms,
        });

        let parsed = parse_review_output(&review_result.text);
        for (id, status) in &parsed.verifications {
            if let Some(prior) = all_findings.iter_mut().find(|f| &f.id == id) {
                prior.status = *status;
            }
        }

        cycle_commits.push(last_cycle_sha.clone());
        write_state(
            CyclePhase::ReviewComplete,
            cycle,
            total_cost_usd,
            &coder_result.text,
            &review_result.text,
            &lint_output,
            &cycle_commits,
            &all_findings,
            &last_cycle_sha,
        );

        if parsed.approved {
            write_state(
                CyclePhase::Approved,
                cycle,
                total_cost_usd,
                &coder_result.text,
                &review_result.text,
                &lint_output,
                &cycle_commits,
                &all_findings,
                &last_cycle_sha,
            );
            telemetry.emit(EventKind::CycleDone { phase_id: phase.id.clone(), cycle, approved: true });
            return Ok(PhaseOutcome {
                final_commit_sha: last_cycle_sha,
                cycles_used: cycle,
                total_cost_usd,
                all_findings,
                hail: evaluate_hail(&phase.id, parsed.report.as_ref(), &parsed.issues, false),
            });
        }
        telemetry.emit(EventKind::CycleDone { phase_id: phase.id.clone(), cycle, approved: false });

        let new_findings: Vec<Finding> = parsed
            .issues
            .iter()
            .enumerate()
            .map(|(i, (severity, desc))| Finding {
                id: format!("{}-c{}-{}", phase.id, cycle, i),
                severity: *severity,
                description: desc.clone(),
                cycle,
                status: FindingStatus::Found,
            })
            .collect();
        all_findings.extend(new_findings);

        if let Some(report) = &parsed.report {
            consecutive_low_satisfaction = if report.satisfaction == Satisfaction::Low {
                consecutive_low_satisfaction + 1
            } else {
                0
            };
        }

        if cycle == resolved.max_cycles {
            let _ = evaluate_hail(&phase.id, parsed.report.as_ref(), &parsed.issues, true);
            return Err(QuasarError::MaxCyclesExceeded {
                phase_id: phase.id.clone(),
                max_cycles: resolved.max_cycles,
            });
        }

        let recurring_finding_count = {
            let mut counts: std::collections::HashMap<&str, u32> = std::collections::HashMap::new();
            for f in &all_findings {
                if f.status != FindingStatus::Fixed {
                    *counts.entry(f.description.as_str()).or_insert(0) += 1;
                }
            }
            counts.values().copied().max().unwrap_or(0)
        };
        let budget_spent_fraction = if resolved.max_budget_usd > 0.0 {
            total_cost_usd / resolved.max_budget_usd
        } else {
            0.0
        };
        let signals = StruggleSignals {
            recurring_finding_count,
            consecutive_low_satisfaction_cycles: consecutive_low_satisfaction,
            budget_spent_fraction,
        };
        if healing::is_struggling(signals, STRUGGLE_BUDGET_THRESHOLD_FRACTION) {
            return Err(QuasarError::StruggleDetected {
                phase_id: phase.id.clone(),
                reason: format!(
                    "recurring_findings={} low_satisfaction_streak={} budget_fraction={:.2}",
                    signals.recurring_finding_count,
                    signals.consecutive_low_satisfaction_cycles,
                    signals.budget_spent_fraction
                ),
            });
        }
    }

    unreachable!("loop always returns or errors before exhausting its range")
}

fn check_budget(
    phase: &PhaseSpec,
    resolved: &ResolvedExecution,
    total_cost_usd: f64,
) -> Result<(), QuasarError> {
    if total_cost_usd > resolved.max_budget_usd {
        return Err(QuasarError::BudgetExceeded {
            phase_id: phase.id.clone(),
            spent_usd: total_cost_usd,
            budget_usd: resolved.max_budget_usd,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::NullTelemetry;
    use git2::Repository;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::tempdir;

    struct ApprovesImmediately;

    #[async_trait]
    impl Invoker for ApprovesImmediately {
        async fn invoke(
            &self,
            role: Role,
            _system_prompt: &str,
            _user_prompt: &str,
            _working_dir: &Path,
            _model: Option<&str>,
            _budget_usd: f64,
        ) -> Result<InvokeResult, QuasarError> {
            let text = match role {
                Role::Reviewer => {
                    "APPROVED:\nREPORT:\nSATISFACTION: high\nRISK: low\nNEEDS_HUMAN_REVIEW: no\nSUMMARY: looks good\n"
                        .to_string()
                }
                _ => "did the work".to_string(),
            };
            Ok(InvokeResult {
                text,
                cost_usd: 0.5,
                duration_ms: 10,
                session_id: "s1".into(),
            })
        }
    }

    struct NeverApproves;

    #[async_trait]
    impl Invoker for NeverApproves {
        async fn invoke(
            &self,
            role: Role,
            _system_prompt: &str,
            _user_prompt: &str,
            _working_dir: &Path,
            _model: Option<&str>,
            _budget_usd: f64,
        ) -> Result<InvokeResult, QuasarError> {
            let text = match role {
                Role::Reviewer => "ISSUE: major: still broken\n".to_string(),
                _ => "tried again".to_string(),
            };
            Ok(InvokeResult {
                text,
                cost_usd: 0.1,
                duration_ms: 10,
                session_id: "s1".into(),
            })
        }
    }

    struct AlwaysPassingLint;

    #[async_trait]
    impl LintRunner for AlwaysPassingLint {
        async fn run(&self, _working_dir: &Path) -> LintOutcome {
            LintOutcome {
                success: true,
                output: String::new(),
                filter_name: None,
            }
        }
    }

    struct FailsNTimes {
        remaining: AtomicU32,
        filter: &'static str,
    }

    #[async_trait]
    impl LintRunner for FailsNTimes {
        async fn run(&self, _working_dir: &Path) -> LintOutcome {
            let remaining = self.remaining.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                Some(v.saturating_sub(1))
            });
            let was_failing = remaining.map(|v| v > 0).unwrap_or(false);
            LintOutcome {
                success: !was_failing,
                output: "lint error".into(),
                filter_name: Some(self.filter.to_string()),
            }
        }
    }

    fn setup_git() -> (GitTracker, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "test").unwrap();
        config.set_str("user.email", "test@test.com").unwrap();
        drop(config);
        std::fs::write(dir.path().join("a.txt"), "hi").unwrap();
        let tracker = GitTracker::new(dir.path()).unwrap();
        tracker.snapshot_before("init").unwrap();
        (tracker, dir)
    }

    fn sample_phase() -> PhaseSpec {
        PhaseSpec::parse("+++\nid=\"p1\"\ntitle=\"t\"\nmax_cycles=3\n+++\ndo it\n").unwrap()
    }

    #[tokio::test]
    async fn approves_on_first_cycle() {
        let (git, dir) = setup_git();
        let phase = sample_phase();
        let resolved = ResolvedExecution {
            model: None,
            max_cycles: 3,
            max_budget_usd: 10.0,
            routed_tier: None,
            complexity_score: None,
        };
        let outcome = run_phase(
            &phase,
            &resolved,
            &ApprovesImmediately,
            &AlwaysPassingLint,
            &git,
            dir.path(),
            "",
            None,
            false,
            &NullTelemetry,
        )
        .await
        .unwrap();
        assert_eq!(outcome.cycles_used, 1);
        assert!(outcome.all_findings.is_empty());
    }

    #[tokio::test]
    async fn exhausts_cycles_without_approval() {
        let (git, dir) = setup_git();
        let phase = sample_phase();
        let resolved = ResolvedExecution {
            model: None,
            max_cycles: 2,
            max_budget_usd: 10.0,
            routed_tier: None,
            complexity_score: None,
        };
        let err = run_phase(
            &phase,
            &resolved,
            &NeverApproves,
            &AlwaysPassingLint,
            &git,
            dir.path(),
            "",
            None,
            false,
            &NullTelemetry,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, QuasarError::MaxCyclesExceeded { max_cycles: 2, .. }));
    }

    #[tokio::test]
    async fn budget_exceeded_is_detected() {
        let (git, dir) = setup_git();
        let phase = sample_phase();
        let resolved = ResolvedExecution {
            model: None,
            max_cycles: 5,
            max_budget_usd: 0.05,
            routed_tier: None,
            complexity_score: None,
        };
        let err = run_phase(
            &phase,
            &resolved,
            &ApprovesImmediately,
            &AlwaysPassingLint,
            &git,
            dir.path(),
            "",
            None,
            false,
            &NullTelemetry,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, QuasarError::BudgetExceeded { .. }));
    }

    #[tokio::test]
    async fn lint_fix_loop_recovers_within_cap() {
        let (git, dir) = setup_git();
        let phase = sample_phase();
        let resolved = ResolvedExecution {
            model: None,
            max_cycles: 3,
            max_budget_usd: 10.0,
            routed_tier: None,
            complexity_score: None,
        };
        let lint = FailsNTimes {
            remaining: AtomicU32::new(2),
            filter: "clippy",
        };
        let outcome = run_phase(
            &phase, &resolved, &ApprovesImmediately, &lint, &git, dir.path(), "", None, false,
            &NullTelemetry,
        )
        .await
        .unwrap();
        assert_eq!(outcome.cycles_used, 1);
    }

    #[tokio::test]
    async fn resume_from_review_complete_checkpoint_advances_to_next_cycle() {
        let (git, dir) = setup_git();
        let phase = sample_phase();
        let resolved = ResolvedExecution {
            model: None,
            max_cycles: 3,
            max_budget_usd: 10.0,
            routed_tier: None,
            complexity_score: None,
        };
        let head_sha = git.head_sha().unwrap();
        let mut state = CycleState::new(phase.id.clone(), phase.title.clone(), 3, 10.0, head_sha.clone());
        state.cycle = 1;
        state.phase = CyclePhase::ReviewComplete;
        state.total_cost_usd = 1.0;
        state.git_head_sha = head_sha;
        let final_path = dir.path().join("checkpoint.p1.json");
        let tmp_path = dir.path().join("checkpoint.p1.json.tmp");
        write_checkpoint(&final_path, &tmp_path, &state).unwrap();

        let outcome = run_phase(
            &phase,
            &resolved,
            &ApprovesImmediately,
            &AlwaysPassingLint,
            &git,
            dir.path(),
            "",
            Some((&final_path, &tmp_path)),
            true,
            &NullTelemetry,
        )
        .await
        .unwrap();
        // Resumed at cycle 1's ReviewComplete, so the loop starts at cycle 2
        // and approves there.
        assert_eq!(outcome.cycles_used, 2);
        assert_eq!(outcome.total_cost_usd, 1.5);
    }

    #[tokio::test]
    async fn stale_checkpoint_is_discarded_and_phase_restarts() {
        let (git, dir) = setup_git();
        let phase = sample_phase();
        let resolved = ResolvedExecution {
            model: None,
            max_cycles: 3,
            max_budget_usd: 10.0,
            routed_tier: None,
            complexity_score: None,
        };
        let mut state = CycleState::new(phase.id.clone(), phase.title.clone(), 3, 10.0, "abc");
        state.cycle = 2;
        state.phase = CyclePhase::ReviewComplete;
        state.git_head_sha = "0000000000000000000000000000000000dead".to_string();
        let final_path = dir.path().join("checkpoint.p1.json");
        let tmp_path = dir.path().join("checkpoint.p1.json.tmp");
        write_checkpoint(&final_path, &tmp_path, &state).unwrap();

        let outcome = run_phase(
            &phase,
            &resolved,
            &ApprovesImmediately,
            &AlwaysPassingLint,
            &git,
            dir.path(),
            "",
            Some((&final_path, &tmp_path)),
            true,
            &NullTelemetry,
        )
        .await
        .unwrap();
        assert_eq!(outcome.cycles_used, 1);
    }

    #[tokio::test]
    async fn struggle_detected_before_final_cycle_with_recurring_findings() {
        let (git, dir) = setup_git();
        let phase = sample_phase();
        let resolved = ResolvedExecution {
            model: None,
            max_cycles: 5,
            max_budget_usd: 10.0,
            routed_tier: None,
            complexity_score: None,
        };
        let err = run_phase(
            &phase,
            &resolved,
            &NeverApproves,
            &AlwaysPassingLint,
            &git,
            dir.path(),
            "",
            None,
            false,
            &NullTelemetry,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, QuasarError::StruggleDetected { .. }));
    }

    #[test]
    fn strictness_matches_boundary_table() {
        assert_eq!(strictness_for_cycle(1, 1), Strictness::Strict);
        assert_eq!(strictness_for_cycle(1, 2), Strictness::Standard);
        assert_eq!(strictness_for_cycle(2, 2), Strictness::Strict);
        assert_eq!(strictness_for_cycle(1, 5), Strictness::Lenient);
        assert_eq!(strictness_for_cycle(2, 5), Strictness::Lenient);
        assert_eq!(strictness_for_cycle(3, 5), Strictness::Standard);
        assert_eq!(strictness_for_cycle(4, 5), Strictness::Standard);
        assert_eq!(strictness_for_cycle(5, 5), Strictness::Strict);
    }

    #[test]
    fn parses_approved_and_report() {
        let text = "APPROVED:\nREPORT:\nSATISFACTION: high\nRISK: low\nNEEDS_HUMAN_REVIEW: no\nSUMMARY: all good\n";
        let parsed = parse_review_output(text);
        assert!(parsed.approved);
        let report = parsed.report.unwrap();
        assert_eq!(report.satisfaction, Satisfaction::High);
        assert_eq!(report.summary, "all good");
    }

    #[test]
    fn parses_issues_and_verifications() {
        let text = "ISSUE: critical: data race\nVERIFICATION: id=f1 fixed\n";
        let parsed = parse_review_output(text);
        assert!(!parsed.approved);
        assert_eq!(parsed.issues.len(), 1);
        assert_eq!(parsed.issues[0].0, Severity::Critical);
        assert_eq!(parsed.verifications, vec![("f1".to_string(), FindingStatus::Fixed)]);
    }

    #[test]
    fn hail_on_critical_finding() {
        let hail = evaluate_hail("p1", None, &[(Severity::Critical, "x".into())], false);
        assert!(hail.is_some());
    }

    #[test]
    fn hail_on_exhaustion() {
        let hail = evaluate_hail("p1", None, &[], true);
        assert!(hail.is_some());
    }

    #[test]
    fn no_hail_on_clean_pass() {
        let hail = evaluate_hail("p1", None, &[], false);
        assert!(hail.is_none());
    }
}
