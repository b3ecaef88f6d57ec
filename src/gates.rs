//! Human gating (spec 4.9): lets an operator accept, reject, retry, or skip
//! a phase's outcome depending on the run's configured gate mode.
//!
//! Reuses the teacher's deleted `gates/mod.rs` `dialoguer::Select` +
//! `console::style` prompt idiom, rebuilt against Quasar's own checkpoint
//! and phase types. Non-interactive (non-TTY) environments default to
//! accept-with-warning rather than blocking a headless run forever.

use crate::agent::PhaseOutcome;
use crate::phase_spec::GateMode;
use console::style;
use dialoguer::Select;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Accept,
    Reject,
    Retry,
    Skip,
}

/// Decides and, for interactive modes, prompts for a phase's disposition.
pub struct Gater {
    mode: GateMode,
    interactive: bool,
}

impl Gater {
    pub fn new(mode: GateMode, interactive: bool) -> Self {
        Self { mode, interactive }
    }

    /// `Trust` never prompts. `Watch` renders the checkpoint to output but
    /// never blocks — it always resolves to `Accept`. `Review` prompts for a
    /// decision on every phase; `Approve` does the same (plus the
    /// plan-level prompt in `decide_plan` before dispatch begins). Non-
    /// interactive runs never block on a prompt: they accept with a logged
    /// warning instead.
    pub fn decide(&self, phase_id: &str, outcome: &PhaseOutcome) -> Action {
        match self.mode {
            GateMode::Trust => Action::Accept,
            GateMode::Watch => {
                self.render(phase_id, outcome);
                Action::Accept
            }
            GateMode::Review | GateMode::Approve => {
                if !self.interactive {
                    tracing::warn!(
                        phase_id,
                        gate = ?self.mode,
                        "gate requires a decision but the run is non-interactive; defaulting to accept"
                    );
                    return Action::Accept;
                }
                self.prompt(phase_id, outcome)
            }
        }
    }

    /// Plan-level approval for `Approve` gate mode (spec 4.9): renders the
    /// full wave grouping once before any phase dispatch begins. Only
    /// `Accept`/`Reject` are meaningful here; any other selection is treated
    /// as `Accept`.
    pub fn decide_plan(&self, waves: &[Vec<String>]) -> Action {
        println!(
            "{} {} wave(s) planned:",
            style("Plan:").bold().cyan(),
            waves.len()
        );
        for (i, wave) in waves.iter().enumerate() {
            println!("  wave {}: {}", i + 1, wave.join(", "));
        }

        if !self.interactive {
            tracing::warn!(
                "plan approval requires a decision but the run is non-interactive; defaulting to accept"
            );
            return Action::Accept;
        }

        let options = ["Accept", "Reject"];
        let selection = Select::new()
            .with_prompt("Approve plan?")
            .items(&options)
            .default(0)
            .interact_opt();

        match selection {
            Ok(Some(1)) => Action::Reject,
            _ => Action::Accept,
        }
    }

    fn render(&self, phase_id: &str, outcome: &PhaseOutcome) {
        let header = format!(
            "{} phase '{}' finished in {} cycle(s), ${:.2} spent.",
            style("Checkpoint:").bold().cyan(),
            phase_id,
            outcome.cycles_used,
            outcome.total_cost_usd
        );
        println!("{header}");
        if let Some(hail) = &outcome.hail {
            println!("{} {}", style("Hail:").bold().yellow(), hail.reason);
        }
    }

    fn prompt(&self, phase_id: &str, outcome: &PhaseOutcome) -> Action {
        self.render(phase_id, outcome);

        let options = ["Accept", "Reject", "Retry", "Skip"];
        let selection = Select::new()
            .with_prompt("Decision")
            .items(&options)
            .default(0)
            .interact_opt();

        match selection {
            Ok(Some(0)) => Action::Accept,
            Ok(Some(1)) => Action::Reject,
            Ok(Some(2)) => Action::Retry,
            Ok(Some(3)) => Action::Skip,
            _ => Action::Accept,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Hail;

    fn outcome(hail: Option<Hail>) -> PhaseOutcome {
        PhaseOutcome {
            final_commit_sha: "abc".into(),
            cycles_used: 1,
            total_cost_usd: 1.0,
            all_findings: Vec::new(),
            hail,
        }
    }

    #[test]
    fn trust_never_prompts() {
        let gater = Gater::new(GateMode::Trust, false);
        let hail = Some(Hail { phase_id: "p1".into(), reason: "critical".into(), blocking: true });
        assert_eq!(gater.decide("p1", &outcome(hail)), Action::Accept);
    }

    #[test]
    fn review_non_interactive_defaults_to_accept() {
        let gater = Gater::new(GateMode::Review, false);
        assert_eq!(gater.decide("p1", &outcome(None)), Action::Accept);
    }

    #[test]
    fn approve_non_interactive_defaults_to_accept() {
        let gater = Gater::new(GateMode::Approve, false);
        assert_eq!(gater.decide("p1", &outcome(None)), Action::Accept);
    }

    #[test]
    fn watch_never_prompts_even_when_interactive() {
        let gater = Gater::new(GateMode::Watch, true);
        let hail = Some(Hail { phase_id: "p1".into(), reason: "critical".into(), blocking: true });
        assert_eq!(gater.decide("p1", &outcome(hail)), Action::Accept);
    }

    #[test]
    fn decide_plan_non_interactive_defaults_to_accept() {
        let gater = Gater::new(GateMode::Approve, false);
        let waves = vec![vec!["p1".to_string()], vec!["p2".to_string(), "p3".to_string()]];
        assert_eq!(gater.decide_plan(&waves), Action::Accept);
    }
}
