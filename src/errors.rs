//! Classified error taxonomy (spec 7).
//!
//! The agent loop and worker return these explicitly rather than opaque
//! `anyhow::Error` so the healing controller and Tycho's pushback handler can
//! discriminate on kind, not on string matching.

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum QuasarError {
    #[error("phase '{phase_id}' exhausted {max_cycles} cycles without reviewer approval")]
    MaxCyclesExceeded { phase_id: String, max_cycles: u32 },

    #[error("phase '{phase_id}' exceeded budget: spent ${spent_usd:.2} of ${budget_usd:.2}")]
    BudgetExceeded {
        phase_id: String,
        spent_usd: f64,
        budget_usd: f64,
    },

    #[error("lint filter '{filter_name}' failed for phase '{phase_id}': {output}")]
    LintFilterFailure {
        phase_id: String,
        filter_name: String,
        output: String,
    },

    #[error("file '{path}' is claimed by phase '{owner}'")]
    ClaimHeld { path: String, owner: String },

    #[error("adding edge '{dependent}' -> '{dependency}' would create a cycle")]
    CycleDetected {
        dependent: String,
        dependency: String,
    },

    #[error("checkpoint for phase '{phase_id}' is stale: recorded head {recorded_head} is not reachable")]
    SnapshotStale {
        phase_id: String,
        recorded_head: String,
    },

    #[error("unhealable error in phase '{phase_id}': {message}")]
    UnhealableError { phase_id: String, message: String },

    #[error("phase '{phase_id}' is struggling: {reason}")]
    StruggleDetected { phase_id: String, reason: String },
}

impl QuasarError {
    /// Whether the healing controller (4.8) may attempt a remediation phase
    /// for this error kind.
    pub fn healable(&self) -> bool {
        matches!(
            self,
            QuasarError::MaxCyclesExceeded { .. }
                | QuasarError::BudgetExceeded { .. }
                | QuasarError::LintFilterFailure { .. }
        )
    }

    /// The phase this error is attributed to, when applicable.
    pub fn phase_id(&self) -> Option<&str> {
        match self {
            QuasarError::MaxCyclesExceeded { phase_id, .. }
            | QuasarError::BudgetExceeded { phase_id, .. }
            | QuasarError::LintFilterFailure { phase_id, .. }
            | QuasarError::SnapshotStale { phase_id, .. }
            | QuasarError::UnhealableError { phase_id, .. }
            | QuasarError::StruggleDetected { phase_id, .. } => Some(phase_id),
            QuasarError::ClaimHeld { .. } | QuasarError::CycleDetected { .. } => None,
        }
    }
}

impl From<crate::dag::CycleError> for QuasarError {
    fn from(err: crate::dag::CycleError) -> Self {
        match err {
            crate::dag::CycleError::WouldCycle {
                dependent,
                dependency,
            } => QuasarError::CycleDetected {
                dependent,
                dependency,
            },
            crate::dag::CycleError::SelfDependency { id } => QuasarError::CycleDetected {
                dependent: id.clone(),
                dependency: id,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_std_error<E: std::error::Error>(_e: &E) {}

    #[test]
    fn healable_kinds() {
        let e = QuasarError::MaxCyclesExceeded {
            phase_id: "x".into(),
            max_cycles: 2,
        };
        assert!(e.healable());
        assert_std_error(&e);
    }

    #[test]
    fn unhealable_kinds() {
        let e = QuasarError::ClaimHeld {
            path: "a.rs".into(),
            owner: "p1".into(),
        };
        assert!(!e.healable());
        let e = QuasarError::CycleDetected {
            dependent: "a".into(),
            dependency: "b".into(),
        };
        assert!(!e.healable());
        let e = QuasarError::SnapshotStale {
            phase_id: "x".into(),
            recorded_head: "deadbeef".into(),
        };
        assert!(!e.healable());
        let e = QuasarError::UnhealableError {
            phase_id: "x".into(),
            message: "cancelled".into(),
        };
        assert!(!e.healable());
        let e = QuasarError::StruggleDetected {
            phase_id: "x".into(),
            reason: "recurring findings".into(),
        };
        assert!(!e.healable());
        assert_eq!(e.phase_id(), Some("x"));
    }

    #[test]
    fn phase_id_extraction() {
        let e = QuasarError::BudgetExceeded {
            phase_id: "p1".into(),
            spent_usd: 10.0,
            budget_usd: 5.0,
        };
        assert_eq!(e.phase_id(), Some("p1"));
        let e = QuasarError::ClaimHeld {
            path: "a.rs".into(),
            owner: "p1".into(),
        };
        assert_eq!(e.phase_id(), None);
    }

    #[test]
    fn from_cycle_error() {
        let cycle = crate::dag::CycleError::WouldCycle {
            dependent: "a".into(),
            dependency: "b".into(),
        };
        let qe: QuasarError = cycle.into();
        assert!(matches!(qe, QuasarError::CycleDetected { .. }));
    }
}
