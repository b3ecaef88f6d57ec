//! Per-phase checkpointing: the persisted form of `CycleState` that lets a
//! worker resume a phase's loop after a crash or a paused run (spec 4.5,
//! 4.11).
//!
//! Writes use the temp-file-then-rename idiom so a crash never leaves a
//! partially-written checkpoint on disk: write to `checkpoint.<id>.json.tmp`,
//! `fsync`, then `rename` onto `checkpoint.<id>.json`.

use super::findings::Finding;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Coding,
    LintFixing,
    Reviewing,
    ReviewComplete,
    Approved,
}

const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CycleState {
    pub version: u32,
    pub task_id: String,
    pub task_title: String,
    pub cycle: u32,
    pub max_cycles: u32,
    pub phase: CyclePhase,
    pub total_cost_usd: f64,
    pub max_budget_usd: f64,
    pub coder_output: String,
    pub review_output: String,
    pub lint_output: String,
    pub base_commit_sha: String,
    pub cycle_commits: Vec<String>,
    pub refactored: bool,
    pub findings: Vec<Finding>,
    pub all_findings: Vec<Finding>,
    /// git HEAD at the moment this checkpoint was written; used to detect
    /// staleness on load.
    pub git_head_sha: String,
}

impl CycleState {
    pub fn new(task_id: impl Into<String>, task_title: impl Into<String>, max_cycles: u32, max_budget_usd: f64, base_commit_sha: impl Into<String>) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            task_id: task_id.into(),
            task_title: task_title.into(),
            cycle: 1,
            max_cycles,
            phase: CyclePhase::Coding,
            total_cost_usd: 0.0,
            max_budget_usd,
            coder_output: String::new(),
            review_output: String::new(),
            lint_output: String::new(),
            base_commit_sha: base_commit_sha.into(),
            cycle_commits: Vec::new(),
            refactored: false,
            findings: Vec::new(),
            all_findings: Vec::new(),
            git_head_sha: String::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("checkpoint for phase '{phase_id}' is stale: recorded head {recorded_head} is not reachable")]
    Stale {
        phase_id: String,
        recorded_head: String,
    },
}

/// Writes `state` to `final_path` atomically via a `.tmp` sibling.
pub fn write_checkpoint(final_path: &Path, tmp_path: &Path, state: &CycleState) -> Result<(), CheckpointError> {
    let json = serde_json::to_vec_pretty(state)?;
    {
        let mut f = std::fs::File::create(tmp_path)?;
        f.write_all(&json)?;
        f.sync_all()?;
    }
    std::fs::rename(tmp_path, final_path)?;
    Ok(())
}

/// Loads and validates a checkpoint. `is_reachable` checks whether the
/// recorded git head still exists in history; a stale checkpoint is
/// rejected so the caller falls back to a fresh start (spec 4.11).
pub fn load_checkpoint(
    path: &Path,
    is_reachable: impl Fn(&str) -> bool,
) -> Result<CycleState, CheckpointError> {
    let bytes = std::fs::read(path)?;
    let state: CycleState = serde_json::from_slice(&bytes)?;
    if !state.git_head_sha.is_empty() && !is_reachable(&state.git_head_sha) {
        return Err(CheckpointError::Stale {
            phase_id: state.task_id,
            recorded_head: state.git_head_sha,
        });
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trip_preserves_fields() {
        let dir = tempdir().unwrap();
        let final_path = dir.path().join("checkpoint.p1.json");
        let tmp_path = dir.path().join("checkpoint.p1.json.tmp");

        let mut state = CycleState::new("p1", "Do the thing", 5, 10.0, "abc123");
        state.cycle = 2;
        state.phase = CyclePhase::ReviewComplete;
        state.cycle_commits = vec!["sha1".into(), "sha2".into()];
        state.git_head_sha = "deadbeef".into();

        write_checkpoint(&final_path, &tmp_path, &state).unwrap();
        assert!(!tmp_path.exists());
        assert!(final_path.exists());

        let loaded = load_checkpoint(&final_path, |sha| sha == "deadbeef").unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn stale_checkpoint_is_rejected() {
        let dir = tempdir().unwrap();
        let final_path = dir.path().join("checkpoint.p1.json");
        let tmp_path = dir.path().join("checkpoint.p1.json.tmp");

        let mut state = CycleState::new("p1", "title", 5, 10.0, "abc123");
        state.git_head_sha = "gone".into();
        write_checkpoint(&final_path, &tmp_path, &state).unwrap();

        let err = load_checkpoint(&final_path, |_| false).unwrap_err();
        assert!(matches!(err, CheckpointError::Stale { .. }));
    }

    #[test]
    fn empty_head_sha_skips_staleness_check() {
        let dir = tempdir().unwrap();
        let final_path = dir.path().join("checkpoint.p1.json");
        let tmp_path = dir.path().join("checkpoint.p1.json.tmp");
        let state = CycleState::new("p1", "title", 5, 10.0, "abc123");
        write_checkpoint(&final_path, &tmp_path, &state).unwrap();
        let loaded = load_checkpoint(&final_path, |_| false).unwrap();
        assert_eq!(loaded.task_id, "p1");
    }
}
