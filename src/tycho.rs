//! Tycho: the admission scheduler between the DAG's ready set and worker
//! dispatch (spec 4.6). Polls each eligible phase against a fabric
//! snapshot, tracks a blocked set with cascading pushback, and re-evaluates
//! after every phase completion.

use crate::dag::DagCore;
use crate::fabric::{DiscoveryKind, FabricSnapshot, FabricStore, PhaseStatus};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollDecision {
    Proceed,
    NeedInfo,
    Conflict,
}

/// Decides admission for one phase given a fabric snapshot. The concrete
/// rule set (contract-overlap plausibility checks, etc.) is caller-supplied;
/// Tycho only owns the blocked-set bookkeeping and pushback cascade.
pub trait Poller: Send + Sync {
    fn poll(&self, phase_id: &str, snapshot: &FabricSnapshot) -> PollDecision;

    /// Does any phase currently `running` plausibly produce what blocked
    /// `phase_id` is missing, by scope overlap? Used by the pushback
    /// handler to decide retry vs. escalate.
    fn plausible_producer_in_progress(&self, phase_id: &str, snapshot: &FabricSnapshot) -> bool;

    /// True if the block reason is an outright contradiction (conflicting
    /// contract) rather than a missing one — escalates immediately, no
    /// retry budget spent.
    fn is_contradiction(&self, _phase_id: &str, _snapshot: &FabricSnapshot) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy)]
struct BlockedEntry {
    retries: u32,
    blocked_at: SystemTime,
}

pub const MAX_PUSHBACK_RETRIES: u32 = 5;
pub const STALE_CLAIM_THRESHOLD: Duration = Duration::from_secs(600);
pub const STUCK_BLOCK_THRESHOLD: Duration = Duration::from_secs(900);

pub struct Tycho {
    blocked: HashMap<String, BlockedEntry>,
    overridden: HashSet<String>,
}

impl Default for Tycho {
    fn default() -> Self {
        Self::new()
    }
}

impl Tycho {
    pub fn new() -> Self {
        Self {
            blocked: HashMap::new(),
            overridden: HashSet::new(),
        }
    }

    pub fn is_blocked(&self, phase_id: &str) -> bool {
        self.blocked.contains_key(phase_id)
    }

    pub fn blocked_ids(&self) -> Vec<String> {
        self.blocked.keys().cloned().collect()
    }

    /// Single-wave admission scan: for each eligible phase, skip if blocked
    /// and not yet overridden; otherwise poll and act on the decision.
    pub fn scan(
        &mut self,
        eligible: &[String],
        fabric: &FabricStore,
        poller: &dyn Poller,
    ) -> anyhow::Result<Vec<String>> {
        let snapshot = fabric.snapshot()?;
        let mut proceed = Vec::new();

        for phase_id in eligible {
            if self.blocked.contains_key(phase_id) && !self.overridden.remove(phase_id) {
                continue;
            }
            match poller.poll(phase_id, &snapshot) {
                PollDecision::Proceed => {
                    fabric.set_phase_state(phase_id, PhaseStatus::Running)?;
                    self.blocked.remove(phase_id);
                    proceed.push(phase_id.clone());
                }
                PollDecision::NeedInfo | PollDecision::Conflict => {
                    fabric.set_phase_state(phase_id, PhaseStatus::Blocked)?;
                    self.blocked
                        .entry(phase_id.clone())
                        .or_insert(BlockedEntry {
                            retries: 0,
                            blocked_at: SystemTime::now(),
                        });
                }
            }
        }
        Ok(proceed)
    }

    /// DAG-wave admission: walk waves in order, pruning a wave's descendants
    /// once any phase in it blocks (they cannot productively poll until the
    /// upstream unblocks).
    pub fn scan_waves(
        &mut self,
        dag: &DagCore,
        fabric: &FabricStore,
        poller: &dyn Poller,
    ) -> anyhow::Result<Vec<String>> {
        let mut proceed = Vec::new();
        let mut pruned: HashSet<String> = HashSet::new();

        for wave in dag.waves() {
            let remaining: Vec<String> = wave.into_iter().filter(|id| !pruned.contains(id)).collect();
            if remaining.is_empty() {
                continue;
            }
            let admitted = self.scan(&remaining, fabric, poller)?;
            let admitted_set: HashSet<&String> = admitted.iter().collect();
            for id in &remaining {
                if !admitted_set.contains(id) {
                    for desc in dag.descendants(id) {
                        pruned.insert(desc);
                    }
                }
            }
            proceed.extend(admitted);
        }
        Ok(proceed)
    }

    /// Evaluates each blocked phase with a plausibility check; returns
    /// (retry, escalate) phase ID lists. Escalation posts a discovery and
    /// sets fabric state to `human_decision`; `mark_failed` is left to the
    /// caller since it owns the DAG/worker-group bookkeeping.
    pub fn handle_pushback(
        &mut self,
        fabric: &FabricStore,
        poller: &dyn Poller,
    ) -> anyhow::Result<(Vec<String>, Vec<String>)> {
        let snapshot = fabric.snapshot()?;
        let mut retry = Vec::new();
        let mut escalate = Vec::new();

        let ids: Vec<String> = self.blocked.keys().cloned().collect();
        for id in ids {
            if poller.is_contradiction(&id, &snapshot) {
                escalate.push(id.clone());
                self.escalate(fabric, &id)?;
                continue;
            }
            if poller.plausible_producer_in_progress(&id, &snapshot) {
                retry.push(id);
                continue;
            }
            let entry = self.blocked.get_mut(&id).expect("id came from blocked map");
            entry.retries += 1;
            if entry.retries > MAX_PUSHBACK_RETRIES {
                escalate.push(id.clone());
                self.escalate(fabric, &id)?;
            } else {
                retry.push(id);
            }
        }
        Ok((retry, escalate))
    }

    fn escalate(&mut self, fabric: &FabricStore, phase_id: &str) -> anyhow::Result<()> {
        fabric.post_discovery(
            DiscoveryKind::RequirementsAmbiguity,
            &format!("phase '{phase_id}' exhausted pushback retries"),
            phase_id,
        )?;
        fabric.set_phase_state(phase_id, PhaseStatus::HumanDecision)?;
        self.blocked.remove(phase_id);
        Ok(())
    }

    /// Re-polls every blocked phase against a fresh snapshot; phases that
    /// now proceed move to `scanning` and are returned as unblocked.
    pub fn reevaluate(
        &mut self,
        fabric: &FabricStore,
        poller: &dyn Poller,
    ) -> anyhow::Result<Vec<String>> {
        let snapshot = fabric.snapshot()?;
        let ids: Vec<String> = self.blocked.keys().cloned().collect();
        let mut unblocked = Vec::new();

        for id in ids {
            match poller.poll(&id, &snapshot) {
                PollDecision::Proceed => {
                    self.blocked.remove(&id);
                    fabric.set_phase_state(&id, PhaseStatus::Scanning)?;
                    unblocked.push(id);
                }
                _ => {
                    self.overridden.remove(&id);
                }
            }
        }

        if !unblocked.is_empty() {
            return Ok(unblocked);
        }
        let (_, escalated) = self.handle_pushback(fabric, poller)?;
        let _ = escalated;
        Ok(Vec::new())
    }

    /// Periodic sweep for claims held by a non-running owner (stale) and
    /// blocked phases past the stuck threshold.
    pub fn stale_check(
        &self,
        fabric: &FabricStore,
    ) -> anyhow::Result<(Vec<String>, Vec<String>)> {
        let snapshot = fabric.snapshot()?;
        let mut stale_claims = Vec::new();
        for claim in &snapshot.claims {
            let owner_running = snapshot
                .phase_states
                .get(&claim.owner)
                .is_some_and(|s| *s == PhaseStatus::Running);
            if !owner_running {
                stale_claims.push(claim.path.clone());
            }
        }

        let mut stuck = Vec::new();
        for (id, entry) in &self.blocked {
            if entry
                .blocked_at
                .elapsed()
                .map(|d| d > STUCK_BLOCK_THRESHOLD)
                .unwrap_or(false)
            {
                stuck.push(id.clone());
            }
        }
        Ok((stale_claims, stuck))
    }

    /// On graceful stop, every blocked phase is escalated to human decision.
    pub fn escalate_all_blocked(&mut self, fabric: &FabricStore) -> anyhow::Result<Vec<String>> {
        let ids: Vec<String> = self.blocked.keys().cloned().collect();
        for id in &ids {
            self.escalate(fabric, id)?;
        }
        Ok(ids)
    }
}
