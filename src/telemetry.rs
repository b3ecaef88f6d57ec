//! Append-only NDJSON telemetry (spec 4.10).
//!
//! Every significant run event is a single JSON object on its own line,
//! flushed immediately so a crash never loses more than the in-flight write.
//! Grounded on the teacher's deleted `audit/` module's append-only run-file
//! persistence discipline.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    EpochStart { epoch: u32 },
    EpochDone { epoch: u32, waves_completed: usize },
    TaskState { phase_id: String, status: String },
    AgentStart { phase_id: String, role: String, cycle: u32 },
    AgentDone { phase_id: String, role: String, cycle: u32, cost_usd: f64, duration_ms: u64 },
    EntanglementPosted { producer: String, kind: String, name: String },
    ClaimAcquired { phase_id: String, path: String },
    ClaimReleased { phase_id: String, path: String },
    DiscoveryPosted { phase_id: String, summary: String },
    DiscoveryResolved { discovery_id: i64 },
    FilterResult { phase_id: String, filter_name: String, success: bool },
    CycleStart { phase_id: String, cycle: u32 },
    CycleDone { phase_id: String, cycle: u32, approved: bool },
    ModelRouted { phase_id: String, tier: String, model: String, score: f64 },
    HealingStart { phase_id: String },
    HealingSkipped { phase_id: String, reason: String },
    HealingPlan { phase_id: String, remediation_id: String },
    HealingInsert { phase_id: String, remediation_id: String },
    HealingDone { phase_id: String, succeeded: bool },
    DecompositionPlan { phase_id: String, sub_phase_ids: Vec<String> },
    DecompositionApplied { phase_id: String, sub_phase_ids: Vec<String> },
    DecompositionRejected { phase_id: String, reason: String },
}

#[derive(Debug, Clone, Serialize)]
struct Event {
    #[serde(flatten)]
    kind: EventKind,
    timestamp: DateTime<Utc>,
}

/// Sink for telemetry events. Implemented by both the file-backed emitter
/// and `NullTelemetry`, so call sites never need to branch on whether
/// telemetry is enabled.
pub trait TelemetryEmitter: Send + Sync {
    fn emit(&self, kind: EventKind);
}

/// Writes one JSON object per line to a file, flushing after every write.
pub struct NdjsonTelemetry {
    file: Mutex<File>,
}

impl NdjsonTelemetry {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file: Mutex::new(file) })
    }

    /// Stamps `timestamp` externally so tests stay deterministic — the
    /// crate's no-real-clock-in-pure-code rule applies here too.
    fn write_at(&self, kind: EventKind, timestamp: DateTime<Utc>) {
        let event = Event { kind, timestamp };
        let Ok(mut line) = serde_json::to_string(&event) else {
            return;
        };
        line.push('\n');
        if let Ok(mut f) = self.file.lock() {
            let _ = f.write_all(line.as_bytes());
            let _ = f.flush();
        }
    }
}

impl TelemetryEmitter for NdjsonTelemetry {
    fn emit(&self, kind: EventKind) {
        self.write_at(kind, Utc::now());
    }
}

/// No-op sink for runs with telemetry disabled.
pub struct NullTelemetry;

impl TelemetryEmitter for NullTelemetry {
    fn emit(&self, _kind: EventKind) {}
}
