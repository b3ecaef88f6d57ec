//! Fabric record types (spec section 3, 4.2).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Queued,
    Scanning,
    Running,
    Blocked,
    Gate,
    Done,
    Failed,
    Skipped,
    Healing,
    Decomposed,
    HumanDecision,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::Queued => "queued",
            PhaseStatus::Scanning => "scanning",
            PhaseStatus::Running => "running",
            PhaseStatus::Blocked => "blocked",
            PhaseStatus::Gate => "gate",
            PhaseStatus::Done => "done",
            PhaseStatus::Failed => "failed",
            PhaseStatus::Skipped => "skipped",
            PhaseStatus::Healing => "healing",
            PhaseStatus::Decomposed => "decomposed",
            PhaseStatus::HumanDecision => "human_decision",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => PhaseStatus::Pending,
            "queued" => PhaseStatus::Queued,
            "scanning" => PhaseStatus::Scanning,
            "running" => PhaseStatus::Running,
            "blocked" => PhaseStatus::Blocked,
            "gate" => PhaseStatus::Gate,
            "done" => PhaseStatus::Done,
            "failed" => PhaseStatus::Failed,
            "skipped" => PhaseStatus::Skipped,
            "healing" => PhaseStatus::Healing,
            "decomposed" => PhaseStatus::Decomposed,
            "human_decision" => PhaseStatus::HumanDecision,
            _ => return None,
        })
    }

    /// True for states that no longer participate in dispatch.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PhaseStatus::Done | PhaseStatus::Failed | PhaseStatus::Skipped | PhaseStatus::Decomposed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractKind {
    Type,
    Function,
    Interface,
    Method,
    Package,
    File,
}

impl ContractKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractKind::Type => "type",
            ContractKind::Function => "function",
            ContractKind::Interface => "interface",
            ContractKind::Method => "method",
            ContractKind::Package => "package",
            ContractKind::File => "file",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "type" => ContractKind::Type,
            "function" => ContractKind::Function,
            "interface" => ContractKind::Interface,
            "method" => ContractKind::Method,
            "package" => ContractKind::Package,
            "file" => ContractKind::File,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    Fulfilled,
    Disputed,
}

impl ContractStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractStatus::Fulfilled => "fulfilled",
            ContractStatus::Disputed => "disputed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "fulfilled" => ContractStatus::Fulfilled,
            "disputed" => ContractStatus::Disputed,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Contract {
    pub producer: String,
    pub kind: ContractKind,
    pub name: String,
    pub signature: String,
    pub package: String,
    pub status: ContractStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileClaim {
    pub path: String,
    pub owner: String,
    pub claimed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryKind {
    FileConflict,
    EntanglementDispute,
    RequirementsAmbiguity,
    MissingDependency,
}

impl DiscoveryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryKind::FileConflict => "file_conflict",
            DiscoveryKind::EntanglementDispute => "entanglement_dispute",
            DiscoveryKind::RequirementsAmbiguity => "requirements_ambiguity",
            DiscoveryKind::MissingDependency => "missing_dependency",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "file_conflict" => DiscoveryKind::FileConflict,
            "entanglement_dispute" => DiscoveryKind::EntanglementDispute,
            "requirements_ambiguity" => DiscoveryKind::RequirementsAmbiguity,
            "missing_dependency" => DiscoveryKind::MissingDependency,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Discovery {
    pub id: i64,
    pub kind: DiscoveryKind,
    pub detail: String,
    pub source_phase_id: String,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PulseKind {
    Decision,
    Failure,
    Note,
    ReviewerFeedback,
}

impl PulseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PulseKind::Decision => "decision",
            PulseKind::Failure => "failure",
            PulseKind::Note => "note",
            PulseKind::ReviewerFeedback => "reviewer_feedback",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "decision" => PulseKind::Decision,
            "failure" => PulseKind::Failure,
            "note" => PulseKind::Note,
            "reviewer_feedback" => PulseKind::ReviewerFeedback,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pulse {
    pub id: i64,
    pub kind: PulseKind,
    pub detail: String,
    pub source_phase_id: String,
    pub created_at: DateTime<Utc>,
}

/// Snapshot of fabric state handed to the Tycho poller (spec 4.6); a
/// read-only consistent view so admission decisions never race a concurrent
/// writer mid-decision.
#[derive(Debug, Clone, Default)]
pub struct FabricSnapshot {
    pub phase_states: std::collections::HashMap<String, PhaseStatus>,
    pub contracts: Vec<Contract>,
    pub claims: Vec<FileClaim>,
    pub unresolved_discoveries: Vec<Discovery>,
}
