//! Reviewer findings: identified issues tracked across cycles (spec 3, 4.5).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Major,
    Minor,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Major => "major",
            Severity::Minor => "minor",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingStatus {
    Found,
    Fixed,
    StillPresent,
    Regressed,
}

impl FindingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingStatus::Found => "found",
            FindingStatus::Fixed => "fixed",
            FindingStatus::StillPresent => "still_present",
            FindingStatus::Regressed => "regressed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Finding {
    pub id: String,
    pub severity: Severity,
    pub description: String,
    pub cycle: u32,
    pub status: FindingStatus,
}

/// Per-finding line budget before the description is truncated with a
/// trailing marker, keeping the next-cycle prompt bounded in size.
const DESCRIPTION_BUDGET: usize = 240;

impl Finding {
    /// `[severity] id=… cycle=… status=…  <description>`, truncating the
    /// description to `DESCRIPTION_BUDGET` chars (spec 4.5).
    pub fn to_prompt_line(&self) -> String {
        let desc = truncate(&self.description, DESCRIPTION_BUDGET);
        format!(
            "[{}] id={} cycle={} status={}  {}",
            self.severity.as_str(),
            self.id,
            self.cycle,
            self.status.as_str(),
            desc
        )
    }
}

fn truncate(s: &str, budget: usize) -> String {
    if s.chars().count() <= budget {
        return s.to_string();
    }
    let truncated: String = s.chars().take(budget).collect();
    format!("{truncated}... [truncated]")
}

/// Renders the full findings list for the next-cycle prompt, one per line.
pub fn render_findings(findings: &[Finding]) -> String {
    findings
        .iter()
        .map(Finding::to_prompt_line)
        .collect::<Vec<_>>()
        .join("\n")
}
