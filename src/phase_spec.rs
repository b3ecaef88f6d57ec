//! Phase-spec files: frontmatter-delimited declarations of work (spec 3, 6).
//!
//! A phase-spec file is a `+++`-fenced TOML header followed by a free-form
//! markdown body. The header carries `id`, `title`, `type`, `priority`,
//! `depends_on`, `scope`, `labels`, `gate`, and the optional per-phase
//! `max_cycles`/`max_budget_usd`/`model` overrides; everything after the
//! closing fence is the body handed to the coder/reviewer prompts verbatim.
//! Unknown header keys are ignored so older phase-spec files stay loadable
//! as the format grows.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseType {
    Feature,
    Bug,
    Task,
    #[serde(other)]
    Unknown,
}

impl PhaseType {
    /// Weight term used by the complexity scorer (spec 4.3).
    pub fn weight(&self) -> f64 {
        match self {
            PhaseType::Task => 0.3,
            PhaseType::Bug => 0.4,
            PhaseType::Feature => 0.8,
            PhaseType::Unknown => 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateMode {
    Trust,
    Review,
    Approve,
    Watch,
}

#[derive(Debug, Clone, Deserialize)]
struct Frontmatter {
    id: String,
    title: String,
    #[serde(rename = "type", default)]
    phase_type: Option<PhaseType>,
    #[serde(default)]
    priority: i64,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    scope: Vec<String>,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    gate: Option<GateMode>,
    #[serde(default)]
    max_cycles: Option<u32>,
    #[serde(default)]
    max_budget_usd: Option<f64>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PhaseSpec {
    pub id: String,
    pub title: String,
    pub body: String,
    pub phase_type: PhaseType,
    pub priority: i64,
    pub depends_on: Vec<String>,
    pub scope: Vec<String>,
    pub labels: Vec<String>,
    pub gate: Option<GateMode>,
    pub max_cycles: Option<u32>,
    pub max_budget_usd: Option<f64>,
    pub model: Option<String>,
}

#[derive(Debug, Error)]
pub enum PhaseSpecError {
    #[error("phase-spec file is missing the opening '+++' frontmatter fence")]
    MissingOpenFence,
    #[error("phase-spec file is missing the closing '+++' frontmatter fence")]
    MissingCloseFence,
    #[error("invalid frontmatter TOML: {0}")]
    InvalidToml(#[from] toml::de::Error),
    #[error("failed to read phase-spec file: {0}")]
    Io(#[from] std::io::Error),
}

impl PhaseSpec {
    pub fn parse(text: &str) -> Result<Self, PhaseSpecError> {
        let rest = text
            .strip_prefix("+++")
            .ok_or(PhaseSpecError::MissingOpenFence)?;
        // skip the newline immediately after the opening fence, if present
        let rest = rest.strip_prefix('\n').unwrap_or(rest);
        let close = rest
            .find("\n+++")
            .ok_or(PhaseSpecError::MissingCloseFence)?;
        let header = &rest[..close];
        let body = rest[close + "\n+++".len()..]
            .trim_start_matches('\n')
            .to_string();

        let fm: Frontmatter = toml::from_str(header)?;

        Ok(PhaseSpec {
            id: fm.id,
            title: fm.title,
            body,
            phase_type: fm.phase_type.unwrap_or(PhaseType::Unknown),
            priority: fm.priority,
            depends_on: fm.depends_on,
            scope: fm.scope,
            labels: fm.labels,
            gate: fm.gate,
            max_cycles: fm.max_cycles,
            max_budget_usd: fm.max_budget_usd,
            model: fm.model,
        })
    }

    pub fn load(path: &Path) -> Result<Self, PhaseSpecError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Body length in chars, the `B` signal fed to the complexity scorer.
    pub fn body_len(&self) -> usize {
        self.body.chars().count()
    }

    /// Scope glob count, the `S` signal fed to the complexity scorer.
    pub fn scope_count(&self) -> usize {
        self.scope.len()
    }
}

/// Discover and parse every `*.md` phase-spec file directly under `dir`,
/// sorted by ID for deterministic load order.
pub fn load_all(dir: &Path) -> Result<Vec<PhaseSpec>, PhaseSpecError> {
    let mut specs = Vec::new();
    if dir.is_dir() {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("md") {
                specs.push(PhaseSpec::load(&path)?);
            }
        }
    }
    specs.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(specs)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"+++
id = "01-setup"
title = "Project setup"
type = "task"
priority = 5
depends_on = []
scope = ["src/main.rs"]
labels = ["infra"]
gate = "review"
+++
Do the setup work.
"#;

    #[test]
    fn parses_frontmatter_and_body() {
        let spec = PhaseSpec::parse(SAMPLE).unwrap();
        assert_eq!(spec.id, "01-setup");
        assert_eq!(spec.title, "Project setup");
        assert_eq!(spec.phase_type, PhaseType::Task);
        assert_eq!(spec.priority, 5);
        assert_eq!(spec.scope, vec!["src/main.rs".to_string()]);
        assert_eq!(spec.gate, Some(GateMode::Review));
        assert_eq!(spec.body.trim(), "Do the setup work.");
    }

    #[test]
    fn unknown_type_falls_back() {
        let text = SAMPLE.replace("type = \"task\"", "type = \"chore\"");
        let spec = PhaseSpec::parse(&text).unwrap();
        assert_eq!(spec.phase_type, PhaseType::Unknown);
    }

    #[test]
    fn missing_open_fence_errors() {
        let err = PhaseSpec::parse("id = \"x\"").unwrap_err();
        assert!(matches!(err, PhaseSpecError::MissingOpenFence));
    }

    #[test]
    fn missing_close_fence_errors() {
        let err = PhaseSpec::parse("+++\nid = \"x\"\n").unwrap_err();
        assert!(matches!(err, PhaseSpecError::MissingCloseFence));
    }

    #[test]
    fn type_weights_match_spec() {
        assert_eq!(PhaseType::Task.weight(), 0.3);
        assert_eq!(PhaseType::Bug.weight(), 0.4);
        assert_eq!(PhaseType::Feature.weight(), 0.8);
        assert_eq!(PhaseType::Unknown.weight(), 0.5);
    }

    #[test]
    fn minimal_frontmatter_defaults() {
        let text = "+++\nid = \"x\"\ntitle = \"t\"\n+++\nbody\n";
        let spec = PhaseSpec::parse(text).unwrap();
        assert!(spec.depends_on.is_empty());
        assert!(spec.scope.is_empty());
        assert_eq!(spec.priority, 0);
        assert_eq!(spec.max_cycles, None);
    }
}
