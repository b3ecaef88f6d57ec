//! Run manifest parsing and run-directory layout (spec 4.4, 6).
//!
//! The manifest is `quasar.toml` at the run directory's root. Layout below
//! it is fixed and auto-created on first use, mirroring the orchestrator's
//! existing cascading-config/fixed-layout convention.

use crate::complexity::ModelTier;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_max_workers() -> u32 {
    4
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub budget_reserve_usd: f64,
}

fn default_max_attempts() -> u32 {
    1
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: default_max_attempts(),
            budget_reserve_usd: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RoutingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub tiers: Option<Vec<ModelTier>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_max_workers")]
    pub max_workers: u32,
    #[serde(default)]
    pub max_budget_usd: f64,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub max_cycles: u32,
    #[serde(default)]
    pub gate: Option<crate::phase_spec::GateMode>,
    #[serde(default)]
    pub healing: HealingConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub max_context_tokens: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            max_budget_usd: 0.0,
            model: None,
            max_cycles: 0,
            gate: None,
            healing: HealingConfig::default(),
            routing: RoutingConfig::default(),
            max_context_tokens: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ContextConfig {
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub prior_work: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RunManifest {
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub context: ContextConfig,
}

impl RunManifest {
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading manifest {}: {e}", path.display()))?;
        Ok(Self::parse(&text)?)
    }
}

/// Fixed directory layout rooted at a run directory (spec section 6).
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub run_dir: PathBuf,
}

impl RunPaths {
    pub fn new(run_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_dir: run_dir.into(),
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.run_dir.join("quasar.toml")
    }

    pub fn fabric_dir(&self) -> PathBuf {
        self.run_dir.join(".fabric")
    }

    pub fn fabric_db_path(&self) -> PathBuf {
        self.fabric_dir().join("fabric.db")
    }

    pub fn checkpoint_path(&self, phase_id: &str) -> PathBuf {
        self.run_dir.join(format!("checkpoint.{phase_id}.json"))
    }

    pub fn checkpoint_tmp_path(&self, phase_id: &str) -> PathBuf {
        self.run_dir
            .join(format!("checkpoint.{phase_id}.json.tmp"))
    }

    pub fn pause_path(&self) -> PathBuf {
        self.run_dir.join("PAUSE")
    }

    pub fn stop_path(&self) -> PathBuf {
        self.run_dir.join("STOP")
    }

    pub fn telemetry_dir(&self) -> PathBuf {
        self.run_dir.join(".quasar").join("telemetry")
    }

    pub fn telemetry_path(&self) -> PathBuf {
        self.telemetry_dir().join("current.jsonl")
    }

    pub fn phases_dir(&self) -> PathBuf {
        self.run_dir.join("phases")
    }

    /// Creates the directories this layout needs; called once on run start.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.fabric_dir())?;
        std::fs::create_dir_all(self.telemetry_dir())?;
        std::fs::create_dir_all(self.phases_dir())?;
        Ok(())
    }
}
