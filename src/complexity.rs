//! Complexity scorer and model-tier selector (spec 4.3).
//!
//! Pure, deterministic: the same `(scope_count, body_len, ancestor_depth,
//! phase_type)` input always yields the same score, and the same score
//! always selects the same tier.

use crate::phase_spec::PhaseType;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A `(name, model, upper-score-bound)` triple for adaptive routing.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ModelTier {
    pub name: String,
    pub model: String,
    pub max_score: f64,
}

#[derive(Debug, Error, PartialEq)]
pub enum TierError {
    #[error("tier list must not be empty")]
    Empty,
    #[error("tier '{0}' has an empty model name")]
    EmptyModel(String),
    #[error("tiers must be sorted by max_score ascending (tier '{0}' violates this)")]
    NotSorted(String),
    #[error("duplicate tier name '{0}'")]
    DuplicateName(String),
    #[error("the last tier must cover a score of 1.0 (got {0})")]
    DoesNotCoverOne(f64),
}

/// Ordered list of tiers, validated once at construction (spec invariant 5).
#[derive(Debug, Clone)]
pub struct RoutingContext {
    tiers: Vec<ModelTier>,
}

impl RoutingContext {
    pub fn new(tiers: Vec<ModelTier>) -> Result<Self, TierError> {
        let Some(last) = tiers.last() else {
            return Err(TierError::Empty);
        };
        if last.max_score < 1.0 {
            return Err(TierError::DoesNotCoverOne(last.max_score));
        }
        let mut seen = std::collections::HashSet::new();
        let mut prev_score = f64::NEG_INFINITY;
        for tier in &tiers {
            if tier.model.trim().is_empty() {
                return Err(TierError::EmptyModel(tier.name.clone()));
            }
            if tier.max_score < prev_score {
                return Err(TierError::NotSorted(tier.name.clone()));
            }
            if !seen.insert(tier.name.clone()) {
                return Err(TierError::DuplicateName(tier.name.clone()));
            }
            prev_score = tier.max_score;
        }
        Ok(Self { tiers })
    }

    pub fn default_tiers() -> Self {
        Self::new(vec![
            ModelTier {
                name: "fast".into(),
                model: "haiku".into(),
                max_score: 0.35,
            },
            ModelTier {
                name: "balanced".into(),
                model: "sonnet".into(),
                max_score: 0.70,
            },
            ModelTier {
                name: "heavy".into(),
                model: "opus".into(),
                max_score: 1.00,
            },
        ])
        .expect("default tier table is always valid")
    }

    pub fn tiers(&self) -> &[ModelTier] {
        &self.tiers
    }

    /// First tier whose `max_score >= score`; falls back to the last tier
    /// (guaranteed present since the last tier covers 1.0).
    pub fn select_tier(&self, score: f64) -> &ModelTier {
        self.tiers
            .iter()
            .find(|t| t.max_score >= score)
            .unwrap_or_else(|| self.tiers.last().expect("validated non-empty"))
    }
}

/// The four raw signals the scorer normalizes.
#[derive(Debug, Clone, Copy)]
pub struct ComplexitySignals {
    pub scope_count: usize,
    pub body_len: usize,
    pub ancestor_depth: usize,
    pub phase_type: PhaseType,
}

/// `min(S/10,1)*0.25 + min(B/3000,1)*0.35 + min(D/8,1)*0.25 + typeWeight(T)*0.15`.
/// Always in `[0, 1]`.
pub fn complexity_score(signals: ComplexitySignals) -> f64 {
    let scope_term = (signals.scope_count as f64 / 10.0).min(1.0) * 0.25;
    let body_term = (signals.body_len as f64 / 3000.0).min(1.0) * 0.35;
    let depth_term = (signals.ancestor_depth as f64 / 8.0).min(1.0) * 0.25;
    let type_term = signals.phase_type.weight() * 0.15;
    scope_term + body_term + depth_term + type_term
}
