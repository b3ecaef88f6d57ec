//! Execution resolver: cascading merge of phase/manifest/auto-route/global
//! config into one resolved execution spec per phase (spec 4.4).

use crate::complexity::{ComplexitySignals, RoutingContext, complexity_score};
use crate::config::ExecutionConfig;
use crate::phase_spec::PhaseSpec;

const DEFAULT_MAX_CYCLES: u32 = 5;
const DEFAULT_MAX_BUDGET_USD: f64 = 5.0;

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedExecution {
    /// `None` means "let the invoker pick its own default".
    pub model: Option<String>,
    pub max_cycles: u32,
    pub max_budget_usd: f64,
    pub routed_tier: Option<String>,
    pub complexity_score: Option<f64>,
}

/// Resolves one phase's execution spec. `routing` is `None` to disable
/// auto-routing outright (backward compatible with a caller that never sets
/// up a tier table); `ancestor_depth` is the phase's DAG ancestor count, the
/// `D` signal for the complexity scorer.
pub fn resolve(
    phase: &PhaseSpec,
    manifest: &ExecutionConfig,
    routing: Option<&RoutingContext>,
    ancestor_depth: usize,
    global_model: Option<&str>,
) -> ResolvedExecution {
    let mut routed_tier = None;
    let mut complexity = None;

    let model = if let Some(m) = phase.model.clone() {
        Some(m)
    } else if let Some(m) = manifest.model.clone() {
        Some(m)
    } else if manifest.routing.enabled
        && let Some(ctx) = routing
    {
        let signals = ComplexitySignals {
            scope_count: phase.scope_count(),
            body_len: phase.body_len(),
            ancestor_depth,
            phase_type: phase.phase_type,
        };
        let score = complexity_score(signals);
        let tier = ctx.select_tier(score);
        routed_tier = Some(tier.name.clone());
        complexity = Some(score);
        Some(tier.model.clone())
    } else if let Some(m) = global_model {
        Some(m.to_string())
    } else {
        None
    };

    let max_cycles = phase
        .max_cycles
        .or((manifest.max_cycles != 0).then_some(manifest.max_cycles))
        .unwrap_or(DEFAULT_MAX_CYCLES);

    let max_budget_usd = phase
        .max_budget_usd
        .or((manifest.max_budget_usd != 0.0).then_some(manifest.max_budget_usd))
        .unwrap_or(DEFAULT_MAX_BUDGET_USD);

    ResolvedExecution {
        model,
        max_cycles,
        max_budget_usd,
        routed_tier,
        complexity_score: complexity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase_spec::PhaseSpec;

    fn phase(text: &str) -> PhaseSpec {
        PhaseSpec::parse(text).unwrap()
    }

    #[test]
    fn phase_model_wins_over_everything() {
        let p = phase("+++\nid=\"x\"\ntitle=\"t\"\nmodel=\"opus\"\n+++\nbody\n");
        let manifest = ExecutionConfig {
            model: Some("sonnet".into()),
            ..Default::default()
        };
        let resolved = resolve(&p, &manifest, None, 0, Some("haiku"));
        assert_eq!(resolved.model, Some("opus".into()));
    }

    #[test]
    fn manifest_model_wins_over_auto_route_and_global() {
        let p = phase("+++\nid=\"x\"\ntitle=\"t\"\n+++\nbody\n");
        let manifest = ExecutionConfig {
            model: Some("sonnet".into()),
            routing: crate::config::RoutingConfig {
                enabled: true,
                tiers: None,
            },
            ..Default::default()
        };
        let ctx = RoutingContext::default_tiers();
        let resolved = resolve(&p, &manifest, Some(&ctx), 0, Some("haiku"));
        assert_eq!(resolved.model, Some("sonnet".into()));
        assert!(resolved.routed_tier.is_none());
    }

    #[test]
    fn auto_route_used_when_enabled_and_no_explicit_model() {
        let p = phase(
            "+++\nid=\"x\"\ntitle=\"t\"\ntype=\"feature\"\nscope=[\"a\",\"b\",\"c\",\"d\",\"e\",\"f\"]\n+++\nbody\n",
        );
        let manifest = ExecutionConfig {
            routing: crate::config::RoutingConfig {
                enabled: true,
                tiers: None,
            },
            ..Default::default()
        };
        let ctx = RoutingContext::default_tiers();
        let resolved = resolve(&p, &manifest, Some(&ctx), 4, None);
        assert!(resolved.model.is_some());
        assert!(resolved.routed_tier.is_some());
        assert!(resolved.complexity_score.is_some());
    }

    #[test]
    fn nil_routing_context_disables_auto_route() {
        let p = phase("+++\nid=\"x\"\ntitle=\"t\"\n+++\nbody\n");
        let manifest = ExecutionConfig {
            routing: crate::config::RoutingConfig {
                enabled: true,
                tiers: None,
            },
            ..Default::default()
        };
        let resolved = resolve(&p, &manifest, None, 4, Some("haiku"));
        assert_eq!(resolved.model, Some("haiku".into()));
        assert!(resolved.routed_tier.is_none());
    }

    #[test]
    fn global_default_used_last() {
        let p = phase("+++\nid=\"x\"\ntitle=\"t\"\n+++\nbody\n");
        let manifest = ExecutionConfig::default();
        let resolved = resolve(&p, &manifest, None, 0, Some("haiku"));
        assert_eq!(resolved.model, Some("haiku".into()));
    }

    #[test]
    fn built_in_default_when_nothing_set() {
        let p = phase("+++\nid=\"x\"\ntitle=\"t\"\n+++\nbody\n");
        let manifest = ExecutionConfig::default();
        let resolved = resolve(&p, &manifest, None, 0, None);
        assert_eq!(resolved.model, None);
        assert_eq!(resolved.max_cycles, DEFAULT_MAX_CYCLES);
        assert_eq!(resolved.max_budget_usd, DEFAULT_MAX_BUDGET_USD);
    }

    #[test]
    fn phase_max_cycles_wins_over_manifest() {
        let p = phase("+++\nid=\"x\"\ntitle=\"t\"\nmax_cycles=2\n+++\nbody\n");
        let manifest = ExecutionConfig {
            max_cycles: 9,
            ..Default::default()
        };
        let resolved = resolve(&p, &manifest, None, 0, None);
        assert_eq!(resolved.max_cycles, 2);
    }

    #[test]
    fn manifest_max_budget_used_when_phase_silent() {
        let p = phase("+++\nid=\"x\"\ntitle=\"t\"\n+++\nbody\n");
        let manifest = ExecutionConfig {
            max_budget_usd: 42.0,
            ..Default::default()
        };
        let resolved = resolve(&p, &manifest, None, 0, None);
        assert_eq!(resolved.max_budget_usd, 42.0);
    }
}
