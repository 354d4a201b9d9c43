//! Pluggable scaling policies.
//!
//! A policy is a pure function from observed state to a desired replica
//! count. Policies perform no I/O and hold no mutable state; the same input
//! always yields the same verdict. Rate limiting, cooldowns, and the final
//! write are the safe scaler's and reconciler's business, not the policy's.

use std::collections::HashMap;

use anyhow::{Result, anyhow};
use pkg_types::intent::PolicySpec;

mod cost;
mod proportional;
mod slo;

pub use cost::{CostAwarePolicy, PreferredDirection};
pub use proportional::ProportionalPolicy;
pub use slo::SloPolicy;

/// Everything a policy may consult. Observed SLO values default to 0 when
/// the metric source supplied none, which degrades SLO-aware policies to
/// plain proportional behavior.
#[derive(Debug, Clone, Copy)]
pub struct PolicyInput {
    pub current_replicas: u32,
    pub current_metric: f64,
    pub target_metric: f64,
    pub min_replicas: u32,
    pub max_replicas: u32,
    pub observed_latency_ms: f64,
    pub observed_error_rate: f64,
}

/// A policy's output. `budget_capped` is set only when a cost constraint
/// actually reduced the replica count; the reconciler turns it into an
/// advisory CostBudgetExceeded condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyVerdict {
    pub replicas: u32,
    pub budget_capped: bool,
}

impl PolicyVerdict {
    pub fn of(replicas: u32) -> Self {
        Self {
            replicas,
            budget_capped: false,
        }
    }
}

pub trait ScalingPolicy: Send + Sync {
    /// Type tag of this policy, for logging.
    fn name(&self) -> &str;

    /// Check the policy's own parameters. Called once at binding time.
    fn validate(&self) -> Result<()>;

    /// Compute the desired replica count. Pure and total for all inputs
    /// with `target_metric > 0` and `min <= max`.
    fn evaluate(&self, input: &PolicyInput) -> PolicyVerdict;
}

/// Rounding mode for the proportional baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Rounding {
    Ceil,
    Floor,
}

/// The proportional baseline shared by every policy variant:
/// `ratio = current / target`, desired = `round(ratio * max(current, 1))`.
/// Zero load maps straight to the floor of the allowed range. The result is
/// deliberately unclamped; each policy clamps exactly once, last.
pub(crate) fn proportional_baseline(input: &PolicyInput, rounding: Rounding) -> u32 {
    if input.current_metric == 0.0 {
        return input.min_replicas;
    }
    let ratio = input.current_metric / input.target_metric;
    let scaled = ratio * f64::from(input.current_replicas.max(1));
    let rounded = match rounding {
        Rounding::Ceil => scaled.ceil(),
        Rounding::Floor => scaled.floor(),
    };
    // f64 -> u32 saturates on overflow, which is what we want for absurd ratios.
    rounded as u32
}

pub(crate) fn clamp_replicas(replicas: u32, min: u32, max: u32) -> u32 {
    replicas.clamp(min, max)
}

type PolicyBuilder = Box<dyn Fn(&PolicySpec) -> Result<Box<dyn ScalingPolicy>> + Send + Sync>;

/// Maps the spec's `policy.type` tag to a constructor. New variants register
/// here without the reconciler knowing about them.
pub struct PolicyRegistry {
    builders: HashMap<String, PolicyBuilder>,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    /// Registry with the built-in policy set.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("proportional", Box::new(proportional::build));
        registry.register("slo", Box::new(slo::build));
        registry.register("costAware", Box::new(cost::build));
        registry
    }

    pub fn register(&mut self, type_tag: &str, builder: PolicyBuilder) {
        self.builders.insert(type_tag.to_string(), builder);
    }

    /// Construct and validate a policy from its spec. Unknown type tags are
    /// configuration errors, never silent fallbacks.
    pub fn build(&self, spec: &PolicySpec) -> Result<Box<dyn ScalingPolicy>> {
        let builder = self
            .builders
            .get(&spec.policy_type)
            .ok_or_else(|| anyhow!("unknown policy type '{}'", spec.policy_type))?;
        let policy = builder(spec)?;
        policy.validate()?;
        Ok(policy)
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
pub(crate) fn make_input(current: u32, metric: f64, target: f64, min: u32, max: u32) -> PolicyInput {
    PolicyInput {
        current_replicas: current,
        current_metric: metric,
        target_metric: target,
        min_replicas: min,
        max_replicas: max,
        observed_latency_ms: 0.0,
        observed_error_rate: 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_scales_proportionally() {
        // ratio 5.0 on 2 replicas -> 10
        let input = make_input(2, 50.0, 10.0, 1, 20);
        assert_eq!(proportional_baseline(&input, Rounding::Ceil), 10);
    }

    #[test]
    fn baseline_zero_metric_returns_min() {
        let input = make_input(5, 0.0, 10.0, 2, 20);
        assert_eq!(proportional_baseline(&input, Rounding::Ceil), 2);
    }

    #[test]
    fn baseline_recovers_from_zero_replicas() {
        // Externally scaled to 0: the multiplier floor of 1 lets load pull it back up.
        let input = make_input(0, 30.0, 10.0, 1, 20);
        assert_eq!(proportional_baseline(&input, Rounding::Ceil), 3);
    }

    #[test]
    fn baseline_floor_rounds_down() {
        // ratio 1.4 on 5 replicas -> 7.0 exactly; try 1.5 -> 7.5
        let input = make_input(5, 15.0, 10.0, 1, 20);
        assert_eq!(proportional_baseline(&input, Rounding::Ceil), 8);
        assert_eq!(proportional_baseline(&input, Rounding::Floor), 7);
    }

    #[test]
    fn registry_builds_builtins() {
        let registry = PolicyRegistry::with_builtins();
        for tag in ["proportional", "slo", "costAware"] {
            let spec = PolicySpec {
                policy_type: tag.to_string(),
                params: serde_json::Map::new(),
            };
            let policy = registry.build(&spec).unwrap();
            assert_eq!(policy.name(), tag);
        }
    }

    #[test]
    fn registry_rejects_unknown_type() {
        let registry = PolicyRegistry::with_builtins();
        let spec = PolicySpec {
            policy_type: "predictive".to_string(),
            params: serde_json::Map::new(),
        };
        let err = match registry.build(&spec) {
            Err(e) => e,
            Ok(_) => panic!("expected build to fail for unknown policy type"),
        };
        assert!(err.to_string().contains("unknown policy type"));
    }

    #[test]
    fn registry_accepts_plugins() {
        struct FixedPolicy;
        impl ScalingPolicy for FixedPolicy {
            fn name(&self) -> &str {
                "fixed"
            }
            fn validate(&self) -> Result<()> {
                Ok(())
            }
            fn evaluate(&self, input: &PolicyInput) -> PolicyVerdict {
                PolicyVerdict::of(input.min_replicas)
            }
        }

        let mut registry = PolicyRegistry::new();
        registry.register("fixed", Box::new(|_| Ok(Box::new(FixedPolicy))));
        let spec = PolicySpec {
            policy_type: "fixed".to_string(),
            params: serde_json::Map::new(),
        };
        assert!(registry.build(&spec).is_ok());
    }
}
