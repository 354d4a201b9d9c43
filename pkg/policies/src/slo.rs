use anyhow::{Result, bail};
use pkg_types::intent::PolicySpec;
use serde::Deserialize;
use tracing::warn;

use crate::{PolicyInput, PolicyVerdict, Rounding, ScalingPolicy, clamp_replicas, proportional_baseline};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SloConfig {
    target_latency_ms: f64,
    target_error_rate: f64,
    slo_violation_multiplier: f64,
}

impl Default for SloConfig {
    fn default() -> Self {
        Self {
            target_latency_ms: 100.0,
            target_error_rate: 0.01,
            slo_violation_multiplier: 1.5,
        }
    }
}

/// Service-level-objective-aware policy. Proportional baseline, escalated by
/// an aggressive multiplier while the observed latency or error rate is in
/// violation. The asymmetry is deliberate: violation escalates, compliance
/// never shrinks the baseline.
pub struct SloPolicy {
    target_latency_ms: f64,
    target_error_rate: f64,
    multiplier: f64,
}

pub(crate) fn build(spec: &PolicySpec) -> Result<Box<dyn ScalingPolicy>> {
    let config: SloConfig = match spec.params_for("slo") {
        Some(params) => serde_json::from_value(params.clone())?,
        None => SloConfig::default(),
    };
    Ok(Box::new(SloPolicy {
        target_latency_ms: config.target_latency_ms,
        target_error_rate: config.target_error_rate,
        multiplier: config.slo_violation_multiplier,
    }))
}

impl SloPolicy {
    fn in_violation(&self, input: &PolicyInput) -> bool {
        input.observed_latency_ms > self.target_latency_ms
            || input.observed_error_rate > self.target_error_rate
    }
}

impl ScalingPolicy for SloPolicy {
    fn name(&self) -> &str {
        "slo"
    }

    fn validate(&self) -> Result<()> {
        if !self.target_latency_ms.is_finite() || self.target_latency_ms <= 0.0 {
            bail!("targetLatencyMs must be positive");
        }
        if !(0.0..=1.0).contains(&self.target_error_rate) {
            bail!("targetErrorRate must be between 0 and 1");
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            bail!("sloViolationMultiplier must be at least 1");
        }
        Ok(())
    }

    fn evaluate(&self, input: &PolicyInput) -> PolicyVerdict {
        let mut desired = proportional_baseline(input, Rounding::Ceil);

        if self.in_violation(input) {
            let escalated = (f64::from(desired) * self.multiplier).ceil() as u32;
            warn!(
                "SLO violation (latency={}ms err={}): escalating desired {} -> {}",
                input.observed_latency_ms, input.observed_error_rate, desired, escalated
            );
            desired = escalated;
        }

        PolicyVerdict::of(clamp_replicas(
            desired,
            input.min_replicas,
            input.max_replicas,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::make_input;

    fn make_policy() -> SloPolicy {
        SloPolicy {
            target_latency_ms: 100.0,
            target_error_rate: 0.01,
            multiplier: 1.5,
        }
    }

    #[test]
    fn no_observations_degrades_to_proportional() {
        let policy = make_policy();
        // Observations default to 0 -> no violation -> ceil(50/10 * 2) = 10
        let verdict = policy.evaluate(&make_input(2, 50.0, 10.0, 1, 20));
        assert_eq!(verdict.replicas, 10);
    }

    #[test]
    fn latency_violation_escalates() {
        let policy = make_policy();
        let mut input = make_input(2, 50.0, 10.0, 1, 30);
        input.observed_latency_ms = 250.0;
        // baseline 10, escalated ceil(10 * 1.5) = 15
        assert_eq!(policy.evaluate(&input).replicas, 15);
    }

    #[test]
    fn error_rate_violation_escalates() {
        let policy = make_policy();
        let mut input = make_input(4, 20.0, 10.0, 1, 30);
        input.observed_error_rate = 0.05;
        // baseline ceil(2 * 4) = 8, escalated 12
        assert_eq!(policy.evaluate(&input).replicas, 12);
    }

    #[test]
    fn compliance_never_shrinks_baseline() {
        let policy = make_policy();
        let mut input = make_input(10, 3.0, 10.0, 1, 30);
        input.observed_latency_ms = 5.0;
        input.observed_error_rate = 0.0;
        // Healthy SLO, low load: plain baseline ceil(0.3 * 10) = 3
        assert_eq!(policy.evaluate(&input).replicas, 3);
    }

    #[test]
    fn escalation_clamps_last() {
        let policy = make_policy();
        let mut input = make_input(10, 30.0, 10.0, 1, 20);
        input.observed_latency_ms = 500.0;
        // baseline 30, escalated 45, clamped to 20
        assert_eq!(policy.evaluate(&input).replicas, 20);
    }

    #[test]
    fn config_bounds_validated() {
        let mut policy = make_policy();
        policy.target_error_rate = 1.5;
        assert!(policy.validate().is_err());

        let mut policy = make_policy();
        policy.target_latency_ms = 0.0;
        assert!(policy.validate().is_err());

        let mut policy = make_policy();
        policy.multiplier = 0.5;
        assert!(policy.validate().is_err());
    }
}
