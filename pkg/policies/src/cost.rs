use anyhow::{Result, bail};
use pkg_types::intent::PolicySpec;
use serde::Deserialize;
use tracing::warn;

use crate::{PolicyInput, PolicyVerdict, Rounding, ScalingPolicy, clamp_replicas, proportional_baseline};

/// Average hours in a month, used to project replica-hours into a monthly cost.
const HOURS_PER_MONTH: f64 = 730.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreferredDirection {
    Up,
    Down,
    Balanced,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CostConfig {
    max_monthly_cost: Option<f64>,
    cost_per_pod_per_hour: f64,
    preferred_direction: PreferredDirection,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            max_monthly_cost: None,
            cost_per_pod_per_hour: 0.0,
            preferred_direction: PreferredDirection::Balanced,
        }
    }
}

/// Cost-bounded policy. Proportional baseline capped by what the monthly
/// budget affords; a `down` preference biases the baseline rounding toward
/// the lower count. The replica bound is contractual and wins over the
/// budget, which is advisory only.
pub struct CostAwarePolicy {
    max_monthly_cost: Option<f64>,
    cost_per_pod_per_hour: f64,
    preferred_direction: PreferredDirection,
}

pub(crate) fn build(spec: &PolicySpec) -> Result<Box<dyn ScalingPolicy>> {
    let config: CostConfig = match spec.params_for("costAware") {
        Some(params) => serde_json::from_value(params.clone())?,
        None => CostConfig::default(),
    };
    Ok(Box::new(CostAwarePolicy {
        max_monthly_cost: config.max_monthly_cost,
        cost_per_pod_per_hour: config.cost_per_pod_per_hour,
        preferred_direction: config.preferred_direction,
    }))
}

impl CostAwarePolicy {
    /// Largest replica count the monthly budget pays for, if bounded.
    fn max_affordable(&self) -> Option<u32> {
        let budget = self.max_monthly_cost?;
        if self.cost_per_pod_per_hour <= 0.0 {
            return None;
        }
        Some((budget / (self.cost_per_pod_per_hour * HOURS_PER_MONTH)).floor() as u32)
    }
}

impl ScalingPolicy for CostAwarePolicy {
    fn name(&self) -> &str {
        "costAware"
    }

    fn validate(&self) -> Result<()> {
        if self.cost_per_pod_per_hour < 0.0 || !self.cost_per_pod_per_hour.is_finite() {
            bail!("costPerPodPerHour must be non-negative");
        }
        if let Some(cost) = self.max_monthly_cost
            && (cost < 0.0 || !cost.is_finite())
        {
            bail!("maxMonthlyCost must be non-negative");
        }
        Ok(())
    }

    fn evaluate(&self, input: &PolicyInput) -> PolicyVerdict {
        let rounding = match self.preferred_direction {
            PreferredDirection::Down => Rounding::Floor,
            PreferredDirection::Up | PreferredDirection::Balanced => Rounding::Ceil,
        };
        let mut desired = proportional_baseline(input, rounding);
        let mut budget_capped = false;

        if let Some(affordable) = self.max_affordable()
            && affordable < desired
        {
            warn!(
                "monthly budget ${:.2} affords {} replicas, capping desired {}",
                self.max_monthly_cost.unwrap_or_default(),
                affordable,
                desired
            );
            desired = affordable;
            budget_capped = true;
        }

        // The bound wins over the budget: clamping back up to min keeps the
        // verdict contractual even when min itself is unaffordable.
        PolicyVerdict {
            replicas: clamp_replicas(desired, input.min_replicas, input.max_replicas),
            budget_capped,
        }
    }
}
