use anyhow::Result;
use pkg_types::intent::PolicySpec;

use crate::{PolicyInput, PolicyVerdict, Rounding, ScalingPolicy, clamp_replicas, proportional_baseline};

/// The baseline policy: replicas track the metric-to-target ratio.
pub struct ProportionalPolicy;

pub(crate) fn build(_spec: &PolicySpec) -> Result<Box<dyn ScalingPolicy>> {
    Ok(Box::new(ProportionalPolicy))
}

impl ScalingPolicy for ProportionalPolicy {
    fn name(&self) -> &str {
        "proportional"
    }

    fn validate(&self) -> Result<()> {
        Ok(())
    }

    fn evaluate(&self, input: &PolicyInput) -> PolicyVerdict {
        let desired = proportional_baseline(input, Rounding::Ceil);
        PolicyVerdict::of(clamp_replicas(
            desired,
            input.min_replicas,
            input.max_replicas,
        ))
    }
}
