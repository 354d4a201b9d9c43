use anyhow::{Result, bail};

use crate::intent::IntentSpec;

/// Longest name the orchestrator accepts for intents and workloads.
const MAX_NAME_LEN: usize = 63;

/// Check an intent or target name: DNS-label shaped, i.e. lowercase
/// alphanumerics with interior hyphens.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("name must not be empty");
    }
    if name.len() > MAX_NAME_LEN {
        bail!(
            "name '{}' is longer than {} characters",
            name,
            MAX_NAME_LEN
        );
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !c.is_ascii_lowercase() && !c.is_ascii_digit() && *c != '-')
    {
        bail!(
            "name '{}' contains '{}'; only [a-z0-9-] is allowed",
            name,
            bad
        );
    }
    if name.starts_with('-') || name.ends_with('-') {
        bail!("name '{}' must not begin or end with a hyphen", name);
    }
    Ok(())
}

/// Shape validation for an intent spec. Runs before a binding is
/// established; failures surface as an InvalidConfig condition.
pub fn validate_intent_spec(spec: &IntentSpec) -> Result<()> {
    validate_name(&spec.target.name)?;
    if let Some(ns) = &spec.target.namespace {
        validate_name(ns)?;
    }

    if spec.min_replicas < 1 {
        bail!("minReplicas must be at least 1 (got {})", spec.min_replicas);
    }
    if spec.min_replicas > spec.max_replicas {
        bail!(
            "minReplicas ({}) must not exceed maxReplicas ({})",
            spec.min_replicas,
            spec.max_replicas
        );
    }

    if !spec.metric.target_value.is_finite() || spec.metric.target_value <= 0.0 {
        bail!(
            "metric.targetValue must be a positive number (got {})",
            spec.metric.target_value
        );
    }
    if spec.metric.metric_type.is_empty() {
        bail!("metric.type must not be empty");
    }

    if spec.sync_interval_seconds == 0 {
        bail!("syncIntervalSeconds must be positive");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::{MetricSpec, PolicySpec, ScalingBehavior, TargetRef};

    fn make_spec() -> IntentSpec {
        IntentSpec {
            target: TargetRef {
                namespace: None,
                name: "web".to_string(),
                kind: "Deployment".to_string(),
            },
            min_replicas: 1,
            max_replicas: 10,
            metric: MetricSpec {
                metric_type: "redis".to_string(),
                target_value: 10.0,
                params: serde_json::Map::new(),
            },
            policy: PolicySpec::default(),
            behavior: ScalingBehavior::default(),
            sync_interval_seconds: 30,
        }
    }

    #[test]
    fn well_formed_names_pass() {
        for name in ["web", "queue-worker", "api-v2", "scaler-0"] {
            assert!(validate_name(name).is_ok(), "{} should be valid", name);
        }
    }

    #[test]
    fn malformed_names_rejected() {
        for name in [
            "",
            "Queue-Worker",
            "queue_worker",
            "-worker",
            "worker-",
            "worker!",
        ] {
            assert!(validate_name(name).is_err(), "{:?} should be invalid", name);
        }
        assert!(validate_name(&"w".repeat(MAX_NAME_LEN + 1)).is_err());
        assert!(validate_name(&"w".repeat(MAX_NAME_LEN)).is_ok());
    }

    #[test]
    fn valid_spec_passes() {
        assert!(validate_intent_spec(&make_spec()).is_ok());
    }

    #[test]
    fn min_must_not_exceed_max() {
        let mut spec = make_spec();
        spec.min_replicas = 11;
        assert!(validate_intent_spec(&spec).is_err());
    }

    #[test]
    fn min_below_one_rejected() {
        let mut spec = make_spec();
        spec.min_replicas = 0;
        assert!(validate_intent_spec(&spec).is_err());
    }

    #[test]
    fn target_value_must_be_positive() {
        let mut spec = make_spec();
        spec.metric.target_value = 0.0;
        assert!(validate_intent_spec(&spec).is_err());
        spec.metric.target_value = -5.0;
        assert!(validate_intent_spec(&spec).is_err());
        spec.metric.target_value = f64::NAN;
        assert!(validate_intent_spec(&spec).is_err());
    }

    #[test]
    fn zero_sync_interval_rejected() {
        let mut spec = make_spec();
        spec.sync_interval_seconds = 0;
        assert!(validate_intent_spec(&spec).is_err());
    }
}
