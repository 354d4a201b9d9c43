use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed vocabulary of condition types the controller reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionType {
    Ready,
    InvalidConfig,
    TargetMissing,
    MetricUnavailable,
    ScalingSucceeded,
    ScalingFailed,
    CostBudgetExceeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
}

/// One status condition on an intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

/// Insert or update a condition in place. `last_transition_time` moves only
/// when the status for that condition type actually flips; reason/message
/// always take the latest values.
pub fn upsert_condition(
    conditions: &mut Vec<Condition>,
    condition_type: ConditionType,
    status: ConditionStatus,
    reason: &str,
    message: &str,
    now: DateTime<Utc>,
) {
    match conditions
        .iter_mut()
        .find(|c| c.condition_type == condition_type)
    {
        Some(existing) => {
            if existing.status != status {
                existing.last_transition_time = now;
            }
            existing.status = status;
            existing.reason = reason.to_string();
            existing.message = message.to_string();
        }
        None => conditions.push(Condition {
            condition_type,
            status,
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: now,
        }),
    }
}

/// Remove a condition type entirely (used for advisory conditions that only
/// apply while their cause persists).
pub fn clear_condition(conditions: &mut Vec<Condition>, condition_type: ConditionType) {
    conditions.retain(|c| c.condition_type != condition_type);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_inserts_then_updates() {
        let t0 = Utc::now();
        let mut conditions = Vec::new();

        upsert_condition(
            &mut conditions,
            ConditionType::Ready,
            ConditionStatus::True,
            "ScalingSucceeded",
            "scaled up",
            t0,
        );
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, t0);

        // Same status later: transition time must not move.
        let t1 = t0 + chrono::Duration::seconds(30);
        upsert_condition(
            &mut conditions,
            ConditionType::Ready,
            ConditionStatus::True,
            "NoScalingNeeded",
            "at desired",
            t1,
        );
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, t0);
        assert_eq!(conditions[0].reason, "NoScalingNeeded");

        // Status flip: transition time moves.
        let t2 = t1 + chrono::Duration::seconds(30);
        upsert_condition(
            &mut conditions,
            ConditionType::Ready,
            ConditionStatus::False,
            "MetricUnavailable",
            "sample failed",
            t2,
        );
        assert_eq!(conditions[0].last_transition_time, t2);
    }

    #[test]
    fn clear_removes_only_matching_type() {
        let now = Utc::now();
        let mut conditions = Vec::new();
        upsert_condition(
            &mut conditions,
            ConditionType::Ready,
            ConditionStatus::True,
            "r",
            "m",
            now,
        );
        upsert_condition(
            &mut conditions,
            ConditionType::CostBudgetExceeded,
            ConditionStatus::True,
            "r",
            "m",
            now,
        );

        clear_condition(&mut conditions, ConditionType::CostBudgetExceeded);
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].condition_type, ConditionType::Ready);
    }

    #[test]
    fn condition_serializes_k8s_style() {
        let c = Condition {
            condition_type: ConditionType::TargetMissing,
            status: ConditionStatus::False,
            reason: "NotFound".to_string(),
            message: "deployment web not found".to_string(),
            last_transition_time: Utc::now(),
        };
        let v = serde_json::to_value(&c).unwrap();
        assert_eq!(v["type"], "TargetMissing");
        assert_eq!(v["status"], "False");
        assert!(v["lastTransitionTime"].is_string());
    }
}
