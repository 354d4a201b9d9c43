use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Target reference ---

/// Reference to the workload an intent scales.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetRef {
    /// Namespace of the target. Defaults to the intent's own namespace.
    #[serde(default)]
    pub namespace: Option<String>,
    pub name: String,
    #[serde(default = "default_target_kind")]
    pub kind: String,
}

fn default_target_kind() -> String {
    "Deployment".to_string()
}

impl TargetRef {
    /// Resolve the effective namespace given the owning intent's namespace.
    pub fn namespace_or<'a>(&'a self, intent_namespace: &'a str) -> &'a str {
        self.namespace.as_deref().unwrap_or(intent_namespace)
    }
}

// --- Metric spec ---

/// Tagged metric-source configuration. `target_value` is the per-pod goal
/// the policy scales toward; the dimensional meaning is metric-specific.
/// Backend-specific settings live under a key named after the type:
///
/// ```yaml
/// metric:
///   type: redis
///   targetValue: 10
///   redis:
///     host: redis.queue.svc
///     queueName: jobs
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSpec {
    #[serde(rename = "type")]
    pub metric_type: String,
    pub target_value: f64,
    #[serde(flatten)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl MetricSpec {
    /// Backend-specific config block for the given type tag, if present.
    pub fn params_for(&self, type_tag: &str) -> Option<&serde_json::Value> {
        self.params.get(type_tag)
    }
}

// --- Policy spec ---

/// Tagged policy configuration, same shape as [`MetricSpec`]: the
/// policy-specific block lives under a key named after the type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySpec {
    #[serde(rename = "type", default = "default_policy_type")]
    pub policy_type: String,
    #[serde(flatten)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

fn default_policy_type() -> String {
    "proportional".to_string()
}

impl Default for PolicySpec {
    fn default() -> Self {
        Self {
            policy_type: default_policy_type(),
            params: serde_json::Map::new(),
        }
    }
}

impl PolicySpec {
    pub fn params_for(&self, type_tag: &str) -> Option<&serde_json::Value> {
        self.params.get(type_tag)
    }
}

// --- Scaling behavior ---

/// Rate-limiting and cooldown settings for one scale direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleUpRule {
    #[serde(default = "default_max_increment")]
    pub max_increment: u32,
    #[serde(default = "default_scale_up_cooldown")]
    pub cooldown_seconds: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleDownRule {
    #[serde(default = "default_max_decrement")]
    pub max_decrement: u32,
    #[serde(default = "default_scale_down_cooldown")]
    pub cooldown_seconds: u32,
}

fn default_max_increment() -> u32 {
    5
}
fn default_scale_up_cooldown() -> u32 {
    60
}
fn default_max_decrement() -> u32 {
    2
}
fn default_scale_down_cooldown() -> u32 {
    300
}

impl Default for ScaleUpRule {
    fn default() -> Self {
        Self {
            max_increment: default_max_increment(),
            cooldown_seconds: default_scale_up_cooldown(),
        }
    }
}

impl Default for ScaleDownRule {
    fn default() -> Self {
        Self {
            max_decrement: default_max_decrement(),
            cooldown_seconds: default_scale_down_cooldown(),
        }
    }
}

/// Per-direction scaling limits. Scale-down defaults are deliberately more
/// conservative than scale-up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingBehavior {
    #[serde(default)]
    pub scale_up: ScaleUpRule,
    #[serde(default)]
    pub scale_down: ScaleDownRule,
}

// --- Intent spec ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentSpec {
    pub target: TargetRef,
    pub min_replicas: u32,
    pub max_replicas: u32,
    pub metric: MetricSpec,
    #[serde(default)]
    pub policy: PolicySpec,
    #[serde(default)]
    pub behavior: ScalingBehavior,
    #[serde(default = "default_sync_interval")]
    pub sync_interval_seconds: u32,
}

fn default_sync_interval() -> u32 {
    30
}

// --- Intent status ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentStatus {
    #[serde(default)]
    pub current_replicas: u32,
    #[serde(default)]
    pub desired_replicas: u32,
    #[serde(default)]
    pub current_metric_value: Option<f64>,
    #[serde(default)]
    pub last_scale_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub conditions: Vec<crate::condition::Condition>,
}

// --- Scaling intent ---

/// User-authored scaling intent for one workload. The controller treats the
/// spec as the source of truth and writes only the status subtree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingIntent {
    pub name: String,
    pub namespace: String,
    pub spec: IntentSpec,
    #[serde(default)]
    pub status: IntentStatus,
    pub created_at: DateTime<Utc>,
}

impl ScalingIntent {
    /// Unique key for binding tables and the cooldown clock.
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}
