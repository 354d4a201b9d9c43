//! Pluggable metric sources.
//!
//! A metric source is a pure data producer: on demand it returns one
//! non-negative, finite sample of current load. It has no opinion about
//! scaling. Transient backend faults surface as [`SourceError::Unavailable`],
//! which the reconciler treats as "skip this tick", never as terminal.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use pkg_types::intent::MetricSpec;
use thiserror::Error;

mod prometheus;
mod pubsub;
mod redis;
mod resp;

pub use prometheus::PrometheusSource;
pub use pubsub::PubSubSource;
pub use redis::RedisQueueSource;

/// Hard deadline for a single `sample()` call. Exceeding it yields
/// `Unavailable`, not an error that escapes the tick.
pub const SAMPLE_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum SourceError {
    /// Transient backend fault: connection refused, timeout, malformed
    /// response, auth lapse. A skip signal, retried next tick.
    #[error("metric unavailable: {0}")]
    Unavailable(String),
    /// Broken configuration. Terminal until the user edits the spec.
    #[error("invalid metric configuration: {0}")]
    Config(String),
}

/// One sample. `latency_ms`/`error_rate` are the optional SLO side channel;
/// only sources that can observe them fill them in.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MetricReading {
    pub value: f64,
    pub latency_ms: Option<f64>,
    pub error_rate: Option<f64>,
}

impl MetricReading {
    pub fn of(value: f64) -> Self {
        Self {
            value,
            ..Default::default()
        }
    }
}

/// Reject samples a source must never emit: negative, NaN, infinite.
pub(crate) fn checked_value(value: f64) -> Result<f64, SourceError> {
    if !value.is_finite() || value < 0.0 {
        return Err(SourceError::Unavailable(format!(
            "backend returned non-sample value {}",
            value
        )));
    }
    Ok(value)
}

#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Type tag of this source, for logging.
    fn name(&self) -> &str;

    /// Check configuration, called once at binding time. Failure prevents
    /// the binding from being established.
    async fn validate(&self) -> Result<(), SourceError>;

    /// Fetch the current load sample within [`SAMPLE_DEADLINE`].
    async fn sample(&self) -> Result<MetricReading, SourceError>;

    /// Release backend resources. Safe after any error, idempotent.
    async fn close(&self);
}

type SourceBuilder =
    Box<dyn Fn(&MetricSpec) -> Result<Box<dyn MetricSource>, SourceError> + Send + Sync>;

/// Maps the spec's `metric.type` tag to a constructor. New backends register
/// here without the reconciler knowing about them.
pub struct SourceRegistry {
    builders: HashMap<String, SourceBuilder>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    /// Registry with the built-in backend set.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("redis", Box::new(redis::build));
        registry.register("prometheus", Box::new(prometheus::build));
        registry.register("pubsub", Box::new(pubsub::build));
        registry
    }

    pub fn register(&mut self, type_tag: &str, builder: SourceBuilder) {
        self.builders.insert(type_tag.to_string(), builder);
    }

    /// Construct a source from the metric spec. The caller still runs
    /// `validate()` before establishing a binding.
    pub fn build(&self, spec: &MetricSpec) -> Result<Box<dyn MetricSource>, SourceError> {
        let builder = self.builders.get(&spec.metric_type).ok_or_else(|| {
            SourceError::Config(format!("unknown metric type '{}'", spec.metric_type))
        })?;
        builder(spec)
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
