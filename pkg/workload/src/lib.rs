//! Narrow facade over the orchestrator: read/write a workload's replica
//! count, list scaling intents, and patch intent status. The controller
//! owns no orchestrator state; everything here is a stateless pass-through
//! with a typed error taxonomy the reconciler can branch on.

use std::time::Duration;

use async_trait::async_trait;
use pkg_types::intent::{IntentStatus, ScalingIntent};
use thiserror::Error;

mod http;
mod memory;

pub use http::OrchestratorClient;
pub use memory::InMemoryCluster;

/// Deadline for every orchestrator call. Exceeding it reads as a transient
/// failure for that step.
pub const CALL_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkloadError {
    /// The target does not exist right now. Reported as TargetMissing and
    /// retried every tick; workloads can reappear.
    #[error("workload not found")]
    NotFound,
    /// Optimistic-concurrency conflict: our read went stale under us.
    /// Retried on the next tick, never within one.
    #[error("conflicting concurrent write")]
    Conflict,
    /// Anything that may heal on its own: refused connections, timeouts,
    /// 5xx responses.
    #[error("transient orchestrator failure: {0}")]
    Transient(String),
}

/// Replica read/write on one workload.
#[async_trait]
pub trait WorkloadApi: Send + Sync {
    async fn get_replicas(&self, namespace: &str, name: &str) -> Result<u32, WorkloadError>;

    /// Idempotent in effect: setting the same count twice is harmless.
    async fn set_replicas(
        &self,
        namespace: &str,
        name: &str,
        replicas: u32,
    ) -> Result<(), WorkloadError>;
}

/// The intent channel: observe intents, report status.
#[async_trait]
pub trait IntentApi: Send + Sync {
    async fn list_intents(&self) -> Result<Vec<ScalingIntent>, WorkloadError>;

    /// Patch only the status subtree of one intent. Last writer wins at the
    /// orchestrator.
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &IntentStatus,
    ) -> Result<(), WorkloadError>;
}
