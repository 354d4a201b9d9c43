use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use pkg_metrics::ControllerMetrics;
use pkg_policies::{PolicyInput, ScalingPolicy};
use pkg_scaler::SafeScaler;
use pkg_sources::MetricSource;
use pkg_types::condition::{
    ConditionStatus, ConditionType, clear_condition, upsert_condition,
};
use pkg_types::intent::{IntentSpec, IntentStatus};
use pkg_workload::{CALL_DEADLINE, IntentApi, WorkloadApi, WorkloadError};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// What one tick did, for logs and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Replicas were written to the given count.
    Scaled(u32),
    /// Pipeline ran to the gate, which held (at desired, cooldown, clamped).
    Held(String),
    /// Workload read failed transiently; nothing observed, nothing patched.
    SkippedTransient,
    /// Workload does not exist this tick.
    SkippedTargetMissing,
    /// Metric sample unavailable.
    SkippedMetricUnavailable,
    /// The gate said act but the write failed; retried next tick.
    WriteFailed,
}

/// Per-intent reconcile worker. Owns the intent's metric source and policy
/// exclusively; ticks for one intent run inline in this worker's task, which
/// is what makes them mutually exclusive.
pub struct IntentWorker {
    pub(crate) namespace: String,
    pub(crate) name: String,
    pub(crate) spec: IntentSpec,
    pub(crate) source: Box<dyn MetricSource>,
    pub(crate) policy: Box<dyn ScalingPolicy>,
    pub(crate) workloads: Arc<dyn WorkloadApi>,
    pub(crate) intents: Arc<dyn IntentApi>,
    pub(crate) scaler: Arc<SafeScaler>,
    pub(crate) metrics: Arc<ControllerMetrics>,
    /// Working copy of the intent's status. Skipped ticks patch only their
    /// condition change; the other fields keep the last full observation.
    pub(crate) status: IntentStatus,
}

impl IntentWorker {
    pub(crate) fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Tick loop. Runs until the shutdown signal flips, then releases the
    /// metric source. This is the single close per binding lifecycle.
    pub(crate) async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let period = std::time::Duration::from_secs(u64::from(self.spec.sync_interval_seconds));
        let mut interval = tokio::time::interval(period);
        // Ticks that pile up behind slow I/O coalesce into one.
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let outcome = self.run_tick().await;
                    debug!("tick for {}: {:?}", self.key(), outcome);
                }
                _ = shutdown.changed() => break,
            }
        }

        self.source.close().await;
        debug!("worker for {} stopped", self.key());
    }

    /// One reconcile pass: read, sample, decide, gate, write, report.
    /// Never fails; every failure mode maps to a skip outcome.
    pub(crate) async fn run_tick(&mut self) -> TickOutcome {
        self.metrics.record_tick();
        let key = self.key();
        let target_ns = self
            .spec
            .target
            .namespace_or(&self.namespace)
            .to_string();
        let target_name = self.spec.target.name.clone();

        // 1. Read the workload's current replica count.
        let read = tokio::time::timeout(
            CALL_DEADLINE,
            self.workloads.get_replicas(&target_ns, &target_name),
        )
        .await
        .unwrap_or_else(|_| Err(WorkloadError::Transient("read deadline exceeded".into())));

        let current = match read {
            Ok(replicas) => replicas,
            Err(WorkloadError::NotFound) => {
                warn!("{}: target {}/{} not found", key, target_ns, target_name);
                self.metrics.record_skip();
                let now = Utc::now();
                upsert_condition(
                    &mut self.status.conditions,
                    ConditionType::TargetMissing,
                    ConditionStatus::True,
                    "TargetMissing",
                    &format!("workload {}/{} not found", target_ns, target_name),
                    now,
                );
                upsert_condition(
                    &mut self.status.conditions,
                    ConditionType::Ready,
                    ConditionStatus::False,
                    "TargetMissing",
                    "target workload missing",
                    now,
                );
                self.patch_status().await;
                return TickOutcome::SkippedTargetMissing;
            }
            Err(e) => {
                // Transient read failure: skip with no condition change.
                warn!("{}: replica read failed: {}", key, e);
                self.metrics.record_skip();
                return TickOutcome::SkippedTransient;
            }
        };
        // The read just proved the target exists; a stale TargetMissing must
        // not survive a later-step failure.
        clear_condition(&mut self.status.conditions, ConditionType::TargetMissing);

        // 2. Sample the metric.
        let reading = match self.source.sample().await {
            Ok(reading) => reading,
            Err(e) => {
                warn!("{}: metric sample failed: {}", key, e);
                self.metrics.record_skip();
                let now = Utc::now();
                upsert_condition(
                    &mut self.status.conditions,
                    ConditionType::MetricUnavailable,
                    ConditionStatus::True,
                    "MetricUnavailable",
                    &e.to_string(),
                    now,
                );
                upsert_condition(
                    &mut self.status.conditions,
                    ConditionType::Ready,
                    ConditionStatus::False,
                    "MetricUnavailable",
                    "metric sample unavailable",
                    now,
                );
                self.patch_status().await;
                return TickOutcome::SkippedMetricUnavailable;
            }
        };
        clear_condition(
            &mut self.status.conditions,
            ConditionType::MetricUnavailable,
        );

        // 3. Policy verdict.
        let input = PolicyInput {
            current_replicas: current,
            current_metric: reading.value,
            target_metric: self.spec.metric.target_value,
            min_replicas: self.spec.min_replicas,
            max_replicas: self.spec.max_replicas,
            observed_latency_ms: reading.latency_ms.unwrap_or(0.0),
            observed_error_rate: reading.error_rate.unwrap_or(0.0),
        };
        let verdict = self.policy.evaluate(&input);
        debug!(
            "{}: current={} metric={} target={} policy_desired={}",
            key, current, reading.value, self.spec.metric.target_value, verdict.replicas
        );

        // 4. Safety gate.
        let decision = self.scaler.decide(
            &key,
            current,
            verdict.replicas,
            self.spec.min_replicas,
            self.spec.max_replicas,
            &self.spec.behavior,
            Instant::now(),
        );

        let now = Utc::now();
        let outcome = if decision.act {
            // 5. Write, then record the cooldown only on confirmation.
            let write = tokio::time::timeout(
                CALL_DEADLINE,
                self.workloads
                    .set_replicas(&target_ns, &target_name, decision.target),
            )
            .await
            .unwrap_or_else(|_| Err(WorkloadError::Transient("write deadline exceeded".into())));

            match write {
                Ok(()) => {
                    info!(
                        "{}: scaled {}/{} from {} to {}",
                        key, target_ns, target_name, current, decision.target
                    );
                    self.scaler.record_scale(&key, Instant::now());
                    self.metrics.record_scale(current, decision.target);
                    self.status.last_scale_time = Some(now);
                    clear_condition(&mut self.status.conditions, ConditionType::ScalingFailed);
                    upsert_condition(
                        &mut self.status.conditions,
                        ConditionType::ScalingSucceeded,
                        ConditionStatus::True,
                        "ScalingSucceeded",
                        &decision.reason,
                        now,
                    );
                    upsert_condition(
                        &mut self.status.conditions,
                        ConditionType::Ready,
                        ConditionStatus::True,
                        "ScalingSucceeded",
                        &decision.reason,
                        now,
                    );
                    TickOutcome::Scaled(decision.target)
                }
                Err(e) => {
                    warn!("{}: replica write failed: {}", key, e);
                    self.metrics.record_scale_failure();
                    upsert_condition(
                        &mut self.status.conditions,
                        ConditionType::ScalingFailed,
                        ConditionStatus::True,
                        "ScalingFailed",
                        &e.to_string(),
                        now,
                    );
                    upsert_condition(
                        &mut self.status.conditions,
                        ConditionType::Ready,
                        ConditionStatus::False,
                        "ScalingFailed",
                        &e.to_string(),
                        now,
                    );
                    TickOutcome::WriteFailed
                }
            }
        } else {
            upsert_condition(
                &mut self.status.conditions,
                ConditionType::Ready,
                ConditionStatus::True,
                "NoScalingNeeded",
                &decision.reason,
                now,
            );
            TickOutcome::Held(decision.reason.clone())
        };

        // Budget advisory: present exactly while the policy is capping.
        if verdict.budget_capped {
            upsert_condition(
                &mut self.status.conditions,
                ConditionType::CostBudgetExceeded,
                ConditionStatus::True,
                "CostBudgetExceeded",
                "cost budget caps the desired replica count",
                now,
            );
        } else {
            clear_condition(
                &mut self.status.conditions,
                ConditionType::CostBudgetExceeded,
            );
        }

        // 6. Status reflects this tick's observation.
        self.status.current_replicas = current;
        self.status.desired_replicas = decision.target;
        self.status.current_metric_value = Some(reading.value);
        self.patch_status().await;

        outcome
    }

    async fn patch_status(&self) {
        let patched = tokio::time::timeout(
            CALL_DEADLINE,
            self.intents
                .patch_status(&self.namespace, &self.name, &self.status),
        )
        .await;
        match patched {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("{}: status patch failed: {}", self.key(), e),
            Err(_) => warn!("{}: status patch deadline exceeded", self.key()),
        }
    }
}
