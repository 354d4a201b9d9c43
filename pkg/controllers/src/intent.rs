use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, anyhow};
use chrono::Utc;
use pkg_metrics::ControllerMetrics;
use pkg_policies::PolicyRegistry;
use pkg_scaler::SafeScaler;
use pkg_sources::SourceRegistry;
use pkg_types::condition::{ConditionStatus, ConditionType, clear_condition, upsert_condition};
use pkg_types::intent::{IntentSpec, ScalingIntent};
use pkg_types::validate::validate_intent_spec;
use pkg_workload::{IntentApi, WorkloadApi};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::worker::IntentWorker;

/// Grace budget for a worker to finish its in-flight tick and close its
/// metric source during teardown.
const TEARDOWN_GRACE: Duration = Duration::from_secs(5);

/// Runtime binding for one observed intent.
enum Binding {
    /// Live worker task driving ticks under this spec.
    Active {
        spec: IntentSpec,
        shutdown: watch::Sender<bool>,
        handle: JoinHandle<()>,
    },
    /// Spec rejected as InvalidConfig. Kept so construction is not retried
    /// until the user edits the spec.
    Invalid { spec: IntentSpec },
}

impl Binding {
    fn spec(&self) -> &IntentSpec {
        match self {
            Binding::Active { spec, .. } => spec,
            Binding::Invalid { spec } => spec,
        }
    }
}

/// Reconciler for scaling intents.
///
/// Observes the intent set on a fixed watch interval and keeps one worker
/// task per valid intent. All binding mutations happen in the sync loop (or
/// in `shutdown`), serialized by the binding-table lock, so a spec change
/// always completes its teardown before the replacement worker starts.
pub struct IntentController {
    intents_api: Arc<dyn IntentApi>,
    workloads: Arc<dyn WorkloadApi>,
    sources: Arc<SourceRegistry>,
    policies: Arc<PolicyRegistry>,
    scaler: Arc<SafeScaler>,
    metrics: Arc<ControllerMetrics>,
    bindings: Mutex<HashMap<String, Binding>>,
    shutdown_tx: watch::Sender<bool>,
    watch_interval: Duration,
}

impl IntentController {
    pub fn new(
        intents_api: Arc<dyn IntentApi>,
        workloads: Arc<dyn WorkloadApi>,
        sources: Arc<SourceRegistry>,
        policies: Arc<PolicyRegistry>,
        scaler: Arc<SafeScaler>,
        metrics: Arc<ControllerMetrics>,
        watch_interval: Duration,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            intents_api,
            workloads,
            sources,
            policies,
            scaler,
            metrics,
            bindings: Mutex::new(HashMap::new()),
            shutdown_tx,
            watch_interval,
        }
    }

    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let controller = self;
        let mut shutdown = controller.shutdown_tx.subscribe();
        tokio::spawn(async move {
            info!(
                "IntentController started (watch interval={}s)",
                controller.watch_interval.as_secs()
            );
            let mut interval = tokio::time::interval(controller.watch_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = controller.sync().await {
                            warn!("IntentController sync error: {:#}", e);
                            controller.metrics.record_sync_error();
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        })
    }

    /// One pass of the intent watch: diff the observed set against the
    /// binding table, tearing down, rebinding, and binding as needed.
    pub async fn sync(&self) -> anyhow::Result<()> {
        let intents = self
            .intents_api
            .list_intents()
            .await
            .context("listing intents")?;
        let mut bindings = self.bindings.lock().await;

        // Deletions first: their worker slots free up before new binds.
        let live: HashSet<String> = intents.iter().map(|i| i.key()).collect();
        let stale: Vec<String> = bindings
            .keys()
            .filter(|key| !live.contains(*key))
            .cloned()
            .collect();
        for key in stale {
            if let Some(binding) = bindings.remove(&key) {
                info!("intent {} deleted, tearing down binding", key);
                teardown(binding).await;
                self.scaler.forget(&key);
            }
        }

        for intent in intents {
            let key = intent.key();
            match bindings.get(&key) {
                Some(existing) if existing.spec() == &intent.spec => continue,
                Some(_) => {
                    info!("intent {} spec changed, rebinding", key);
                    if let Some(old) = bindings.remove(&key) {
                        teardown(old).await;
                    }
                }
                None => {}
            }
            let binding = self.bind(&intent).await;
            bindings.insert(key, binding);
        }

        let active = bindings
            .values()
            .filter(|b| matches!(b, Binding::Active { .. }))
            .count();
        self.metrics.set_active_intents(active);
        self.metrics.set_invalid_intents(bindings.len() - active);
        Ok(())
    }

    /// Construct the runtime binding for an intent: validate the spec,
    /// build and validate the metric source, build the policy, seed the
    /// cooldown clock, and start the worker.
    async fn bind(&self, intent: &ScalingIntent) -> Binding {
        let key = intent.key();
        match self.try_bind(intent).await {
            Ok(binding) => binding,
            Err(reason) => {
                warn!("intent {} has invalid config: {:#}", key, reason);
                self.report_invalid(intent, &reason.to_string()).await;
                Binding::Invalid {
                    spec: intent.spec.clone(),
                }
            }
        }
    }

    async fn try_bind(&self, intent: &ScalingIntent) -> anyhow::Result<Binding> {
        let key = intent.key();
        validate_intent_spec(&intent.spec)?;

        let source = self
            .sources
            .build(&intent.spec.metric)
            .map_err(|e| anyhow!("{}", e))?;
        if let Err(e) = source.validate().await {
            source.close().await;
            return Err(anyhow!("{}", e));
        }

        let policy = self.policies.build(&intent.spec.policy)?;

        // Seed the cooldown clock from the last reported scale so a
        // controller restart does not forget an active cooldown.
        if let Some(last_scale) = intent.status.last_scale_time
            && let Ok(elapsed) = (Utc::now() - last_scale).to_std()
        {
            self.scaler.seed(&key, elapsed, Instant::now());
        }

        info!(
            "bound intent {} (metric={}, policy={}, interval={}s)",
            key,
            source.name(),
            policy.name(),
            intent.spec.sync_interval_seconds
        );

        // A successful bind supersedes any earlier config rejection.
        let mut status = intent.status.clone();
        clear_condition(&mut status.conditions, ConditionType::InvalidConfig);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let worker = IntentWorker {
            namespace: intent.namespace.clone(),
            name: intent.name.clone(),
            spec: intent.spec.clone(),
            source,
            policy,
            workloads: Arc::clone(&self.workloads),
            intents: Arc::clone(&self.intents_api),
            scaler: Arc::clone(&self.scaler),
            metrics: Arc::clone(&self.metrics),
            status,
        };
        let handle = tokio::spawn(worker.run(shutdown_rx));

        Ok(Binding::Active {
            spec: intent.spec.clone(),
            shutdown,
            handle,
        })
    }

    async fn report_invalid(&self, intent: &ScalingIntent, reason: &str) {
        let mut status = intent.status.clone();
        let now = Utc::now();
        upsert_condition(
            &mut status.conditions,
            ConditionType::InvalidConfig,
            ConditionStatus::True,
            "InvalidConfig",
            reason,
            now,
        );
        upsert_condition(
            &mut status.conditions,
            ConditionType::Ready,
            ConditionStatus::False,
            "InvalidConfig",
            reason,
            now,
        );
        if let Err(e) = self
            .intents_api
            .patch_status(&intent.namespace, &intent.name, &status)
            .await
        {
            warn!("{}: failed to report InvalidConfig: {}", intent.key(), e);
        }
    }

    /// Stop the sync loop and tear down every binding, closing each metric
    /// source. Bounded by the per-binding grace budget.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let mut bindings = self.bindings.lock().await;
        let count = bindings.len();
        for (_, binding) in bindings.drain() {
            teardown(binding).await;
        }
        self.metrics.set_active_intents(0);
        self.metrics.set_invalid_intents(0);
        info!("IntentController stopped ({} bindings torn down)", count);
    }
}

async fn teardown(binding: Binding) {
    if let Binding::Active {
        shutdown, handle, ..
    } = binding
    {
        let _ = shutdown.send(true);
        if tokio::time::timeout(TEARDOWN_GRACE, handle).await.is_err() {
            warn!("worker did not stop within teardown grace, detaching");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::testutil::{make_intent, mock_registry};
    use pkg_types::condition::ConditionType;
    use pkg_workload::InMemoryCluster;

    struct Harness {
        cluster: Arc<InMemoryCluster>,
        controller: Arc<IntentController>,
        closed: Arc<AtomicUsize>,
        scaler: Arc<SafeScaler>,
    }

    fn make_harness() -> Harness {
        let cluster = Arc::new(InMemoryCluster::new());
        let closed = Arc::new(AtomicUsize::new(0));
        let scaler = Arc::new(SafeScaler::new());
        let controller = Arc::new(IntentController::new(
            Arc::clone(&cluster) as Arc<dyn IntentApi>,
            Arc::clone(&cluster) as Arc<dyn WorkloadApi>,
            Arc::new(mock_registry(Arc::clone(&closed))),
            Arc::new(PolicyRegistry::with_builtins()),
            Arc::clone(&scaler),
            Arc::new(ControllerMetrics::new()),
            Duration::from_secs(10),
        ));
        Harness {
            cluster,
            controller,
            closed,
            scaler,
        }
    }

    /// Give spawned workers a moment to run their immediate first tick.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn binds_new_intent_and_scales() {
        let h = make_harness();
        h.cluster.add_workload("default", "web", 2);
        h.cluster.upsert_intent(make_intent("default", "scaler", 50.0));

        h.controller.sync().await.unwrap();
        settle().await;

        assert_eq!(h.cluster.replicas_of("default", "web"), Some(7));
        h.controller.shutdown().await;
    }

    #[tokio::test]
    async fn spec_change_replaces_binding_and_closes_source() {
        let h = make_harness();
        h.cluster.add_workload("default", "web", 2);
        let mut intent = make_intent("default", "scaler", 10.0);
        h.cluster.upsert_intent(intent.clone());

        h.controller.sync().await.unwrap();
        settle().await;
        assert_eq!(h.closed.load(Ordering::SeqCst), 0);

        // Unchanged spec on re-sync: binding survives, no close.
        h.controller.sync().await.unwrap();
        assert_eq!(h.closed.load(Ordering::SeqCst), 0);

        // Edited spec: old source closed exactly once, new worker runs.
        intent.spec.metric.target_value = 5.0;
        h.cluster.upsert_intent(intent);
        h.controller.sync().await.unwrap();
        settle().await;
        assert_eq!(h.closed.load(Ordering::SeqCst), 1);

        h.controller.shutdown().await;
        assert_eq!(h.closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn deletion_tears_down_and_forgets_cooldown() {
        let h = make_harness();
        h.cluster.add_workload("default", "web", 2);
        h.cluster.upsert_intent(make_intent("default", "scaler", 50.0));

        h.controller.sync().await.unwrap();
        settle().await;
        assert!(h.scaler.last_scale_at("default/scaler").is_some());

        h.cluster.remove_intent("default", "scaler");
        h.controller.sync().await.unwrap();

        assert_eq!(h.closed.load(Ordering::SeqCst), 1);
        assert!(h.scaler.last_scale_at("default/scaler").is_none());
        h.controller.shutdown().await;
        // Already torn down; shutdown must not close again.
        assert_eq!(h.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_config_reports_without_binding() {
        let h = make_harness();
        h.cluster.add_workload("default", "web", 2);
        let mut intent = make_intent("default", "scaler", 50.0);
        intent.spec.metric.metric_type = "carrier-pigeon".to_string();
        h.cluster.upsert_intent(intent.clone());

        h.controller.sync().await.unwrap();
        settle().await;

        let status = h.cluster.status_of("default", "scaler").unwrap();
        assert!(status.conditions.iter().any(|c| {
            c.condition_type == ConditionType::InvalidConfig
                && c.status == pkg_types::condition::ConditionStatus::True
        }));
        // No worker ran, nothing scaled, nothing to close.
        assert_eq!(h.cluster.replicas_of("default", "web"), Some(2));
        assert_eq!(h.closed.load(Ordering::SeqCst), 0);

        // Same broken spec again: not re-bound, not re-reported as new.
        h.controller.sync().await.unwrap();
        assert_eq!(h.closed.load(Ordering::SeqCst), 0);

        // The user fixes the spec: binding establishes, scaling resumes, and
        // the stale rejection clears from status.
        intent.spec.metric.metric_type = "mock".to_string();
        h.cluster.upsert_intent(intent);
        h.controller.sync().await.unwrap();
        settle().await;
        assert_eq!(h.cluster.replicas_of("default", "web"), Some(7));
        let status = h.cluster.status_of("default", "scaler").unwrap();
        assert!(
            !status
                .conditions
                .iter()
                .any(|c| c.condition_type == ConditionType::InvalidConfig)
        );

        h.controller.shutdown().await;
    }

    #[tokio::test]
    async fn invalid_bounds_rejected_at_validation() {
        let h = make_harness();
        h.cluster.add_workload("default", "web", 2);
        let mut intent = make_intent("default", "scaler", 50.0);
        intent.spec.min_replicas = 10;
        intent.spec.max_replicas = 2;
        h.cluster.upsert_intent(intent);

        h.controller.sync().await.unwrap();
        settle().await;

        let status = h.cluster.status_of("default", "scaler").unwrap();
        assert!(
            status
                .conditions
                .iter()
                .any(|c| c.condition_type == ConditionType::InvalidConfig)
        );
        assert_eq!(h.cluster.replicas_of("default", "web"), Some(2));
        h.controller.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_policy_type_is_invalid_config() {
        let h = make_harness();
        h.cluster.add_workload("default", "web", 2);
        let mut intent = make_intent("default", "scaler", 50.0);
        intent.spec.policy.policy_type = "predictive".to_string();
        h.cluster.upsert_intent(intent);

        h.controller.sync().await.unwrap();

        let status = h.cluster.status_of("default", "scaler").unwrap();
        assert!(
            status
                .conditions
                .iter()
                .any(|c| c.condition_type == ConditionType::InvalidConfig)
        );
        h.controller.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_closes_every_binding() {
        let h = make_harness();
        h.cluster.add_workload("default", "web", 2);
        h.cluster.add_workload("prod", "api", 3);
        h.cluster.upsert_intent(make_intent("default", "scaler-a", 10.0));
        let mut b = make_intent("prod", "scaler-b", 10.0);
        b.spec.target.namespace = Some("prod".to_string());
        b.spec.target.name = "api".to_string();
        h.cluster.upsert_intent(b);

        h.controller.sync().await.unwrap();
        settle().await;

        h.controller.shutdown().await;
        assert_eq!(h.closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn restart_seeds_cooldown_from_status() {
        let h = make_harness();
        h.cluster.add_workload("default", "web", 2);
        let mut intent = make_intent("default", "scaler", 50.0);
        intent.spec.behavior.scale_up.cooldown_seconds = 3600;
        // The previous controller instance scaled moments ago.
        intent.status.last_scale_time = Some(Utc::now());
        h.cluster.upsert_intent(intent);

        h.controller.sync().await.unwrap();
        settle().await;

        // Seeded cooldown holds the first post-restart tick.
        assert_eq!(h.cluster.replicas_of("default", "web"), Some(2));
        h.controller.shutdown().await;
    }
}
