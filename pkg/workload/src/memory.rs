use std::collections::VecDeque;

use async_trait::async_trait;
use dashmap::DashMap;
use pkg_types::intent::{IntentStatus, ScalingIntent};
use tokio::sync::Mutex;

use crate::{IntentApi, WorkloadApi, WorkloadError};

/// In-memory orchestrator backend for development and tests. Holds
/// workloads and intents in concurrent maps, and lets callers inject
/// one-shot failures to exercise the reconciler's error paths.
#[derive(Default)]
pub struct InMemoryCluster {
    workloads: DashMap<String, u32>,
    intents: DashMap<String, ScalingIntent>,
    get_failures: Mutex<VecDeque<WorkloadError>>,
    set_failures: Mutex<VecDeque<WorkloadError>>,
    writes: Mutex<Vec<(String, u32)>>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(namespace: &str, name: &str) -> String {
        format!("{}/{}", namespace, name)
    }

    pub fn add_workload(&self, namespace: &str, name: &str, replicas: u32) {
        self.workloads.insert(Self::key(namespace, name), replicas);
    }

    pub fn remove_workload(&self, namespace: &str, name: &str) {
        self.workloads.remove(&Self::key(namespace, name));
    }

    pub fn replicas_of(&self, namespace: &str, name: &str) -> Option<u32> {
        self.workloads
            .get(&Self::key(namespace, name))
            .map(|entry| *entry)
    }

    pub fn upsert_intent(&self, intent: ScalingIntent) {
        self.intents.insert(intent.key(), intent);
    }

    pub fn remove_intent(&self, namespace: &str, name: &str) {
        self.intents.remove(&Self::key(namespace, name));
    }

    pub fn status_of(&self, namespace: &str, name: &str) -> Option<IntentStatus> {
        self.intents
            .get(&Self::key(namespace, name))
            .map(|entry| entry.status.clone())
    }

    /// Queue an error for the next `get_replicas` call.
    pub async fn fail_next_get(&self, error: WorkloadError) {
        self.get_failures.lock().await.push_back(error);
    }

    /// Queue an error for the next `set_replicas` call.
    pub async fn fail_next_set(&self, error: WorkloadError) {
        self.set_failures.lock().await.push_back(error);
    }

    /// Every confirmed write, in order.
    pub async fn writes(&self) -> Vec<(String, u32)> {
        self.writes.lock().await.clone()
    }
}

#[async_trait]
impl WorkloadApi for InMemoryCluster {
    async fn get_replicas(&self, namespace: &str, name: &str) -> Result<u32, WorkloadError> {
        if let Some(error) = self.get_failures.lock().await.pop_front() {
            return Err(error);
        }
        self.workloads
            .get(&Self::key(namespace, name))
            .map(|entry| *entry)
            .ok_or(WorkloadError::NotFound)
    }

    async fn set_replicas(
        &self,
        namespace: &str,
        name: &str,
        replicas: u32,
    ) -> Result<(), WorkloadError> {
        if let Some(error) = self.set_failures.lock().await.pop_front() {
            return Err(error);
        }
        let key = Self::key(namespace, name);
        match self.workloads.get_mut(&key) {
            Some(mut entry) => {
                *entry = replicas;
                self.writes.lock().await.push((key, replicas));
                Ok(())
            }
            None => Err(WorkloadError::NotFound),
        }
    }
}

#[async_trait]
impl IntentApi for InMemoryCluster {
    async fn list_intents(&self) -> Result<Vec<ScalingIntent>, WorkloadError> {
        let mut intents: Vec<ScalingIntent> =
            self.intents.iter().map(|entry| entry.value().clone()).collect();
        intents.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(intents)
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &IntentStatus,
    ) -> Result<(), WorkloadError> {
        match self.intents.get_mut(&Self::key(namespace, name)) {
            Some(mut entry) => {
                entry.status = status.clone();
                Ok(())
            }
            None => Err(WorkloadError::NotFound),
        }
    }
}
