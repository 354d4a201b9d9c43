use async_trait::async_trait;
use pkg_types::intent::{IntentStatus, ScalingIntent};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{CALL_DEADLINE, IntentApi, WorkloadApi, WorkloadError};

/// Replica-count view of a workload, as served by the scale subresource.
#[derive(Debug, Serialize, Deserialize)]
struct ScaleSnapshot {
    replicas: u32,
}

/// HTTP client for the orchestrator's REST API.
pub struct OrchestratorClient {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl OrchestratorClient {
    pub fn new(base_url: &str, token: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(CALL_DEADLINE).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            client,
        })
    }

    fn scale_url(&self, namespace: &str, name: &str) -> String {
        format!(
            "{}/api/v1/namespaces/{}/deployments/{}/scale",
            self.base_url, namespace, name
        )
    }

    fn map_status(status: reqwest::StatusCode) -> Option<WorkloadError> {
        if status.is_success() {
            return None;
        }
        Some(match status {
            reqwest::StatusCode::NOT_FOUND => WorkloadError::NotFound,
            reqwest::StatusCode::CONFLICT => WorkloadError::Conflict,
            other => WorkloadError::Transient(format!("orchestrator returned {}", other)),
        })
    }
}

fn transport_error(e: reqwest::Error) -> WorkloadError {
    WorkloadError::Transient(e.to_string())
}

#[async_trait]
impl WorkloadApi for OrchestratorClient {
    async fn get_replicas(&self, namespace: &str, name: &str) -> Result<u32, WorkloadError> {
        let response = self
            .client
            .get(self.scale_url(namespace, name))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(transport_error)?;

        if let Some(err) = Self::map_status(response.status()) {
            return Err(err);
        }
        let scale: ScaleSnapshot = response.json().await.map_err(transport_error)?;
        Ok(scale.replicas)
    }

    async fn set_replicas(
        &self,
        namespace: &str,
        name: &str,
        replicas: u32,
    ) -> Result<(), WorkloadError> {
        let response = self
            .client
            .put(self.scale_url(namespace, name))
            .bearer_auth(&self.token)
            .json(&ScaleSnapshot { replicas })
            .send()
            .await
            .map_err(transport_error)?;

        if let Some(err) = Self::map_status(response.status()) {
            return Err(err);
        }
        debug!("scaled {}/{} to {}", namespace, name, replicas);
        Ok(())
    }
}

#[async_trait]
impl IntentApi for OrchestratorClient {
    async fn list_intents(&self) -> Result<Vec<ScalingIntent>, WorkloadError> {
        let response = self
            .client
            .get(format!("{}/api/v1/scalingintents", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(transport_error)?;

        if let Some(err) = Self::map_status(response.status()) {
            return Err(err);
        }
        response.json().await.map_err(transport_error)
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &IntentStatus,
    ) -> Result<(), WorkloadError> {
        let response = self
            .client
            .put(format!(
                "{}/api/v1/namespaces/{}/scalingintents/{}/status",
                self.base_url, namespace, name
            ))
            .bearer_auth(&self.token)
            .json(status)
            .send()
            .await
            .map_err(transport_error)?;

        if let Some(err) = Self::map_status(response.status()) {
            return Err(err);
        }
        Ok(())
    }
}
