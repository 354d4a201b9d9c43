use async_trait::async_trait;
use pkg_types::intent::MetricSpec;
use serde::Deserialize;
use tracing::debug;

use crate::{MetricReading, MetricSource, SAMPLE_DEADLINE, SourceError, checked_value};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PubSubConfig {
    project_id: String,
    subscription_id: String,
    /// File holding a bearer token for the subscription API.
    credentials_path: String,
    endpoint: String,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            subscription_id: String::new(),
            credentials_path: String::new(),
            endpoint: "https://pubsub.googleapis.com".to_string(),
        }
    }
}

/// Subscription-backlog probe: the count of undelivered messages on a
/// Pub/Sub subscription, read from its stats endpoint with a bearer token.
/// Credentials problems are configuration errors at binding time; everything
/// that goes wrong later is transient.
pub struct PubSubSource {
    config: PubSubConfig,
    client: reqwest::Client,
}

pub(crate) fn build(spec: &MetricSpec) -> Result<Box<dyn MetricSource>, SourceError> {
    let config: PubSubConfig = match spec.params_for("pubsub") {
        Some(params) => serde_json::from_value(params.clone())
            .map_err(|e| SourceError::Config(format!("pubsub block: {}", e)))?,
        None => PubSubConfig::default(),
    };
    let client = reqwest::Client::builder()
        .timeout(SAMPLE_DEADLINE)
        .build()
        .map_err(|e| SourceError::Config(e.to_string()))?;
    Ok(Box::new(PubSubSource { config, client }))
}

impl PubSubSource {
    async fn read_token(&self) -> Result<String, SourceError> {
        let raw = tokio::fs::read_to_string(&self.config.credentials_path)
            .await
            .map_err(|e| {
                SourceError::Config(format!(
                    "credentials file {}: {}",
                    self.config.credentials_path, e
                ))
            })?;
        let token = raw.trim().to_string();
        if token.is_empty() {
            return Err(SourceError::Config(format!(
                "credentials file {} is empty",
                self.config.credentials_path
            )));
        }
        Ok(token)
    }

    fn stats_url(&self) -> String {
        format!(
            "{}/v1/projects/{}/subscriptions/{}:stats",
            self.config.endpoint.trim_end_matches('/'),
            self.config.project_id,
            self.config.subscription_id
        )
    }
}

/// Pull the undelivered-message count out of a subscription stats payload.
fn parse_backlog(body: &serde_json::Value) -> Result<f64, SourceError> {
    let raw = &body["numUndeliveredMessages"];
    let parsed = match raw {
        serde_json::Value::Number(n) => n.as_f64(),
        // The API serializes 64-bit counters as strings.
        serde_json::Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| {
        SourceError::Unavailable(format!("missing or unparsable numUndeliveredMessages: {}", raw))
    })
}

#[async_trait]
impl MetricSource for PubSubSource {
    fn name(&self) -> &str {
        "pubsub"
    }

    async fn validate(&self) -> Result<(), SourceError> {
        if self.config.project_id.is_empty() {
            return Err(SourceError::Config("pubsub projectId is required".into()));
        }
        if self.config.subscription_id.is_empty() {
            return Err(SourceError::Config(
                "pubsub subscriptionId is required".into(),
            ));
        }
        // Auth failures belong at binding time: prove the token is readable now.
        self.read_token().await?;
        Ok(())
    }

    async fn sample(&self) -> Result<MetricReading, SourceError> {
        // The file was readable at validate(); losing it later is transient.
        let token = match self.read_token().await {
            Ok(token) => token,
            Err(e) => return Err(SourceError::Unavailable(e.to_string())),
        };

        let response = self
            .client
            .get(self.stats_url())
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(format!("pubsub stats: {}", e)))?;

        if !response.status().is_success() {
            return Err(SourceError::Unavailable(format!(
                "pubsub stats returned status {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SourceError::Unavailable(format!("pubsub response: {}", e)))?;
        let backlog = checked_value(parse_backlog(&body)?)?;
        debug!(
            "pubsub subscription '{}' backlog: {}",
            self.config.subscription_id, backlog
        );
        Ok(MetricReading::of(backlog))
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_source(project: &str, subscription: &str, credentials_path: &str) -> PubSubSource {
        PubSubSource {
            config: PubSubConfig {
                project_id: project.to_string(),
                subscription_id: subscription.to_string(),
                credentials_path: credentials_path.to_string(),
                ..PubSubConfig::default()
            },
            client: reqwest::Client::new(),
        }
    }

    #[tokio::test]
    async fn validate_requires_ids() {
        let source = make_source("", "sub", "/tmp/token");
        assert!(matches!(
            source.validate().await,
            Err(SourceError::Config(_))
        ));

        let source = make_source("proj", "", "/tmp/token");
        assert!(matches!(
            source.validate().await,
            Err(SourceError::Config(_))
        ));
    }

    #[tokio::test]
    async fn missing_credentials_file_is_config_error() {
        let source = make_source("proj", "sub", "/nonexistent/scalerd-token");
        assert!(matches!(
            source.validate().await,
            Err(SourceError::Config(_))
        ));
    }

    #[tokio::test]
    async fn readable_credentials_pass_validation() {
        let dir = std::env::temp_dir().join("scalerd-pubsub-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("token");
        std::fs::write(&path, "ya29.test-token\n").unwrap();

        let source = make_source("proj", "sub", path.to_str().unwrap());
        assert!(source.validate().await.is_ok());
    }

    #[test]
    fn parses_numeric_and_string_backlogs() {
        let body = serde_json::json!({ "numUndeliveredMessages": 250 });
        assert_eq!(parse_backlog(&body).unwrap(), 250.0);

        let body = serde_json::json!({ "numUndeliveredMessages": "1024" });
        assert_eq!(parse_backlog(&body).unwrap(), 1024.0);
    }

    #[test]
    fn missing_backlog_field_is_unavailable() {
        let body = serde_json::json!({ "name": "projects/p/subscriptions/s" });
        assert!(matches!(
            parse_backlog(&body),
            Err(SourceError::Unavailable(_))
        ));
    }

    #[test]
    fn stats_url_shape() {
        let source = make_source("my-proj", "my-sub", "/tmp/token");
        assert_eq!(
            source.stats_url(),
            "https://pubsub.googleapis.com/v1/projects/my-proj/subscriptions/my-sub:stats"
        );
    }
}
