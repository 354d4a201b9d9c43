use std::collections::HashMap;

use async_trait::async_trait;
use pkg_types::intent::MetricSpec;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{MetricReading, MetricSource, SAMPLE_DEADLINE, SourceError, checked_value};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PrometheusConfig {
    server_url: String,
    query: String,
    headers: HashMap<String, String>,
    /// Optional side-channel queries feeding SLO-aware policies. Their
    /// failures degrade the reading, never the sample.
    latency_query: Option<String>,
    error_rate_query: Option<String>,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            server_url: "http://prometheus:9090".to_string(),
            query: String::new(),
            headers: HashMap::new(),
            latency_query: None,
            error_rate_query: None,
        }
    }
}

/// Time-series query probe against the Prometheus HTTP API. The query must
/// yield a scalar (or a one-element instant vector); anything else is a
/// transient unavailability, not a config error.
pub struct PrometheusSource {
    config: PrometheusConfig,
    client: reqwest::Client,
}

pub(crate) fn build(spec: &MetricSpec) -> Result<Box<dyn MetricSource>, SourceError> {
    let config: PrometheusConfig = match spec.params_for("prometheus") {
        Some(params) => serde_json::from_value(params.clone())
            .map_err(|e| SourceError::Config(format!("prometheus block: {}", e)))?,
        None => PrometheusConfig::default(),
    };

    let mut headers = reqwest::header::HeaderMap::new();
    for (name, value) in &config.headers {
        let name = reqwest::header::HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| SourceError::Config(format!("header '{}': {}", name, e)))?;
        let value = reqwest::header::HeaderValue::from_str(value)
            .map_err(|e| SourceError::Config(format!("header value: {}", e)))?;
        headers.insert(name, value);
    }

    let client = reqwest::Client::builder()
        .timeout(SAMPLE_DEADLINE)
        .default_headers(headers)
        .build()
        .map_err(|e| SourceError::Config(e.to_string()))?;

    Ok(Box::new(PrometheusSource { config, client }))
}

impl PrometheusSource {
    async fn query_scalar(&self, query: &str) -> Result<f64, SourceError> {
        let url = format!(
            "{}/api/v1/query",
            self.config.server_url.trim_end_matches('/')
        );
        let response = self
            .client
            .get(&url)
            .query(&[("query", query)])
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(format!("prometheus query: {}", e)))?;

        if !response.status().is_success() {
            return Err(SourceError::Unavailable(format!(
                "prometheus returned status {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SourceError::Unavailable(format!("prometheus response: {}", e)))?;
        parse_query_response(&body)
    }
}

/// Extract a single scalar from a Prometheus query API response body.
fn parse_query_response(body: &serde_json::Value) -> Result<f64, SourceError> {
    if body["status"] != "success" {
        return Err(SourceError::Unavailable(format!(
            "prometheus query failed: {}",
            body["error"].as_str().unwrap_or("unknown error")
        )));
    }

    let data = &body["data"];
    let value = match data["resultType"].as_str() {
        Some("scalar") => &data["result"][1],
        Some("vector") => {
            let series = data["result"]
                .as_array()
                .ok_or_else(|| SourceError::Unavailable("malformed vector result".into()))?;
            match series.len() {
                0 => {
                    return Err(SourceError::Unavailable(
                        "prometheus query returned no results".into(),
                    ));
                }
                1 => &series[0]["value"][1],
                n => {
                    return Err(SourceError::Unavailable(format!(
                        "prometheus query returned {} series, expected a scalar",
                        n
                    )));
                }
            }
        }
        other => {
            return Err(SourceError::Unavailable(format!(
                "non-scalar result type {:?}",
                other.unwrap_or("missing")
            )));
        }
    };

    let parsed = match value {
        serde_json::Value::String(s) => s.parse::<f64>().ok(),
        serde_json::Value::Number(n) => n.as_f64(),
        _ => None,
    };
    parsed.ok_or_else(|| SourceError::Unavailable(format!("unparsable sample value {}", value)))
}

#[async_trait]
impl MetricSource for PrometheusSource {
    fn name(&self) -> &str {
        "prometheus"
    }

    async fn validate(&self) -> Result<(), SourceError> {
        if self.config.query.is_empty() {
            return Err(SourceError::Config("prometheus query is required".into()));
        }
        if self.config.server_url.is_empty() {
            return Err(SourceError::Config(
                "prometheus serverUrl is required".into(),
            ));
        }
        reqwest::Url::parse(&self.config.server_url)
            .map_err(|e| SourceError::Config(format!("prometheus serverUrl: {}", e)))?;
        Ok(())
    }

    async fn sample(&self) -> Result<MetricReading, SourceError> {
        let value = checked_value(self.query_scalar(&self.config.query).await?)?;

        let mut reading = MetricReading::of(value);
        if let Some(query) = &self.config.latency_query {
            match self.query_scalar(query).await {
                Ok(v) => reading.latency_ms = Some(v),
                Err(e) => warn!("latency side query failed, degrading: {}", e),
            }
        }
        if let Some(query) = &self.config.error_rate_query {
            match self.query_scalar(query).await {
                Ok(v) => reading.error_rate = Some(v),
                Err(e) => warn!("error-rate side query failed, degrading: {}", e),
            }
        }
        debug!("prometheus sample: {:?}", reading);
        Ok(reading)
    }

    async fn close(&self) {
        // The HTTP client pools connections internally; dropping is enough.
    }
}
