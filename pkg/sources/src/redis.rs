use async_trait::async_trait;
use pkg_types::intent::MetricSpec;
use serde::Deserialize;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::resp::{Reply, encode_inline, read_reply};
use crate::{MetricReading, MetricSource, SAMPLE_DEADLINE, SourceError, checked_value};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RedisConfig {
    host: String,
    port: u16,
    password: Option<String>,
    db: u32,
    queue_name: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            password: None,
            db: 0,
            queue_name: String::new(),
        }
    }
}

type Conn = BufReader<TcpStream>;

/// Queue-depth probe: the length of a Redis list or sorted set.
///
/// Owns one connection, dialed lazily and re-dialed after any failure.
/// A missing key reads as an empty queue; an unsupported key type is a
/// transient fault, not a crash.
pub struct RedisQueueSource {
    config: RedisConfig,
    conn: Mutex<Option<Conn>>,
}

pub(crate) fn build(spec: &MetricSpec) -> Result<Box<dyn MetricSource>, SourceError> {
    let config: RedisConfig = match spec.params_for("redis") {
        Some(params) => serde_json::from_value(params.clone())
            .map_err(|e| SourceError::Config(format!("redis block: {}", e)))?,
        None => RedisConfig::default(),
    };
    Ok(Box::new(RedisQueueSource {
        config,
        conn: Mutex::new(None),
    }))
}

impl RedisQueueSource {
    async fn command(conn: &mut Conn, parts: &[&str]) -> std::io::Result<Reply> {
        conn.get_mut().write_all(&encode_inline(parts)).await?;
        read_reply(conn).await
    }

    async fn connect(&self) -> std::io::Result<Conn> {
        let stream =
            TcpStream::connect((self.config.host.as_str(), self.config.port)).await?;
        let mut conn = BufReader::new(stream);

        if let Some(password) = &self.config.password {
            match Self::command(&mut conn, &["AUTH", password]).await? {
                Reply::Simple(_) => {}
                reply => {
                    return Err(std::io::Error::other(format!("AUTH failed: {:?}", reply)));
                }
            }
        }
        if self.config.db != 0 {
            let db = self.config.db.to_string();
            match Self::command(&mut conn, &["SELECT", &db]).await? {
                Reply::Simple(_) => {}
                reply => {
                    return Err(std::io::Error::other(format!("SELECT failed: {:?}", reply)));
                }
            }
        }
        Ok(conn)
    }

    /// TYPE then LLEN/ZCARD on the held connection.
    async fn queue_length(&self, conn: &mut Conn) -> Result<f64, SourceError> {
        let queue = self.config.queue_name.as_str();
        let key_type = Self::command(conn, &["TYPE", queue])
            .await
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;

        let length_command = match key_type {
            Reply::Simple(t) if t == "list" => "LLEN",
            Reply::Simple(t) if t == "zset" => "ZCARD",
            Reply::Simple(t) if t == "none" => {
                debug!("redis queue '{}' does not exist, reading as 0", queue);
                return Ok(0.0);
            }
            Reply::Simple(t) => {
                return Err(SourceError::Unavailable(format!(
                    "unsupported redis key type '{}' for '{}'",
                    t, queue
                )));
            }
            reply => {
                return Err(SourceError::Unavailable(format!(
                    "unexpected TYPE reply: {:?}",
                    reply
                )));
            }
        };

        match Self::command(conn, &[length_command, queue])
            .await
            .map_err(|e| SourceError::Unavailable(e.to_string()))?
        {
            Reply::Integer(n) if n >= 0 => Ok(n as f64),
            reply => Err(SourceError::Unavailable(format!(
                "unexpected {} reply: {:?}",
                length_command, reply
            ))),
        }
    }

    async fn sample_inner(&self) -> Result<MetricReading, SourceError> {
        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await.map_err(|e| {
                SourceError::Unavailable(format!(
                    "connect {}:{}: {}",
                    self.config.host, self.config.port, e
                ))
            })?);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(SourceError::Unavailable("connection unavailable".into()));
        };

        match self.queue_length(conn).await {
            Ok(value) => Ok(MetricReading::of(checked_value(value)?)),
            Err(e) => {
                // Discard the connection; the next sample re-dials.
                *guard = None;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl MetricSource for RedisQueueSource {
    fn name(&self) -> &str {
        "redis"
    }

    async fn validate(&self) -> Result<(), SourceError> {
        if self.config.queue_name.is_empty() {
            return Err(SourceError::Config("redis queueName is required".into()));
        }
        if self.config.host.is_empty() {
            return Err(SourceError::Config("redis host is required".into()));
        }
        Ok(())
    }

    async fn sample(&self) -> Result<MetricReading, SourceError> {
        match tokio::time::timeout(SAMPLE_DEADLINE, self.sample_inner()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "redis sample for '{}' exceeded {}s deadline",
                    self.config.queue_name,
                    SAMPLE_DEADLINE.as_secs()
                );
                *self.conn.lock().await = None;
                Err(SourceError::Unavailable("sample deadline exceeded".into()))
            }
        }
    }

    async fn close(&self) {
        let mut guard = self.conn.lock().await;
        if let Some(mut conn) = guard.take() {
            let _ = conn.get_mut().shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_source(queue_name: &str, host: &str) -> RedisQueueSource {
        RedisQueueSource {
            config: RedisConfig {
                host: host.to_string(),
                queue_name: queue_name.to_string(),
                ..RedisConfig::default()
            },
            conn: Mutex::new(None),
        }
    }

    #[tokio::test]
    async fn validate_requires_queue_name() {
        let source = make_source("", "localhost");
        assert!(matches!(
            source.validate().await,
            Err(SourceError::Config(_))
        ));
    }

    #[tokio::test]
    async fn validate_requires_host() {
        let source = make_source("jobs", "");
        assert!(matches!(
            source.validate().await,
            Err(SourceError::Config(_))
        ));
    }

    #[tokio::test]
    async fn validate_accepts_minimal_config() {
        let source = make_source("jobs", "localhost");
        assert!(source.validate().await.is_ok());
    }

    #[tokio::test]
    async fn unreachable_backend_is_unavailable() {
        // Port 1 on loopback: refused immediately, never a redis.
        let mut source = make_source("jobs", "127.0.0.1");
        source.config.port = 1;
        match source.sample().await {
            Err(SourceError::Unavailable(_)) => {}
            other => panic!("expected Unavailable, got {:?}", other.map(|r| r.value)),
        }
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let source = make_source("jobs", "localhost");
        source.close().await;
        source.close().await;
    }

    #[test]
    fn config_parses_camel_case() {
        let config: RedisConfig = serde_json::from_value(serde_json::json!({
            "host": "redis.queue.svc",
            "port": 6380,
            "queueName": "jobs",
            "db": 2,
        }))
        .unwrap();
        assert_eq!(config.host, "redis.queue.svc");
        assert_eq!(config.port, 6380);
        assert_eq!(config.queue_name, "jobs");
        assert_eq!(config.db, 2);
        assert!(config.password.is_none());
    }
}
