use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Controller configuration file (YAML).
///
/// Example `config.yaml`:
/// ```yaml
/// server: http://127.0.0.1:6443
/// token: my-secret-token
/// listen-port: 8081
/// watch-interval-seconds: 10
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerConfigFile {
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default, alias = "listen-port")]
    pub listen_port: Option<u16>,
    #[serde(default, alias = "watch-interval-seconds")]
    pub watch_interval_seconds: Option<u64>,
}

impl ControllerConfigFile {
    /// Read the controller configuration from a YAML file. A missing file is
    /// not an error; the controller then runs on CLI flags and built-in
    /// defaults alone.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("reading config file {}", path));
            }
        };
        serde_yaml::from_str(&content).with_context(|| format!("parsing config file {}", path))
    }
}
