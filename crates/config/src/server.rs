//! HTTP server configuration settings.

use std::time::Duration;

use serde::{Deserialize, Deserializer};

/// HTTP server configuration settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Interface the server binds to.
    pub host: String,
    /// TCP port the server listens on.
    pub port: u16,
    /// Total per-request deadline in seconds. The deadline is idle-based for
    /// streaming responses: receipt of any upstream byte pushes it forward.
    #[serde(deserialize_with = "duration_secs")]
    pub timeout: Duration,
    /// Per-attempt TCP/TLS connect timeout in seconds.
    #[serde(deserialize_with = "duration_secs")]
    pub connect_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            timeout: Duration::from_secs(180),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

fn duration_secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = u64::deserialize(deserializer)?;
    Ok(Duration::from_secs(secs))
}
