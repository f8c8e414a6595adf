//! HTTP server configuration settings.

use std::time::Duration;

use serde::{Deserialize, Deserializer};

/// HTTP server configuration settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// The interface the server binds to.
    pub host: String,
    /// The port the server listens on.
    pub port: u16,
    /// Per-request deadline, reset whenever an upstream byte arrives.
    ///
    /// Accepts either an integer number of seconds or a human-readable
    /// duration string such as `"3m"`.
    #[serde(deserialize_with = "deserialize_timeout")]
    pub timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            timeout: Duration::from_secs(180),
        }
    }
}

fn deserialize_timeout<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Timeout {
        Seconds(u64),
        Human(String),
    }

    match Timeout::deserialize(deserializer)? {
        Timeout::Seconds(secs) => Ok(Duration::from_secs(secs)),
        Timeout::Human(s) => duration_str::parse(&s).map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_accepts_seconds_and_duration_strings() {
        let config: ServerConfig = toml::from_str("timeout = 30").unwrap();
        assert_eq!(config.timeout, Duration::from_secs(30));

        let config: ServerConfig = toml::from_str(r#"timeout = "3m""#).unwrap();
        assert_eq!(config.timeout, Duration::from_secs(180));
    }
}
