// src/config.rs

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::algorithms::Algorithm;

/// Engine configuration. Every field has a serde default so partial
/// documents (or `Default::default()`) yield a working limiter against a
/// local store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Connection endpoint for the backing store
    #[serde(default = "default_store_url")]
    pub store_url: String,

    /// Prefix prepended to every derived key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Algorithm used when a check does not name one
    #[serde(default = "default_algorithm")]
    pub default_algorithm: Algorithm,

    /// Upper bound on concurrent in-flight store calls
    #[serde(default = "default_pool_max")]
    pub pool_max: u32,

    /// Per-call timeout on the store
    #[serde(default = "default_call_timeout", with = "duration_ms")]
    pub call_timeout: Duration,

    /// Timeout for the initial connection handshake
    #[serde(default = "default_connect_timeout", with = "duration_ms")]
    pub connect_timeout: Duration,

    /// Emit a structured event per decision (the exporter is external)
    #[serde(default)]
    pub metrics_enabled: bool,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            store_url: default_store_url(),
            key_prefix: default_key_prefix(),
            default_algorithm: default_algorithm(),
            pool_max: default_pool_max(),
            call_timeout: default_call_timeout(),
            connect_timeout: default_connect_timeout(),
            metrics_enabled: false,
        }
    }
}

fn default_store_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_key_prefix() -> String {
    "ratelimit".to_string()
}

fn default_algorithm() -> Algorithm {
    Algorithm::FixedWindow
}

fn default_pool_max() -> u32 {
    50
}

fn default_call_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(2)
}

// Helper module to serialize/deserialize Duration as milliseconds
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config: RateLimiterConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.store_url, "redis://localhost:6379");
        assert_eq!(config.key_prefix, "ratelimit");
        assert_eq!(config.default_algorithm, Algorithm::FixedWindow);
        assert_eq!(config.pool_max, 50);
        assert_eq!(config.call_timeout, Duration::from_secs(5));
        assert!(!config.metrics_enabled);
    }

    #[test]
    fn timeouts_round_trip_as_millis() {
        let config: RateLimiterConfig = serde_json::from_str(
            r#"{"call_timeout": 1500, "default_algorithm": "sliding_window"}"#,
        )
        .unwrap();
        assert_eq!(config.call_timeout, Duration::from_millis(1500));
        assert_eq!(config.default_algorithm, Algorithm::SlidingWindow);

        let json = serde_json::to_string(&config).unwrap();
        let back: RateLimiterConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.call_timeout, Duration::from_millis(1500));
    }
}
