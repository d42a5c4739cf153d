//! Call policy configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RpcError, RpcResult};

/// Configuration record every client and server policy is composed from.
///
/// Every field's zero value means "no override": the substrate default
/// applies. [`RpcConfig::default`] is therefore a no-op configuration and
/// [`RpcConfig::recommended`] is the production preset.
///
/// Deserializes from YAML or JSON with durations as integer milliseconds:
///
/// ```yaml
/// max_attempts: 3
/// timeout_ms: 3000
/// backoff_ms: 2000
/// buffer_size: 1000
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Total attempts per call, including the first. 0 or 1 disables retry.
    pub max_attempts: u32,

    /// Bound on a single attempt. Zero leaves attempts unbounded.
    #[serde(rename = "timeout_ms", with = "millis")]
    pub timeout: Duration,

    /// Delay before each retry.
    #[serde(rename = "backoff_ms", with = "millis")]
    pub backoff: Duration,

    /// Inbound buffer capacity. Zero uses the substrate default.
    pub buffer_size: usize,
}

impl RpcConfig {
    /// Production preset: 3 attempts, 3 s per attempt, 2 s backoff, buffer 1000.
    pub fn recommended() -> Self {
        Self {
            max_attempts: 3,
            timeout: Duration::from_secs(3),
            backoff: Duration::from_secs(2),
            buffer_size: 1000,
        }
    }

    /// Whether every field is at its no-override value.
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    /// Whether any retry-related field overrides the substrate default.
    pub fn has_retry_policy(&self) -> bool {
        self.max_attempts != 0 || !self.timeout.is_zero() || !self.backoff.is_zero()
    }

    /// Set the attempt limit.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry backoff.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the inbound buffer capacity.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Parse a configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Configuration`] if the document is malformed or
    /// has fields of the wrong type.
    pub fn from_yaml(doc: &str) -> RpcResult<Self> {
        serde_yaml::from_str(doc)
            .map_err(|e| RpcError::configuration(format!("invalid rpc config: {e}")))
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_no_override() {
        let config = RpcConfig::default();
        assert!(config.is_default());
        assert!(!config.has_retry_policy());
        assert!(!RpcConfig::recommended().is_default());
    }

    #[test]
    fn test_from_yaml() {
        let config = RpcConfig::from_yaml(
            "max_attempts: 3\ntimeout_ms: 3000\nbackoff_ms: 2000\nbuffer_size: 1000\n",
        )
        .expect("valid yaml");
        assert_eq!(config, RpcConfig::recommended());
    }

    #[test]
    fn test_from_yaml_partial_document() {
        let config = RpcConfig::from_yaml("backoff_ms: 250").expect("valid yaml");
        assert_eq!(config.backoff, Duration::from_millis(250));
        assert_eq!(config.max_attempts, 0);
        assert!(config.has_retry_policy());
    }

    #[test]
    fn test_from_yaml_rejects_bad_types() {
        assert!(matches!(
            RpcConfig::from_yaml("max_attempts: lots"),
            Err(RpcError::Configuration { .. })
        ));
    }
}
