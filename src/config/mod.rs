//! Configuration module for Servio.

use crate::error::{Result, ServioError};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for a Servio gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServioConfig {
    /// Request server configuration.
    pub server: ServerConfig,
    /// Servable registry configuration.
    pub registry: RegistryConfig,
    /// Inference runtime configuration.
    pub runtime: RuntimeConfig,
    /// Observability configuration.
    pub observability: ObservabilityConfig,
}

impl ServioConfig {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServioError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| ServioError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.registry.model_root.as_os_str().is_empty() {
            return Err(ServioError::InvalidConfig {
                field: "registry.model_root".to_string(),
                reason: "Model root directory must be set".to_string(),
            });
        }

        if self.runtime.max_concurrent == 0 {
            return Err(ServioError::InvalidConfig {
                field: "runtime.max_concurrent".to_string(),
                reason: "Concurrency limit must be non-zero".to_string(),
            });
        }

        if self.runtime.batching.enabled && self.runtime.batching.max_batch_size == 0 {
            return Err(ServioError::InvalidConfig {
                field: "runtime.batching.max_batch_size".to_string(),
                reason: "Batch size must be non-zero when batching is enabled".to_string(),
            });
        }

        Ok(())
    }

    /// Create a minimal development configuration.
    pub fn development() -> Self {
        Self {
            server: ServerConfig {
                bind_addr: "127.0.0.1:5500".parse().expect("valid socket address"),
                request_timeout: Duration::from_secs(30),
                max_request_size: 32 * 1024 * 1024,
                rate_limit: None,
            },
            registry: RegistryConfig {
                model_root: PathBuf::from("/tmp/servio/models"),
                max_versions: 10,
                validate_on_load: true,
                max_artifact_size: 4 * 1024 * 1024 * 1024,
            },
            runtime: RuntimeConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Request server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind the serving API.
    pub bind_addr: SocketAddr,
    /// Request timeout.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Maximum request body size in bytes.
    pub max_request_size: usize,
    /// Optional rate limiting.
    #[serde(default)]
    pub rate_limit: Option<RateLimitSettings>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5500".parse().expect("valid socket address"),
            request_timeout: Duration::from_secs(30),
            max_request_size: 32 * 1024 * 1024, // 32MB
            rate_limit: None,
        }
    }
}

/// Rate limit settings for the serving API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Maximum requests per window.
    pub max_requests: u64,
    /// Time window.
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    /// Burst allowance on top of the steady rate.
    pub burst: u64,
    /// Track limits per client instead of globally.
    #[serde(default)]
    pub per_client: bool,
}

/// Servable registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Root directory holding `<model_name>/<version>/<artifact>` trees.
    pub model_root: PathBuf,
    /// Maximum versions to keep active per model; older versions are archived.
    pub max_versions: usize,
    /// Verify artifacts (existence, size, fingerprint) when loading.
    pub validate_on_load: bool,
    /// Maximum artifact size in bytes.
    pub max_artifact_size: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            model_root: PathBuf::from("/var/lib/servio/models"),
            max_versions: 10,
            validate_on_load: true,
            max_artifact_size: 10 * 1024 * 1024 * 1024, // 10GB
        }
    }
}

/// Inference runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Maximum concurrent inference requests.
    pub max_concurrent: usize,
    /// Default per-request timeout.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Dynamic batching policy.
    #[serde(default)]
    pub batching: BatchingConfig,
    /// Execution device.
    #[serde(default)]
    pub device: DeviceConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 100,
            request_timeout: Duration::from_secs(30),
            batching: BatchingConfig::default(),
            device: DeviceConfig::default(),
        }
    }
}

/// Dynamic batching policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchingConfig {
    /// Enable dynamic batching.
    pub enabled: bool,
    /// Maximum requests per batch.
    pub max_batch_size: usize,
    /// Maximum time a request may wait in the batch queue.
    #[serde(with = "humantime_serde")]
    pub max_queue_delay: Duration,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_batch_size: 32,
            max_queue_delay: Duration::from_millis(50),
        }
    }
}

/// Execution device configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device kind to bind model graphs to.
    pub kind: DeviceKind,
    /// Device ordinal (for multi-accelerator hosts).
    pub device_id: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            kind: DeviceKind::Cpu,
            device_id: 0,
        }
    }
}

/// Execution device kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Cpu,
    Gpu,
    Npu,
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics.
    pub metrics_enabled: bool,
    /// Metrics bind address.
    pub metrics_addr: SocketAddr,
    /// Log level.
    pub log_level: String,
    /// Enable JSON logging.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            metrics_addr: "0.0.0.0:9090".parse().expect("valid socket address"),
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Serde helper for Duration using humantime format.
pub mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}ms", duration.as_millis()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string())
        } else if let Some(s_val) = s.strip_suffix('s') {
            s_val
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| e.to_string())
        } else if let Some(m) = s.strip_suffix('m') {
            m.parse::<u64>()
                .map(|v| Duration::from_secs(v * 60))
                .map_err(|e| e.to_string())
        } else {
            s.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServioConfig::default();
        assert_eq!(config.server.bind_addr.port(), 5500);
        assert!(config.observability.metrics_enabled);
    }

    #[test]
    fn test_development_config() {
        let config = ServioConfig::development();
        assert!(config.validate().is_ok());
        assert_eq!(config.registry.max_versions, 10);
    }

    #[test]
    fn test_validation_rejects_zero_concurrency() {
        let mut config = ServioConfig::development();
        config.runtime.max_concurrent = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_batch_size() {
        let mut config = ServioConfig::development();
        config.runtime.batching.enabled = true;
        config.runtime.batching.max_batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duration_roundtrip() {
        let config = ServioConfig::development();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: ServioConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.server.request_timeout, Duration::from_secs(30));
    }
}
