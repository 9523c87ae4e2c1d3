use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the upload gateway
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Buffering thresholds and upload limits
    #[serde(default)]
    pub storage: StorageConfig,
    /// Gemini Files API configuration
    #[serde(default)]
    pub relay: RelayConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_host")]
    pub host: String,
    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory served as static assets
    #[serde(default = "default_public_dir")]
    pub public_dir: PathBuf,
    /// Directory holding disk buffers and temp artifacts
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: PathBuf,
    /// Browser origins allowed to call the gateway
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

/// Buffering thresholds and upload limits
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Usage ratio above which uploads are buffered on disk
    #[serde(default = "default_memory_threshold")]
    pub memory_threshold: f64,
    /// Declared size above which uploads are buffered on disk
    #[serde(default = "default_disk_fallback_size")]
    pub disk_fallback_size_bytes: u64,
    /// Maximum accepted file size
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: u64,
    /// Maximum files per request
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

/// Gemini Files API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Provider API key (from GOOGLE_API_KEY)
    #[serde(default)]
    pub api_key: Option<String>,
    /// API base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Client-side bound on a single upload call
    #[serde(default = "default_relay_timeout_secs")]
    pub timeout_secs: u64,
}

/// Buffer on disk once host memory usage exceeds 80%.
pub const MEMORY_THRESHOLD: f64 = 0.80;

/// Buffer on disk once the declared size exceeds 15 MiB.
pub const DISK_FALLBACK_SIZE: u64 = 15 * 1024 * 1024;

/// Largest file accepted by the receiver (50 MiB).
pub const MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Relay calls are abandoned after three minutes.
pub const RELAY_TIMEOUT_SECS: u64 = 180;

// Default value functions
fn default_service_name() -> String {
    "upload-gateway".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_public_dir() -> PathBuf {
    PathBuf::from("public")
}

fn default_uploads_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://127.0.0.1:3000".to_string(),
    ]
}

fn default_memory_threshold() -> f64 {
    MEMORY_THRESHOLD
}

fn default_disk_fallback_size() -> u64 {
    DISK_FALLBACK_SIZE
}

fn default_max_file_size() -> u64 {
    MAX_FILE_SIZE
}

fn default_max_files() -> usize {
    1
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_relay_timeout_secs() -> u64 {
    RELAY_TIMEOUT_SECS
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Add config file if present
            .add_source(config::File::with_name("config/gateway").required(false))
            .add_source(config::File::with_name("/etc/gateway/gateway").required(false))
            // Override with environment variables
            // GATEWAY__SERVER__PORT -> server.port
            .add_source(
                config::Environment::with_prefix("GATEWAY")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("server.cors_origins"),
            )
            // The provider key keeps its conventional name
            .set_override_option("relay.api_key", std::env::var("GOOGLE_API_KEY").ok())?
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject threshold values that would make the selector meaningless
    pub fn validate(&self) -> anyhow::Result<()> {
        let threshold = self.storage.memory_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            anyhow::bail!("storage.memory_threshold must be in (0, 1], got {threshold}");
        }
        if self.storage.disk_fallback_size_bytes == 0 {
            anyhow::bail!("storage.disk_fallback_size_bytes must be positive");
        }
        if self.storage.max_file_size_bytes == 0 {
            anyhow::bail!("storage.max_file_size_bytes must be positive");
        }
        if self.storage.max_files == 0 {
            anyhow::bail!("storage.max_files must be at least 1");
        }
        if self.relay.timeout_secs == 0 {
            anyhow::bail!("relay.timeout_secs must be positive");
        }
        Ok(())
    }

    /// Get relay timeout as Duration
    pub fn relay_timeout(&self) -> Duration {
        Duration::from_secs(self.relay.timeout_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_dir: default_public_dir(),
            uploads_dir: default_uploads_dir(),
            cors_origins: default_cors_origins(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            memory_threshold: default_memory_threshold(),
            disk_fallback_size_bytes: default_disk_fallback_size(),
            max_file_size_bytes: default_max_file_size(),
            max_files: default_max_files(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            timeout_secs: default_relay_timeout_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.storage.memory_threshold, 0.80);
        assert_eq!(config.storage.disk_fallback_size_bytes, 15_728_640);
        assert_eq!(config.storage.max_file_size_bytes, 52_428_800);
        assert_eq!(config.storage.max_files, 1);
        assert_eq!(config.relay_timeout(), Duration::from_secs(180));
        assert!(config.relay.api_key.is_none());
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.storage.memory_threshold = 1.5;
        assert!(config.validate().is_err());

        config.storage.memory_threshold = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut config = Config::default();
        config.storage.max_file_size_bytes = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.relay.timeout_secs = 0;
        assert!(config.validate().is_err());
    }
}
