use crate::error::{LimiterError, Result};
use crate::rate_limit::limiter::DEFAULT_HISTORY_CAPACITY;
use crate::rate_limit::types::{RateLimitCategory, RateLimitPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Main ratekeeper configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Stats server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Per-category policy overrides; omitted categories keep their defaults
    #[serde(default)]
    pub limits: BTreeMap<RateLimitCategory, RateLimitPolicy>,
    /// Grant timestamps kept per category
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// Expose Prometheus metrics on `/metrics`
    #[serde(default = "default_true")]
    pub metrics: bool,
    /// Outbound HTTP client configuration
    #[serde(default)]
    pub client: ClientConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Outbound client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// User-Agent sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Retries after a 429, transport error or 5xx
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay between retries, multiplied by the attempt number
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Largest attachment `download` will accept
    #[serde(default = "default_max_download_bytes")]
    pub max_download_bytes: u64,
}

fn default_true() -> bool {
    true
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8090
}

fn default_timeout() -> u64 {
    10
}

fn default_user_agent() -> String {
    concat!("ratekeeper/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_max_download_bytes() -> u64 {
    25 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            user_agent: default_user_agent(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            max_download_bytes: default_max_download_bytes(),
        }
    }
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            limits: BTreeMap::new(),
            history_capacity: default_history_capacity(),
            metrics: true,
            client: ClientConfig::default(),
        }
    }
}

impl LimiterConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| LimiterError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| LimiterError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        for (category, policy) in &self.limits {
            policy.validate(*category)?;
        }

        if self.history_capacity == 0 {
            return Err(LimiterError::Config(
                "history_capacity must be > 0".to_string(),
            ));
        }

        if self.client.timeout_secs == 0 {
            return Err(LimiterError::Config(
                "client timeout_secs must be > 0".to_string(),
            ));
        }

        if self.client.max_download_bytes == 0 {
            return Err(LimiterError::Config(
                "client max_download_bytes must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Effective policy for a category after overrides
    pub fn policy(&self, category: RateLimitCategory) -> RateLimitPolicy {
        self.limits
            .get(&category)
            .copied()
            .unwrap_or_else(|| RateLimitPolicy::default_for(category))
    }
}
