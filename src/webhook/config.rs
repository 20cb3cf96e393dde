//! Webhook Configuration
//!
//! Defines configuration types for both notifiers. A config is cloned into
//! the notifier at construction and never mutated afterwards.

use crate::webhook::transport::TransportError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Error produced when building or validating a configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A field has an unusable value
    Invalid(String),
    /// TOML or environment value could not be parsed
    Parse(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid(msg) => write!(f, "Invalid webhook config: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Failed to parse webhook config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Retry policy for single-operation deliveries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one (default: 3)
    pub max_attempts: u32,
    /// Fixed delay between attempts (default: 1s)
    #[serde(with = "duration_millis")]
    pub delay: Duration,
    /// Abandon after the first attempt on errors another attempt cannot fix,
    /// such as most 4xx statuses (default: false, every failure is retried)
    pub stop_on_permanent: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_secs(1),
            stop_on_permanent: false,
        }
    }
}

impl RetryPolicy {
    /// Whether a failed attempt number `attempt` should be followed by another
    pub fn should_retry(&self, attempt: u32, error: &TransportError) -> bool {
        attempt < self.max_attempts && (!self.stop_on_permanent || error.is_retryable())
    }
}

/// Batching thresholds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Idle time after the last mutation before the batch is flushed (default: 5s)
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
    /// Estimated payload size that forces an immediate flush (default: 1MB)
    pub size_limit_bytes: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            timeout: Duration::from_secs(5),
            size_limit_bytes: 1024 * 1024, // 1MB
        }
    }
}

/// Main webhook configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Endpoint base URL. Per-path URLs append the store path verbatim.
    pub base_url: String,
    /// Per-request timeout for the HTTP client (default: 10s)
    #[serde(with = "duration_millis")]
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub batch: BatchConfig,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        WebhookConfig {
            base_url: String::new(),
            request_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            batch: BatchConfig::default(),
        }
    }
}

impl WebhookConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        WebhookConfig {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Configuration for tests (short timers, fast retries)
    pub fn test(base_url: impl Into<String>) -> Self {
        WebhookConfig {
            base_url: base_url.into(),
            request_timeout: Duration::from_secs(1),
            retry: RetryPolicy {
                max_attempts: 3,
                delay: Duration::from_millis(10),
                stop_on_permanent: false,
            },
            batch: BatchConfig {
                timeout: Duration::from_millis(100),
                size_limit_bytes: 1000,
            },
        }
    }

    pub fn with_batch(mut self, timeout: Duration, size_limit_bytes: usize) -> Self {
        self.batch = BatchConfig {
            timeout,
            size_limit_bytes,
        };
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, delay: Duration) -> Self {
        self.retry.max_attempts = max_attempts;
        self.retry.delay = delay;
        self
    }

    pub fn with_stop_on_permanent(mut self, stop: bool) -> Self {
        self.retry.stop_on_permanent = stop;
        self
    }

    /// Parse from TOML. Missing fields take their defaults.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: WebhookConfig =
            toml::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `WEBHOOK_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = WebhookConfig::default();
        if let Ok(url) = std::env::var("WEBHOOK_BASE_URL") {
            config.base_url = url;
        }
        if let Some(ms) = env_parse::<u64>("WEBHOOK_REQUEST_TIMEOUT_MS")? {
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(attempts) = env_parse::<u32>("WEBHOOK_RETRY_MAX_ATTEMPTS")? {
            config.retry.max_attempts = attempts;
        }
        if let Some(ms) = env_parse::<u64>("WEBHOOK_RETRY_DELAY_MS")? {
            config.retry.delay = Duration::from_millis(ms);
        }
        if let Some(stop) = env_parse::<bool>("WEBHOOK_RETRY_STOP_ON_PERMANENT")? {
            config.retry.stop_on_permanent = stop;
        }
        if let Some(ms) = env_parse::<u64>("WEBHOOK_BATCH_TIMEOUT_MS")? {
            config.batch.timeout = Duration::from_millis(ms);
        }
        if let Some(bytes) = env_parse::<usize>("WEBHOOK_BATCH_SIZE_LIMIT_BYTES")? {
            config.batch.size_limit_bytes = bytes;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.is_empty() {
            return Err(ConfigError::Invalid("base_url must not be empty".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if self.batch.timeout.is_zero() {
            return Err(ConfigError::Invalid("batch.timeout must be non-zero".into()));
        }
        if self.batch.size_limit_bytes == 0 {
            return Err(ConfigError::Invalid("batch.size_limit_bytes must be non-zero".into()));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Parse(format!("{}={:?}", name, raw))),
        Err(_) => Ok(None),
    }
}

/// Serde helper for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
