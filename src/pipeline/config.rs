//! Pipeline configuration for the orchestrator.
//!
//! Covers the revision-loop defaults, the retry policy and the sizes of the
//! log and progress channels.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Upper bound on retries per stage; more than this only delays failure.
const MAX_RETRIES_LIMIT: u32 = 10;

/// Configuration for the pipeline orchestrator.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    // Revision loop settings
    /// Writer/SEO/QA rounds when the job does not set `max_iterations`.
    pub default_max_iterations: u32,
    /// Target length when neither the job nor research supplies one.
    pub default_word_count: u32,

    // Retry settings
    /// Extra attempts per stage after the first one fails transiently.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each subsequent retry.
    pub retry_base_delay: Duration,

    // Channel settings
    /// Pending step-log entries buffered before new ones are dropped.
    pub log_buffer_capacity: usize,
    /// Progress events buffered per subscriber.
    pub progress_channel_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_max_iterations: 3,
            default_word_count: 1500,

            max_retries: 2,
            retry_base_delay: Duration::from_millis(2000),

            log_buffer_capacity: 1024,
            progress_channel_capacity: 256,
        }
    }
}

impl PipelineConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `ARTICLE_FORGE_DEFAULT_MAX_ITERATIONS`: Revision rounds (default: 3)
    /// - `ARTICLE_FORGE_DEFAULT_WORD_COUNT`: Fallback target length (default: 1500)
    /// - `ARTICLE_FORGE_MAX_RETRIES`: Retries per stage (default: 2)
    /// - `ARTICLE_FORGE_RETRY_BASE_DELAY_MS`: First retry delay (default: 2000)
    /// - `ARTICLE_FORGE_LOG_BUFFER_CAPACITY`: Step-log buffer size (default: 1024)
    /// - `ARTICLE_FORGE_PROGRESS_CHANNEL_CAPACITY`: Progress buffer size (default: 256)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is unparseable or the result fails
    /// validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(val) = lookup("ARTICLE_FORGE_DEFAULT_MAX_ITERATIONS") {
            config.default_max_iterations =
                parse_env_value(&val, "ARTICLE_FORGE_DEFAULT_MAX_ITERATIONS")?;
        }

        if let Some(val) = lookup("ARTICLE_FORGE_DEFAULT_WORD_COUNT") {
            config.default_word_count = parse_env_value(&val, "ARTICLE_FORGE_DEFAULT_WORD_COUNT")?;
        }

        if let Some(val) = lookup("ARTICLE_FORGE_MAX_RETRIES") {
            config.max_retries = parse_env_value(&val, "ARTICLE_FORGE_MAX_RETRIES")?;
        }

        if let Some(val) = lookup("ARTICLE_FORGE_RETRY_BASE_DELAY_MS") {
            let millis: u64 = parse_env_value(&val, "ARTICLE_FORGE_RETRY_BASE_DELAY_MS")?;
            config.retry_base_delay = Duration::from_millis(millis);
        }

        if let Some(val) = lookup("ARTICLE_FORGE_LOG_BUFFER_CAPACITY") {
            config.log_buffer_capacity =
                parse_env_value(&val, "ARTICLE_FORGE_LOG_BUFFER_CAPACITY")?;
        }

        if let Some(val) = lookup("ARTICLE_FORGE_PROGRESS_CHANNEL_CAPACITY") {
            config.progress_channel_capacity =
                parse_env_value(&val, "ARTICLE_FORGE_PROGRESS_CHANNEL_CAPACITY")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_max_iterations == 0 {
            return Err(ConfigError::ValidationFailed(
                "default_max_iterations must be greater than 0".to_string(),
            ));
        }

        if self.default_word_count == 0 {
            return Err(ConfigError::ValidationFailed(
                "default_word_count must be greater than 0".to_string(),
            ));
        }

        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(ConfigError::ValidationFailed(format!(
                "max_retries cannot exceed {}",
                MAX_RETRIES_LIMIT
            )));
        }

        if self.log_buffer_capacity == 0 {
            return Err(ConfigError::ValidationFailed(
                "log_buffer_capacity must be greater than 0".to_string(),
            ));
        }

        if self.progress_channel_capacity == 0 {
            return Err(ConfigError::ValidationFailed(
                "progress_channel_capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn with_default_max_iterations(mut self, iterations: u32) -> Self {
        self.default_max_iterations = iterations;
        self
    }

    pub fn with_default_word_count(mut self, words: u32) -> Self {
        self.default_word_count = words;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    pub fn with_log_buffer_capacity(mut self, capacity: usize) -> Self {
        self.log_buffer_capacity = capacity;
        self
    }

    pub fn with_progress_channel_capacity(mut self, capacity: usize) -> Self {
        self.progress_channel_capacity = capacity;
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}
