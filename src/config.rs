//! Runtime configuration for the transaction kit.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::batch::DEFAULT_MAX_COUNT;
use crate::locking::{IsolationLevel, LockWaitStrategy, NoWaitStrategy, TimeoutWaitStrategy};

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// How a conflicting lock request is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitStrategyKind {
    /// Park until the holder releases or the timeout elapses.
    #[default]
    Timeout,
    /// Fail at once.
    NoWait,
}

/// Lock wait settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockWaitConfig {
    pub strategy: WaitStrategyKind,
    /// Upper bound on the time one lock acquisition spends waiting, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for LockWaitConfig {
    fn default() -> Self {
        Self {
            strategy: WaitStrategyKind::Timeout,
            timeout_ms: 5_000,
        }
    }
}

/// Statement batching settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub enabled: bool,
    /// Queued statements before an automatic flush.
    pub max_count: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_count: DEFAULT_MAX_COUNT,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OjbConfig {
    pub lock_wait: LockWaitConfig,
    pub batch: BatchConfig,
    /// Isolation for classes whose metadata names none.
    pub default_isolation: IsolationLevel,
}

impl OjbConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a JSON document. Missing fields take defaults.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the wait strategy.
    pub fn wait_strategy(mut self, strategy: WaitStrategyKind) -> Self {
        self.lock_wait.strategy = strategy;
        self
    }

    /// Set the lock wait timeout.
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_wait.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Enable or disable statement batching.
    pub fn batching(mut self, enabled: bool) -> Self {
        self.batch.enabled = enabled;
        self
    }

    /// Set the automatic flush threshold.
    pub fn max_batch_count(mut self, max_count: usize) -> Self {
        self.batch.max_count = max_count;
        self
    }

    /// Set the default isolation level.
    pub fn default_isolation(mut self, level: IsolationLevel) -> Self {
        self.default_isolation = level;
        self
    }

    /// Reject settings no component can run with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.batch.max_count == 0 {
            return Err(ConfigError::Invalid("batch.max_count must be positive".into()));
        }
        if self.lock_wait.strategy == WaitStrategyKind::Timeout && self.lock_wait.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "lock_wait.timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Lock wait timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.lock_wait.timeout_ms)
    }

    /// Instantiate the configured wait strategy.
    pub fn build_wait_strategy(&self) -> Arc<dyn LockWaitStrategy> {
        match self.lock_wait.strategy {
            WaitStrategyKind::Timeout => Arc::new(TimeoutWaitStrategy::new(self.timeout())),
            WaitStrategyKind::NoWait => Arc::new(NoWaitStrategy),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OjbConfig::default();
        assert_eq!(config.lock_wait.strategy, WaitStrategyKind::Timeout);
        assert_eq!(config.batch.max_count, 100);
        assert!(config.batch.enabled);
        assert_eq!(config.default_isolation, IsolationLevel::ReadUncommitted);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = OjbConfig::new()
            .wait_strategy(WaitStrategyKind::NoWait)
            .lock_timeout(Duration::from_millis(250))
            .batching(false)
            .max_batch_count(10)
            .default_isolation(IsolationLevel::Serializable);

        assert_eq!(config.lock_wait.strategy, WaitStrategyKind::NoWait);
        assert_eq!(config.timeout(), Duration::from_millis(250));
        assert!(!config.batch.enabled);
        assert_eq!(config.batch.max_count, 10);
        assert_eq!(config.default_isolation, IsolationLevel::Serializable);
    }

    #[test]
    fn test_from_json_partial() {
        let config = OjbConfig::from_json(
            r#"{"lock_wait": {"timeout_ms": 50}, "default_isolation": "REPEATABLE_READ"}"#,
        )
        .unwrap();
        assert_eq!(config.lock_wait.timeout_ms, 50);
        assert_eq!(config.lock_wait.strategy, WaitStrategyKind::Timeout);
        assert_eq!(config.batch, BatchConfig::default());
        assert_eq!(config.default_isolation, IsolationLevel::RepeatableRead);
    }

    #[test]
    fn test_validate() {
        assert!(matches!(
            OjbConfig::from_json(r#"{"batch": {"max_count": 0}}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            OjbConfig::from_json(r#"{"lock_wait": {"timeout_ms": 0}}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(OjbConfig::from_json(r#"{"lock_wait": {"strategy": "no_wait", "timeout_ms": 0}}"#)
            .is_ok());
        assert!(matches!(OjbConfig::from_json("{"), Err(ConfigError::Parse(_))));
    }
}
