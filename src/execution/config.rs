//! Interpreter configuration.

use crate::execution::error::ConfigError;
use std::time::Duration;

/// What a Task does when its `Resource` has no registered handler.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UnknownResourcePolicy {
    /// Fail the attempt with `States.TaskFailed`
    #[default]
    Fail,
    /// Return the effective input as the task result
    Echo,
}

/// Interpreter-wide settings.
#[derive(Clone, Debug, PartialEq)]
pub struct InterpreterConfig {
    pub(crate) map_concurrency_limit: Option<usize>,
    pub(crate) time_scale: f64,
    pub(crate) unknown_resource: UnknownResourcePolicy,
}

impl InterpreterConfig {
    pub fn builder() -> InterpreterConfigBuilder {
        InterpreterConfigBuilder::new()
    }

    pub fn map_concurrency_limit(&self) -> Option<usize> {
        self.map_concurrency_limit
    }

    pub fn time_scale(&self) -> f64 {
        self.time_scale
    }

    pub fn unknown_resource(&self) -> UnknownResourcePolicy {
        self.unknown_resource
    }

    /// Worker-pool size for a Map state declaring `max_concurrency`.
    ///
    /// `0` means unbounded in the definition; the configured limit, if
    /// any, still applies. The result is never 0.
    pub fn map_pool_size(&self, max_concurrency: usize, items: usize) -> usize {
        let declared = if max_concurrency == 0 {
            items
        } else {
            max_concurrency.min(items)
        };
        let bounded = match self.map_concurrency_limit {
            Some(limit) => declared.min(limit),
            None => declared,
        };
        bounded.max(1)
    }

    /// Scale a Wait or retry delay.
    pub fn scale(&self, delay: Duration) -> Duration {
        if self.time_scale == 1.0 {
            delay
        } else {
            Duration::try_from_secs_f64(delay.as_secs_f64() * self.time_scale)
                .unwrap_or(Duration::MAX)
        }
    }
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            map_concurrency_limit: None,
            time_scale: 1.0,
            unknown_resource: UnknownResourcePolicy::Fail,
        }
    }
}

/// Builder for [`InterpreterConfig`].
///
/// # Example
///
/// ```rust
/// use stepwise::execution::{InterpreterConfig, UnknownResourcePolicy};
///
/// let config = InterpreterConfig::builder()
///     .map_concurrency_limit(8)
///     .time_scale(0.0)
///     .unknown_resource(UnknownResourcePolicy::Echo)
///     .build()
///     .unwrap();
///
/// assert_eq!(config.map_concurrency_limit(), Some(8));
/// assert!(InterpreterConfig::builder().time_scale(-1.0).build().is_err());
/// ```
#[derive(Debug, Default)]
pub struct InterpreterConfigBuilder {
    config: InterpreterConfig,
}

impl InterpreterConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap Map worker pools, including Maps with no `MaxConcurrency`.
    pub fn map_concurrency_limit(mut self, limit: usize) -> Self {
        self.config.map_concurrency_limit = Some(limit);
        self
    }

    /// Multiplier applied to Wait and retry delays
    pub fn time_scale(mut self, scale: f64) -> Self {
        self.config.time_scale = scale;
        self
    }

    pub fn unknown_resource(mut self, policy: UnknownResourcePolicy) -> Self {
        self.config.unknown_resource = policy;
        self
    }

    pub fn build(self) -> Result<InterpreterConfig, ConfigError> {
        let config = self.config;
        if !config.time_scale.is_finite() || config.time_scale < 0.0 {
            return Err(ConfigError::InvalidTimeScale(config.time_scale));
        }
        if config.map_concurrency_limit == Some(0) {
            return Err(ConfigError::ZeroConcurrencyLimit);
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = InterpreterConfigBuilder::new().build().unwrap();
        assert_eq!(config, InterpreterConfig::default());
        assert_eq!(config.unknown_resource(), UnknownResourcePolicy::Fail);
        assert_eq!(config.time_scale(), 1.0);
    }

    #[test]
    fn rejects_bad_time_scale() {
        assert!(matches!(
            InterpreterConfig::builder().time_scale(f64::NAN).build(),
            Err(ConfigError::InvalidTimeScale(_))
        ));
        assert!(InterpreterConfig::builder().time_scale(-0.5).build().is_err());
    }

    #[test]
    fn rejects_zero_limit() {
        assert!(matches!(
            InterpreterConfig::builder().map_concurrency_limit(0).build(),
            Err(ConfigError::ZeroConcurrencyLimit)
        ));
    }

    #[test]
    fn pool_size_respects_declared_and_configured_limits() {
        let unbounded = InterpreterConfig::default();
        assert_eq!(unbounded.map_pool_size(0, 5), 5);
        assert_eq!(unbounded.map_pool_size(2, 5), 2);
        assert_eq!(unbounded.map_pool_size(10, 3), 3);
        assert_eq!(unbounded.map_pool_size(0, 0), 1);

        let limited = InterpreterConfig::builder()
            .map_concurrency_limit(4)
            .build()
            .unwrap();
        assert_eq!(limited.map_pool_size(0, 10), 4);
        assert_eq!(limited.map_pool_size(2, 10), 2);
    }

    #[test]
    fn scale_multiplies_delays() {
        let config = InterpreterConfig::builder().time_scale(0.5).build().unwrap();
        assert_eq!(config.scale(Duration::from_secs(4)), Duration::from_secs(2));
        let instant = InterpreterConfig::builder().time_scale(0.0).build().unwrap();
        assert_eq!(instant.scale(Duration::from_secs(4)), Duration::ZERO);
    }
}
