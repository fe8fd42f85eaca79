//! Store configuration

use serde::Deserialize;

use crate::error::ModelError;
use crate::logger::{ActionLogConfig, ActionLoggerConfig, ActionLoggerMiddleware};

/// Settings for a [`ModelStore`](crate::store::ModelStore).
///
/// Every field has a default, so `{}` is a valid document.
///
/// ```
/// use model_dispatch_core::StoreConfig;
///
/// let config = StoreConfig::from_json(r#"{
///     "logger": { "include_patterns": ["counter.*"] },
///     "action_log_capacity": 50
/// }"#).unwrap();
/// assert!(config.logger.should_log("counter.increment"));
/// assert_eq!(config.action_log_capacity, Some(50));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Which dispatches are traced and recorded.
    pub logger: ActionLoggerConfig,
    /// Keep this many recent dispatches in memory. Off when absent.
    pub action_log_capacity: Option<usize>,
}

impl StoreConfig {
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        serde_json::from_str(json).map_err(|err| ModelError::InvalidConfig(err.to_string()))
    }

    pub fn with_logger(mut self, logger: ActionLoggerConfig) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_action_log(mut self, capacity: usize) -> Self {
        self.action_log_capacity = Some(capacity);
        self
    }

    /// Action logger middleware described by this config.
    pub(crate) fn logger_middleware(&self) -> ActionLoggerMiddleware {
        match self.action_log_capacity {
            Some(capacity) => {
                ActionLoggerMiddleware::with_log(ActionLogConfig::new(capacity, self.logger.clone()))
            }
            None => ActionLoggerMiddleware::new(self.logger.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = StoreConfig::from_json("{}").unwrap();
        assert_eq!(config, StoreConfig::default());
        assert!(config.logger_middleware().log().is_none());
    }

    #[test]
    fn test_action_log_enabled_by_capacity() {
        let config = StoreConfig::default().with_action_log(5);
        let log = config.logger_middleware().log().unwrap();
        assert_eq!(log.lock().config().capacity, 5);
    }

    #[test]
    fn test_exclude_patterns() {
        let config = StoreConfig::from_json(r#"{"logger": {"exclude_patterns": ["*.tick"]}}"#).unwrap();
        assert!(!config.logger.should_log("clock.tick"));
        assert!(config.logger.should_log("clock.reset"));
    }

    #[test]
    fn test_malformed_document() {
        let err = StoreConfig::from_json(r#"{"action_log_capacity": "lots"}"#).unwrap_err();
        assert!(matches!(err, ModelError::InvalidConfig(_)));
    }
}
