//! Engine Configuration
//!
//! Tunables for the connection pool and schema cache. Defaults match the
//! server-variable defaults the engine ships with.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Storage engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum pooled connections per distinct connection target
    pub max_connections: usize,
    /// Client connect / server selection timeout
    pub connect_timeout: Duration,
    /// Idle pooled connections older than this are reaped on acquire
    pub idle_timeout: Duration,
    /// Inferred schemas are served from cache for this long
    pub schema_cache_ttl: Duration,
    /// Documents sampled per inference run
    pub schema_sample_size: u32,
    /// Disabling the cache forces re-inference on every dynamic-schema access
    pub enable_schema_cache: bool,
    /// Application name reported to the server
    pub app_name: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(60),
            schema_cache_ttl: Duration::from_secs(300),
            schema_sample_size: 100,
            enable_schema_cache: true,
            app_name: Some("mongobridge".to_string()),
        }
    }
}

impl EngineConfig {
    /// Validate the configuration before building a runtime from it.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_connections == 0 || self.max_connections > 100 {
            return Err(EngineError::Internal(
                "max_connections must be between 1 and 100".to_string(),
            ));
        }
        if self.schema_sample_size == 0 {
            return Err(EngineError::Internal(
                "schema_sample_size must be at least 1".to_string(),
            ));
        }
        if self.schema_cache_ttl.is_zero() {
            return Err(EngineError::Internal(
                "schema_cache_ttl must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.schema_sample_size, 100);
        assert_eq!(config.schema_cache_ttl, Duration::from_secs(300));
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut config = EngineConfig::default();
        config.max_connections = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.max_connections = 500;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.schema_sample_size = 0;
        assert!(config.validate().is_err());
    }
}
