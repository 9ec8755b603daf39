//! Engine configuration
//!
//! Every field has a default, so an empty JSON object is a valid
//! configuration. Configuration only tunes ambient concerns (pooled buffer
//! geometry, the size model used for cache admission, log verbosity); it
//! never changes formula results.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::observability::{log_event_with_fields, Event, Logger, Severity};
use crate::performance::{BufferPoolConfig, MemoryLayout, SharedBufferPool};

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Get the error code
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::Io { .. } => "CATALOG_CONFIG_IO",
            ConfigError::Parse(_) => "CATALOG_CONFIG_PARSE",
            ConfigError::Invalid(_) => "CATALOG_CONFIG_INVALID",
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Lines below this severity are dropped
    #[serde(default = "default_min_severity")]
    pub min_severity: Severity,
}

fn default_min_severity() -> Severity {
    Severity::Info
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            min_severity: default_min_severity(),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Scratch buffers used by bitmap batch iteration
    #[serde(default)]
    pub buffer_pool: BufferPoolConfig,

    /// Size model used by cache admission estimates
    #[serde(default)]
    pub memory_layout: MemoryLayout,

    /// Log verbosity
    #[serde(default)]
    pub log: LogConfig,
}

impl EngineConfig {
    /// Parse a configuration from JSON text and validate it.
    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Create config with a custom batch size
    pub fn with_batch_size(buffer_size: usize) -> Self {
        Self {
            buffer_pool: BufferPoolConfig {
                buffer_size,
                ..BufferPoolConfig::default()
            },
            ..Self::default()
        }
    }

    /// Check the values serde cannot constrain.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.buffer_pool.buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "buffer_pool.buffer_size must be positive".to_string(),
            ));
        }
        if !matches!(self.memory_layout.reference_size, 4 | 8) {
            return Err(ConfigError::Invalid(format!(
                "memory_layout.reference_size must be 4 or 8, got {}",
                self.memory_layout.reference_size
            )));
        }
        Ok(())
    }

    /// Install this configuration process-wide.
    ///
    /// The buffer pool geometry only takes effect if no formula has been
    /// computed yet; returns whether it did.
    pub fn apply(&self) -> bool {
        Logger::set_min_severity(self.log.min_severity);
        MemoryLayout::install(self.memory_layout);
        let pool_installed = SharedBufferPool::install_global(self.buffer_pool);

        log_event_with_fields(
            Event::ConfigApplied,
            &[
                ("buffer_size", &self.buffer_pool.buffer_size.to_string()),
                ("pool_installed", if pool_installed { "true" } else { "false" }),
                ("min_severity", self.log.min_severity.as_str()),
            ],
        );
        pool_installed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.buffer_pool.buffer_size, 512);
        assert_eq!(config.memory_layout, MemoryLayout::DEFAULT);
        assert_eq!(config.log.min_severity, Severity::Info);
    }

    #[test]
    fn test_empty_object_uses_defaults() {
        let config = EngineConfig::from_json_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_partial_config() {
        let config = EngineConfig::from_json_str(
            r#"{"buffer_pool": {"buffer_size": 128}, "log": {"min_severity": "WARN"}}"#,
        )
        .unwrap();
        assert_eq!(config.buffer_pool.buffer_size, 128);
        assert_eq!(config.buffer_pool.max_pooled, 64);
        assert_eq!(config.log.min_severity, Severity::Warn);
        assert_eq!(config.memory_layout, MemoryLayout::DEFAULT);
    }

    #[test]
    fn test_with_batch_size() {
        let config = EngineConfig::with_batch_size(32);
        assert_eq!(config.buffer_pool.buffer_size, 32);
        assert_eq!(config.log, LogConfig::default());
    }

    #[test]
    fn test_zero_buffer_size_rejected() {
        let err = EngineConfig::from_json_str(r#"{"buffer_pool": {"buffer_size": 0}}"#)
            .unwrap_err();
        assert_eq!(err.code(), "CATALOG_CONFIG_INVALID");
    }

    #[test]
    fn test_odd_reference_size_rejected() {
        let err = EngineConfig::from_json_str(r#"{"memory_layout": {"reference_size": 6}}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_malformed_json() {
        let err = EngineConfig::from_json_str("{buffer_pool:").unwrap_err();
        assert_eq!(err.code(), "CATALOG_CONFIG_PARSE");
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"memory_layout": {{"reference_size": 8}}}}"#).unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.memory_layout.reference_size, 8);
        assert_eq!(config.memory_layout.object_header, 16);
    }

    #[test]
    fn test_apply_default_config() {
        EngineConfig::default().apply();
        assert_eq!(MemoryLayout::current(), MemoryLayout::DEFAULT);
        assert_eq!(Logger::min_severity(), Severity::Info);
        assert_eq!(SharedBufferPool::global().buffer_size(), 512);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = EngineConfig::from_file(dir.path().join("absent.json")).unwrap_err();
        assert_eq!(err.code(), "CATALOG_CONFIG_IO");
        assert!(err.to_string().contains("absent.json"));
    }
}
