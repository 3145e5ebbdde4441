//! Configuration and constants for the query backend.

use super::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Current output schema version
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Node cap applied when a tree query does not specify one
pub const DEFAULT_MAX_NODES: u64 = 16_384;

/// Number of blocks processed concurrently by default
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Name of the implicit root frame of every stack trace tree
pub const ROOT_NODE_NAME: &str = "root";

/// Deepest call path a tree may hold, in frames below the root
pub const MAX_STACK_DEPTH: usize = 4096;

// Column names of the profiles table (repeated sample columns are nested lists)
pub const COLUMN_SERIES_INDEX: &str = "SeriesIndex";
pub const COLUMN_TIME_NANOS: &str = "TimeNanos";
pub const COLUMN_PARTITION: &str = "Partition";
pub const COLUMN_STACKTRACE_ID: &str = "Samples.list.element.StacktraceID";
pub const COLUMN_VALUE: &str = "Samples.list.element.Value";

/// Runtime configuration of a [`QueryBackend`](crate::backend::QueryBackend)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Maximum number of blocks queried in parallel
    pub max_concurrency: usize,

    /// Return best-effort reports when some blocks fail
    pub tolerate_partial_results: bool,

    /// Optional per-invocation deadline in milliseconds
    pub timeout_ms: Option<u64>,

    /// Node cap used by the CLI when none is given
    pub default_max_nodes: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            tolerate_partial_results: false,
            timeout_ms: None,
            default_max_nodes: DEFAULT_MAX_NODES,
        }
    }
}

impl BackendConfig {
    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrency must be greater than 0".to_string(),
            ));
        }
        if self.timeout_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "timeout_ms must be greater than 0 when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Load backend configuration from a TOML file
///
/// Missing keys fall back to [`BackendConfig::default`].
///
/// # Errors
/// * `ConfigError::Io` - If file cannot be read
/// * `ConfigError::Parse` - If TOML is invalid
/// * `ConfigError::Invalid` - If values are out of range
///
/// # Example
/// ```ignore
/// let config = load_config("backend.toml")?;
/// ```
pub fn load_config(path: impl AsRef<Path>) -> Result<BackendConfig, ConfigError> {
    let contents = fs::read_to_string(path)?;
    let config: BackendConfig = toml::from_str(&contents)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_partial_file_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "tolerate_partial_results = true").unwrap();
        writeln!(file, "timeout_ms = 2500").unwrap();

        let config = load_config(file.path()).unwrap();

        assert!(config.tolerate_partial_results);
        assert_eq!(config.timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(config.max_concurrency, DEFAULT_MAX_CONCURRENCY);
        assert_eq!(config.default_max_nodes, DEFAULT_MAX_NODES);
    }

    #[test]
    fn test_load_config_rejects_zero_concurrency() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "max_concurrency = 0").unwrap();

        assert!(matches!(
            load_config(file.path()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "max_concurrency = [").unwrap();

        assert!(matches!(load_config(file.path()), Err(ConfigError::Parse(_))));
    }
}
