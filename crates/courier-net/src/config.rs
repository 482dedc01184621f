//! Client configuration.
//!
//! Configuration can be built in code or loaded from TOML:
//!
//! ```toml
//! user_agent = "my-app/1.0"
//! worker_threads = 4
//! max_redirects = 5
//!
//! [pool]
//! ceiling_ms = 50
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Engine-wide settings shared by every request of an execution context.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// User agent sent with every request.
    pub user_agent: String,
    /// Worker threads of the transfer runtime.
    pub worker_threads: usize,
    /// Maximum number of redirects followed when redirects are enabled.
    pub max_redirects: usize,
    /// Event loop timing of the transfer pool.
    pub pool: PoolTiming,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("courier/{} (Rust)", env!("CARGO_PKG_VERSION")),
            worker_threads: 2,
            max_redirects: 10,
            pool: PoolTiming::default(),
        }
    }
}

impl ClientConfig {
    /// Parse configuration from TOML text. Missing fields take defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threads == 0 {
            return Err(ConfigError::InvalidValue {
                field: "worker_threads",
                message: "must be at least 1".to_string(),
            });
        }
        if self.pool.refresh_threshold_ms >= self.pool.ceiling_ms {
            return Err(ConfigError::InvalidValue {
                field: "pool.refresh_threshold_ms",
                message: "must be below pool.ceiling_ms".to_string(),
            });
        }
        Ok(())
    }
}

/// How the transfer pool bounds the event loop's wait.
///
/// An engine deadline hint at or below `refresh_threshold` is treated as
/// "act now"; hints below `ceiling` bound the wait directly; everything else
/// waits exactly `ceiling`. `poll` bounds the readiness check performed when the
/// loop wakes without a pending refresh.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolTiming {
    /// Hints at or below this many milliseconds request an immediate refresh.
    pub refresh_threshold_ms: u64,
    /// Upper bound on the wait, in milliseconds.
    pub ceiling_ms: u64,
    /// Readiness poll, in milliseconds.
    pub poll_ms: u64,
}

impl Default for PoolTiming {
    fn default() -> Self {
        Self {
            refresh_threshold_ms: 2,
            ceiling_ms: 100,
            poll_ms: 1,
        }
    }
}

impl PoolTiming {
    /// The refresh threshold as a duration.
    pub fn refresh_threshold(&self) -> Duration {
        Duration::from_millis(self.refresh_threshold_ms)
    }

    /// The wait ceiling as a duration.
    pub fn ceiling(&self) -> Duration {
        Duration::from_millis(self.ceiling_ms)
    }

    /// The readiness poll as a duration.
    pub fn poll(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.worker_threads, 2);
        assert_eq!(config.pool.ceiling(), Duration::from_millis(100));
        assert_eq!(config.pool.refresh_threshold(), Duration::from_millis(2));
        assert_eq!(config.pool.poll(), Duration::from_millis(1));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ClientConfig::from_toml_str(
            r#"
            max_redirects = 3

            [pool]
            ceiling_ms = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.max_redirects, 3);
        assert_eq!(config.pool.ceiling_ms, 50);
        assert_eq!(config.pool.refresh_threshold_ms, 2);
        assert_eq!(config.worker_threads, 2);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = ClientConfig::from_toml_str("retries = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_invalid_timing_rejected() {
        let err = ClientConfig::from_toml_str("[pool]\nrefresh_threshold_ms = 200").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: "pool.refresh_threshold_ms",
                ..
            }
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "user_agent = \"courier-test/1.0\"").unwrap();
        writeln!(file, "worker_threads = 1").unwrap();

        let config = ClientConfig::from_file(file.path()).unwrap();
        assert_eq!(config.user_agent, "courier-test/1.0");
        assert_eq!(config.worker_threads, 1);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ClientConfig::from_file(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
