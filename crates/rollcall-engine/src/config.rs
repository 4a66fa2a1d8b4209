use rollcall_store::RetryPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::engine::DEFAULT_MATCH_THRESHOLD;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Deployment configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Path to the SQLite roster database shared by all sessions.
    pub db_path: PathBuf,
    /// Maximum descriptor distance accepted as the same face.
    pub match_threshold: f32,
    /// How often observers poll the roster.
    pub poll_interval: Duration,
    /// Attempts per roster write before giving up with a conflict.
    pub max_write_attempts: u32,
    /// Upper bound of the random pause between write attempts.
    pub retry_backoff: Duration,
}

/// On-disk form; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    db_path: Option<PathBuf>,
    match_threshold: Option<f32>,
    poll_interval_ms: Option<u64>,
    max_write_attempts: Option<u32>,
    retry_backoff_ms: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        Self {
            db_path: data_dir.join("roster.db"),
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            poll_interval: rollcall_store::DEFAULT_POLL_INTERVAL,
            max_write_attempts: RetryPolicy::default().max_attempts,
            retry_backoff: RetryPolicy::default().backoff,
        }
    }
}

impl Config {
    /// Load configuration: defaults, then the TOML file named by
    /// `ROLLCALL_CONFIG` (if set), then `ROLLCALL_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let base = match std::env::var("ROLLCALL_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        base.with_env_overrides().validated()
    }

    /// Defaults overlaid with `ROLLCALL_*` environment variables only.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides().validated()
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let file: FileConfig = toml::from_str(text)?;
        let defaults = Self::default();
        Self {
            db_path: file.db_path.unwrap_or(defaults.db_path),
            match_threshold: file.match_threshold.unwrap_or(defaults.match_threshold),
            poll_interval: file
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            max_write_attempts: file.max_write_attempts.unwrap_or(defaults.max_write_attempts),
            retry_backoff: file
                .retry_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_backoff),
        }
        .validated()
    }

    fn with_env_overrides(self) -> Self {
        Self {
            db_path: std::env::var("ROLLCALL_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(self.db_path),
            match_threshold: env_f32("ROLLCALL_MATCH_THRESHOLD", self.match_threshold),
            poll_interval: Duration::from_millis(env_u64(
                "ROLLCALL_POLL_INTERVAL_MS",
                self.poll_interval.as_millis() as u64,
            )),
            max_write_attempts: env_u32("ROLLCALL_MAX_WRITE_ATTEMPTS", self.max_write_attempts),
            retry_backoff: Duration::from_millis(env_u64(
                "ROLLCALL_RETRY_BACKOFF_MS",
                self.retry_backoff.as_millis() as u64,
            )),
        }
    }

    fn validated(self) -> Result<Self, ConfigError> {
        if !self.match_threshold.is_finite() || self.match_threshold <= 0.0 {
            return Err(ConfigError::Invalid {
                key: "match_threshold",
                reason: format!("must be a positive number, got {}", self.match_threshold),
            });
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "poll_interval_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if self.max_write_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "max_write_attempts",
                reason: "must be at least 1".into(),
            });
        }
        Ok(self)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_write_attempts,
            backoff: self.retry_backoff,
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.match_threshold, 0.6);
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.max_write_attempts, 3);
        assert!(config.db_path.ends_with("rollcall/roster.db"));
    }

    #[test]
    fn test_file_overrides() {
        let config = Config::from_toml_str(
            r#"
            db_path = "/srv/rollcall/web.db"
            match_threshold = 0.45
            poll_interval_ms = 1000
            max_write_attempts = 5
            retry_backoff_ms = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.db_path, PathBuf::from("/srv/rollcall/web.db"));
        assert_eq!(config.match_threshold, 0.45);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(
            config.retry_policy(),
            RetryPolicy {
                max_attempts: 5,
                backoff: Duration::ZERO,
            }
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = Config::from_toml_str("match_threshold = -1.0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "match_threshold", .. }));
        let err = Config::from_toml_str("max_write_attempts = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "max_write_attempts", .. }));
        let err = Config::from_toml_str("poll_interval_ms = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "poll_interval_ms", .. }));
    }

    // Only test that touches ROLLCALL_* variables.
    #[test]
    fn test_env_overrides_are_validated() {
        std::env::set_var("ROLLCALL_MATCH_THRESHOLD", "0.4");
        std::env::set_var("ROLLCALL_POLL_INTERVAL_MS", "1500");
        let config = Config::from_env().unwrap();
        assert_eq!(config.match_threshold, 0.4);
        assert_eq!(config.poll_interval, Duration::from_millis(1500));

        std::env::set_var("ROLLCALL_MATCH_THRESHOLD", "-1");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "match_threshold", .. }));

        std::env::remove_var("ROLLCALL_MATCH_THRESHOLD");
        std::env::set_var("ROLLCALL_MAX_WRITE_ATTEMPTS", "0");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "max_write_attempts", .. }));

        std::env::remove_var("ROLLCALL_MAX_WRITE_ATTEMPTS");
        std::env::remove_var("ROLLCALL_POLL_INTERVAL_MS");
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(matches!(
            Config::from_toml_str("threshold = 0.5"),
            Err(ConfigError::Parse(_))
        ));
    }
}
