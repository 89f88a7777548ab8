use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::Config;
use crate::domain::models::Repository;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid workers: {0}. Must be at least 1")]
    InvalidWorkers(usize),

    #[error("Invalid throttle threshold: {0}. Must be in [0, 1)")]
    InvalidThreshold(f64),

    #[error("Invalid throttle window: must be at least one second")]
    InvalidWindow,

    #[error("Invalid repository: {0:?}. Expected owner/name")]
    InvalidRepository(String),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid rate limit: {0}. Must be positive")]
    InvalidRateLimit(u32),

    #[error("Invalid burst_size: {0}. Must be at least 1")]
    InvalidBurstSize(u32),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must be less than max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),
}

/// Project configuration file, created by operators.
pub const CONFIG_FILE: &str = ".stagehand/config.yaml";

/// Local overrides, not meant to be shared.
pub const LOCAL_CONFIG_FILE: &str = ".stagehand/local.yaml";

/// Prefix of environment overrides, `__` separating nested keys.
pub const ENV_PREFIX: &str = "STAGEHAND_";

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .stagehand/config.yaml, or `path` when given
    /// 3. .stagehand/local.yaml (optional)
    /// 4. Environment variables (`STAGEHAND_*`, highest priority)
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let main = path.unwrap_or_else(|| Path::new(CONFIG_FILE));
        let config: Config = Self::figment(main)
            .extract()
            .with_context(|| format!("Failed to load configuration from {}", main.display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn figment(main: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(main))
            .merge(Yaml::file(LOCAL_CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.workers == 0 {
            return Err(ConfigError::InvalidWorkers(config.workers));
        }

        let threshold = config.throttle.threshold;
        if !(0.0..1.0).contains(&threshold) {
            return Err(ConfigError::InvalidThreshold(threshold));
        }
        if config.throttle.window_secs == 0 {
            return Err(ConfigError::InvalidWindow);
        }

        if let Some(slug) = config
            .repositories
            .iter()
            .find(|slug| Repository::parse(slug).is_err())
        {
            return Err(ConfigError::InvalidRepository(slug.clone()));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        if config.rate_limit.requests_per_second == 0 {
            return Err(ConfigError::InvalidRateLimit(config.rate_limit.requests_per_second));
        }
        if config.rate_limit.burst_size == 0 {
            return Err(ConfigError::InvalidBurstSize(config.rate_limit.burst_size));
        }

        if config.retry.initial_backoff_ms >= config.retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                config.retry.initial_backoff_ms,
                config.retry.max_backoff_ms,
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn config_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{content}").unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_default_config_is_valid() {
        ConfigLoader::validate(&Config::default()).expect("Default config should be valid");
    }

    #[test]
    fn test_validate_zero_workers() {
        let config = Config {
            workers: 0,
            ..Default::default()
        };
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidWorkers(0))
        ));
    }

    #[test]
    fn test_validate_threshold() {
        let mut config = Config::default();
        config.throttle.threshold = 1.0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidThreshold(_))
        ));

        config.throttle.threshold = -0.1;
        assert!(ConfigLoader::validate(&config).is_err());

        config.throttle.threshold = 0.25;
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn test_validate_repositories() {
        let mut config = Config::default();
        config.repositories = vec!["owner/repo".to_string(), "not-a-slug".to_string()];
        match ConfigLoader::validate(&config) {
            Err(ConfigError::InvalidRepository(slug)) => assert_eq!(slug, "not-a-slug"),
            other => panic!("Expected InvalidRepository, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "verbose".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogLevel(level)) if level == "verbose"
        ));
    }

    #[test]
    fn test_validate_invalid_backoff() {
        let mut config = Config::default();
        config.retry.initial_backoff_ms = 30_000;
        config.retry.max_backoff_ms = 10_000;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidBackoff(30_000, 10_000))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let file = config_file("workers: 2\nrepositories: [owner/repo]\njenkins:\n  url: https://ci\n");

        temp_env::with_vars_unset(["STAGEHAND_WORKERS", "STAGEHAND_JENKINS__URL"], || {
            let config = ConfigLoader::load(Some(file.path())).unwrap();
            assert_eq!(config.workers, 2);
            assert_eq!(config.repositories, vec!["owner/repo"]);
            assert_eq!(config.jenkins.url, "https://ci");
            assert_eq!(config.spec_file, "jenkins.yml");
        });
    }

    #[test]
    fn test_env_overrides_file() {
        let file = config_file("workers: 2\nlogging:\n  level: info\n  format: json\n");

        temp_env::with_vars(
            [
                ("STAGEHAND_WORKERS", Some("8")),
                ("STAGEHAND_LOGGING__LEVEL", Some("debug")),
                ("STAGEHAND_DRY_RUN", Some("true")),
            ],
            || {
                let config = ConfigLoader::load(Some(file.path())).unwrap();
                assert_eq!(config.workers, 8, "Environment should win");
                assert!(config.dry_run);
                assert_eq!(config.logging.level, "debug", "Nested keys use __");
                assert_eq!(
                    config.logging.format,
                    crate::domain::models::LogFormat::Json,
                    "File value should persist when not overridden"
                );
            },
        );
    }

    #[test]
    fn test_load_rejects_invalid() {
        let file = config_file("workers: 0\n");
        temp_env::with_var_unset("STAGEHAND_WORKERS", || {
            assert!(ConfigLoader::load(Some(file.path())).is_err());
        });
    }
}
