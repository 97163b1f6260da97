use std::path::Path;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Project directory holding `config.yaml` and `local.yaml`.
pub const CONFIG_DIR: &str = ".brainstem";

/// Prefix of environment overrides; nested keys split on `__`.
pub const ENV_PREFIX: &str = "BRAINSTEM_";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_steps: {0}. Must be at least 1")]
    InvalidMaxSteps(u32),

    #[error("Invalid max_parallel: {0}. Must be at least 1")]
    InvalidMaxParallel(usize),

    #[error("Invalid audit_flush_interval: {0}. Must be at least 1")]
    InvalidAuditFlushInterval(u32),

    #[error("Invalid min_confidence: {0}. Must be between 0 and 1")]
    InvalidMinConfidence(f64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Storage root cannot be empty")]
    EmptyStorageRoot,
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .brainstem/config.yaml
    /// 3. .brainstem/local.yaml (optional local overrides)
    /// 4. Environment variables (BRAINSTEM_* prefix)
    pub fn load() -> Result<Config> {
        Self::load_from_dir(Path::new(CONFIG_DIR))
    }

    /// Same as [`ConfigLoader::load`] with the config directory given explicitly.
    pub fn load_from_dir(dir: &Path) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file over the defaults
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let execution = &config.execution;
        if execution.max_steps == 0 {
            return Err(ConfigError::InvalidMaxSteps(execution.max_steps));
        }
        if execution.max_parallel == 0 {
            return Err(ConfigError::InvalidMaxParallel(execution.max_parallel));
        }
        if execution.audit_flush_interval == 0 {
            return Err(ConfigError::InvalidAuditFlushInterval(execution.audit_flush_interval));
        }

        let min_confidence = config.learning.min_confidence;
        if !(0.0..=1.0).contains(&min_confidence) {
            return Err(ConfigError::InvalidMinConfidence(min_confidence));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        if config.storage.root.as_os_str().is_empty() {
            return Err(ConfigError::EmptyStorageRoot);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{LearningMode, MemoryBackend, RunOutcome};
    use std::io::Write;
    use std::path::PathBuf;

    #[test]
    fn test_default_config_is_valid() {
        ConfigLoader::validate(&Config::default()).unwrap();
    }

    #[test]
    fn test_validate_zero_max_steps() {
        let mut config = Config::default();
        config.execution.max_steps = 0;
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidMaxSteps(0))));
    }

    #[test]
    fn test_validate_zero_max_parallel() {
        let mut config = Config::default();
        config.execution.max_parallel = 0;
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidMaxParallel(0))));
    }

    #[test]
    fn test_validate_min_confidence_range() {
        let mut config = Config::default();
        config.learning.min_confidence = 1.5;
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidMinConfidence(_))));
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        match ConfigLoader::validate(&config) {
            Err(ConfigError::InvalidLogLevel(level)) => assert_eq!(level, "loud"),
            other => panic!("Expected InvalidLogLevel error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_empty_storage_root() {
        let mut config = Config::default();
        config.storage.root = PathBuf::new();
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::EmptyStorageRoot)));
    }

    #[test]
    fn test_local_overrides_project_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.yaml"),
            "execution:\n  max_steps: 40\n  max_parallel: 2\nlearning:\n  mode: suggest_only\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("local.yaml"), "execution:\n  max_steps: 60\n").unwrap();

        let config = ConfigLoader::load_from_dir(dir.path()).unwrap();
        assert_eq!(config.execution.max_steps, 60, "local should win");
        assert_eq!(config.execution.max_parallel, 2, "project value should persist");
        assert_eq!(config.learning.mode, LearningMode::SuggestOnly);
        assert_eq!(config.execution.audit_flush_interval, 10, "defaults fill the rest");
    }

    #[test]
    fn test_env_overrides_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.yaml"), "execution:\n  max_steps: 40\n").unwrap();

        temp_env::with_vars(
            [
                ("BRAINSTEM_EXECUTION__MAX_STEPS", Some("7")),
                ("BRAINSTEM_STORAGE__MEMORY_BACKEND", Some("sqlite")),
                ("BRAINSTEM_LOGGING__LEVEL", Some("debug")),
            ],
            || {
                let config = ConfigLoader::load_from_dir(dir.path()).unwrap();
                assert_eq!(config.execution.max_steps, 7);
                assert_eq!(config.storage.memory_backend, MemoryBackend::Sqlite);
                assert_eq!(config.logging.level, "debug");
            },
        );
    }

    #[test]
    fn test_env_value_failing_validation() {
        let dir = tempfile::tempdir().unwrap();
        temp_env::with_var("BRAINSTEM_EXECUTION__MAX_PARALLEL", Some("0"), || {
            let err = ConfigLoader::load_from_dir(dir.path()).unwrap_err();
            assert!(err.to_string().contains("max_parallel"));
        });
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "execution:\n  terminal_outcomes:\n    needs_review: escalated\nstorage:\n  root: /tmp/brain"
        )
        .unwrap();
        file.flush().unwrap();

        let config = ConfigLoader::load_from_file(file.path()).unwrap();
        assert_eq!(config.execution.terminal_outcomes.get("needs_review"), Some(&RunOutcome::Escalated));
        assert_eq!(config.storage.root, PathBuf::from("/tmp/brain"));
        assert_eq!(config.execution.max_steps, 100);
    }
}
