//! Configuration loading
//!
//! figment layers defaults, project YAML files and `BRAINSTEM_` environment
//! variables into one validated [`Config`](crate::domain::models::Config).

pub mod loader;

pub use loader::{ConfigError, ConfigLoader, CONFIG_DIR, ENV_PREFIX};
