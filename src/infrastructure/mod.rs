//! Infrastructure layer module
//!
//! - Configuration management (figment)
//! - Logging (tracing-subscriber, tracing-appender)

pub mod config;
pub mod logging;
