//! Logging infrastructure
//!
//! Structured logging using tracing and tracing-subscriber, with an optional
//! rolling JSON file next to the terminal output.

pub mod logger;

pub use logger::LoggerImpl;
