//! Adapters for the ports: file and SQLite persistence, and mock
//! capabilities for tests and dry runs.

pub mod file;
pub mod mock;
pub mod sqlite;
