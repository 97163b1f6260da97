//! Domain layer for brainstem
//!
//! Graph, run state, memory and evolution models, the guard expression
//! language, and the ports the services depend on.

pub mod errors;
pub mod expression;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult};
