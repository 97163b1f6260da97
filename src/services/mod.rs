//! Services: the engine proper.
//!
//! - `controller`: executes a graph step by step
//! - `memory_store`: versioned facts with conflict detection
//! - `parallel_executor`: bounded fan-out of skill tasks
//! - `learning_engine` / `evolution_engine`: graph self-tuning from run history

pub mod controller;
pub mod evolution_engine;
pub mod learning_engine;
pub mod memory_store;
pub mod parallel_executor;
pub mod template;

pub use controller::BrainController;
pub use evolution_engine::{EvolutionEngine, EvolutionReport};
pub use learning_engine::LearningEngine;
pub use memory_store::MemoryStore;
pub use parallel_executor::{ParallelExecutor, ParallelExecutorConfig};
