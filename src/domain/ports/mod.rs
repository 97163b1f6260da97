//! Port trait definitions (Hexagonal Architecture)
//!
//! Async traits for the capabilities a brain consumes and the stores it
//! persists to:
//! - CompletionClient / SkillExecutor: injected, possibly non-deterministic calls
//! - MemoryRepository: append-only memory records
//! - GraphRepository: the graph with its accumulated statistics
//! - RunArchive: per-run audit trail and final state
//! - EvolutionLog: proposals, applied changes and evolution cycles
//!
//! Volatile or no-op implementations sit next to each trait.

pub mod completion;
pub mod evolution_log;
pub mod graph_repository;
pub mod memory_repository;
pub mod run_archive;
pub mod skill_executor;

pub use completion::CompletionClient;
pub use evolution_log::{EvolutionLog, InMemoryEvolutionLog};
pub use graph_repository::GraphRepository;
pub use memory_repository::{InMemoryMemoryRepository, MemoryRepository};
pub use run_archive::{InMemoryRunArchive, NullRunArchive, RunArchive};
pub use skill_executor::SkillExecutor;
