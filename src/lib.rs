//! brainstem - deterministic graph execution for LLM workflows
//!
//! A brain is a directed graph of typed nodes joined by guarded, prioritized
//! edges. The controller walks the graph one node at a time: it executes the
//! node against injected capabilities, merges the output into run state, and
//! follows the first edge whose guard holds. Runs read and write a versioned
//! memory store, and their statistics feed a learning engine that proposes
//! (and optionally applies) changes to the graph.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, the guard expression language, and ports
//! - **Service Layer** (`services`): controller, memory store, parallel executor, learning and evolution
//! - **Adapters** (`adapters`): file and SQLite persistence, mock capabilities
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use brainstem::adapters::file::YamlGraphRepository;
//! use brainstem::adapters::mock::{MockCompletionClient, MockSkillExecutor};
//! use brainstem::{BrainController, Config, GraphRepository, MemoryStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let graph = YamlGraphRepository::new("brain.yaml").load().await?;
//!     let mut controller = BrainController::new(
//!         graph,
//!         Arc::new(MemoryStore::in_memory()),
//!         Arc::new(MockCompletionClient::new()),
//!     )
//!     .with_skills(Arc::new(MockSkillExecutor::new()))
//!     .with_config(Config::default().execution);
//!     let result = controller.run("Find three suppliers", None).await?;
//!     println!("{}", result.outcome.as_str());
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{
    Config, Edge, EdgeKind, Fact, Graph, LearningMode, MemoryQuery, MemoryRecord, Node, NodeKind, Proposal,
    RunOutcome, RunResult, RunState,
};
pub use domain::ports::{CompletionClient, EvolutionLog, GraphRepository, MemoryRepository, RunArchive, SkillExecutor};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{BrainController, EvolutionEngine, LearningEngine, MemoryStore, ParallelExecutor};
