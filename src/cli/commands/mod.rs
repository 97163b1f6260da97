//! CLI command implementations.

pub mod evolution;
pub mod graph;
pub mod memory;
pub mod runs;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::adapters::file::{FileRunArchive, JsonlEvolutionLog, JsonlMemoryRepository};
use crate::adapters::sqlite::{initialize_memory_database, SqliteMemoryRepository};
use crate::domain::models::{Config, MemoryBackend};
use crate::domain::ports::MemoryRepository;
use crate::services::MemoryStore;

/// Open the memory store on the configured backend.
pub async fn open_memory(config: &Config) -> Result<MemoryStore> {
    let repository: Arc<dyn MemoryRepository> = match config.storage.memory_backend {
        MemoryBackend::Jsonl => Arc::new(JsonlMemoryRepository::new(config.storage.memory_path())),
        MemoryBackend::Sqlite => {
            let pool = initialize_memory_database(&config.storage.root)
                .await
                .context("Failed to initialize memory database")?;
            Arc::new(SqliteMemoryRepository::new(pool))
        }
    };
    MemoryStore::open(repository)
        .await
        .with_context(|| format!("Failed to open memory at {}", config.storage.memory_path().display()))
}

pub fn evolution_log(config: &Config) -> JsonlEvolutionLog {
    JsonlEvolutionLog::new(config.storage.evolution_dir())
}

pub fn run_archive(config: &Config) -> FileRunArchive {
    FileRunArchive::new(config.storage.runs_dir())
}
