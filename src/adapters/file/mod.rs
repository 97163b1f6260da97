//! File-backed persistence under the storage root.
//!
//! ```text
//! <root>/
//!   graph.yaml
//!   memory.jsonl
//!   runs/<run_id>/audit.jsonl
//!   runs/<run_id>/final_state.json
//!   evolution/proposals.jsonl
//!   evolution/applied.jsonl
//!   evolution/evolution_log.jsonl
//! ```

pub mod evolution_log;
pub mod graph_yaml;
pub mod memory_jsonl;
pub mod run_archive;

pub use evolution_log::JsonlEvolutionLog;
pub use graph_yaml::YamlGraphRepository;
pub use memory_jsonl::JsonlMemoryRepository;
pub use run_archive::FileRunArchive;

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::domain::errors::{DomainError, DomainResult};

fn io_error(path: &Path, err: &std::io::Error) -> DomainError {
    DomainError::Persistence(format!("{}: {err}", path.display()))
}

async fn ensure_parent(path: &Path) -> DomainResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await.map_err(|e| io_error(parent, &e))?;
        }
    }
    Ok(())
}

/// Append values to a JSONL file, one line each.
pub(crate) async fn append_lines<T: Serialize>(path: &Path, values: &[T]) -> DomainResult<()> {
    if values.is_empty() {
        return Ok(());
    }
    ensure_parent(path).await?;

    let mut buffer = String::new();
    for value in values {
        buffer.push_str(&serde_json::to_string(value)?);
        buffer.push('\n');
    }

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| io_error(path, &e))?;
    file.write_all(buffer.as_bytes()).await.map_err(|e| io_error(path, &e))?;
    file.flush().await.map_err(|e| io_error(path, &e))
}

/// Read every line of a JSONL file. A missing file reads as empty; blank
/// lines are skipped.
pub(crate) async fn read_lines<T: DeserializeOwned>(path: &Path) -> DomainResult<Vec<T>> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(io_error(path, &err)),
    };

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(number, line)| {
            serde_json::from_str(line).map_err(|e| {
                DomainError::SerializationError(format!("{}:{}: {e}", path.display(), number + 1))
            })
        })
        .collect()
}

/// Replace a file's contents through a temp file and rename, so readers see
/// either the old or the new contents.
pub(crate) async fn write_atomic(path: &Path, contents: &[u8]) -> DomainResult<()> {
    ensure_parent(path).await?;
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = Path::new(&temp);

    fs::write(temp, contents).await.map_err(|e| io_error(temp, &e))?;
    fs::rename(temp, path).await.map_err(|e| io_error(path, &e))
}
