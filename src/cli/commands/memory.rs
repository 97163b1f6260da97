//! Memory CLI commands.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;
use uuid::Uuid;

use super::open_memory;
use crate::cli::output::{output, short_id, table, truncate, CommandOutput};
use crate::domain::models::{Config, MemoryQuery, MemoryRecord, MemoryStats};
use crate::services::MemoryStore;

#[derive(Args, Debug)]
pub struct MemoryArgs {
    #[command(subcommand)]
    pub command: MemoryCommands,
}

#[derive(Subcommand, Debug)]
pub enum MemoryCommands {
    /// Search currently valid records
    Query {
        /// Case-insensitive text to search for
        #[arg(short, long)]
        text: Option<String>,
        /// Triplet subject filter (repeatable)
        #[arg(short, long)]
        subject: Vec<String>,
        /// Triplet predicate filter (repeatable)
        #[arg(short, long)]
        predicate: Vec<String>,
        /// Maximum records to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Show record counts
    Stats,
    /// Close a record's validity window
    Invalidate {
        /// Record ID
        record_id: Uuid,
    },
    /// Show lessons learned from past runs
    Lessons {
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

#[derive(Debug, Serialize)]
pub struct RecordListOutput {
    pub records: Vec<MemoryRecord>,
    pub total_matches: usize,
}

impl CommandOutput for RecordListOutput {
    fn to_human(&self) -> String {
        if self.records.is_empty() {
            return "No memories found.".to_string();
        }

        let mut records = table(&["ID", "Kind", "Fact", "Confidence", "Valid from", "Node"]);
        for record in &self.records {
            records.add_row(vec![
                short_id(&record.record_id),
                record.fact.kind.as_str().to_string(),
                truncate(&record.fact.text, 60),
                format!("{:.2}", record.fact.confidence),
                record.valid_from.format("%Y-%m-%d %H:%M:%S").to_string(),
                record.node_id.clone().unwrap_or_else(|| "-".to_string()),
            ]);
        }

        format!(
            "{records}\nShowing {} of {} match(es)",
            self.records.len(),
            self.total_matches
        )
    }
}

#[derive(Debug, Serialize)]
pub struct StatsOutput {
    #[serde(flatten)]
    pub stats: MemoryStats,
}

impl CommandOutput for StatsOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Total records:   {}", self.stats.total_records),
            format!("Valid records:   {}", self.stats.valid_records),
            format!("Unique subjects: {}", self.stats.unique_subjects),
        ];
        if !self.stats.by_kind.is_empty() {
            lines.push("By kind:".to_string());
            lines.extend(self.stats.by_kind.iter().map(|(kind, count)| format!("  {kind:<12} {count}")));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct InvalidateOutput {
    pub record_id: Uuid,
    pub invalidated: bool,
}

impl CommandOutput for InvalidateOutput {
    fn to_human(&self) -> String {
        if self.invalidated {
            format!("Invalidated record {}", self.record_id)
        } else {
            format!("Record {} was already invalid", self.record_id)
        }
    }
}

pub async fn execute(args: MemoryArgs, config: &Config, json_mode: bool) -> Result<()> {
    let store = open_memory(config).await?;
    run(args.command, &store, json_mode).await
}

async fn run(command: MemoryCommands, store: &MemoryStore, json_mode: bool) -> Result<()> {
    match command {
        MemoryCommands::Query {
            text,
            subject,
            predicate,
            limit,
        } => {
            let query = MemoryQuery {
                text_search: text,
                subjects: subject,
                predicates: predicate,
                limit,
                ..MemoryQuery::default()
            };
            let result = store.query(&query).await;
            output(
                &RecordListOutput {
                    records: result.records,
                    total_matches: result.total_matches,
                },
                json_mode,
            );
        }
        MemoryCommands::Stats => {
            output(&StatsOutput { stats: store.stats().await }, json_mode);
        }
        MemoryCommands::Invalidate { record_id } => {
            let invalidated = store
                .invalidate(record_id)
                .await
                .with_context(|| format!("Failed to invalidate {record_id}"))?;
            output(&InvalidateOutput { record_id, invalidated }, json_mode);
        }
        MemoryCommands::Lessons { limit } => {
            let records = store.lessons(limit).await;
            let total_matches = records.len();
            output(&RecordListOutput { records, total_matches }, json_mode);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ConflictPolicy, Fact};

    #[tokio::test]
    async fn test_invalidate_unknown_record_fails() {
        let store = MemoryStore::in_memory();
        let command = MemoryCommands::Invalidate {
            record_id: Uuid::new_v4(),
        };
        let err = run(command, &store, true).await.unwrap_err();
        assert!(err.to_string().contains("Failed to invalidate"));
    }

    #[tokio::test]
    async fn test_invalidate_then_stats() {
        let store = MemoryStore::in_memory();
        let outcome = store
            .write(vec![Fact::new("Acme is in Paris")], None, None, ConflictPolicy::Skip)
            .await
            .unwrap();

        run(MemoryCommands::Invalidate { record_id: outcome.written[0] }, &store, true)
            .await
            .unwrap();

        let stats = store.stats().await;
        assert_eq!(stats.total_records, 1);
        assert_eq!(stats.valid_records, 0);
    }

    #[test]
    fn test_record_table() {
        let record = MemoryRecord::new(Fact::new("Acme makes anvils"), None, Some("research".to_string()));
        let rendered = RecordListOutput {
            records: vec![record],
            total_matches: 3,
        }
        .to_human();
        assert!(rendered.contains("Acme makes anvils"));
        assert!(rendered.contains("Showing 1 of 3 match(es)"));
    }
}
