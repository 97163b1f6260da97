//! Run archive CLI commands.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use futures::future::try_join_all;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use super::run_archive;
use crate::adapters::file::FileRunArchive;
use crate::cli::output::{heading, output, table, truncate, CommandOutput};
use crate::domain::models::{AuditEvent, Config, RunState};
use crate::domain::ports::RunArchive;

#[derive(Args, Debug)]
pub struct RunsArgs {
    #[command(subcommand)]
    pub command: RunsCommands,
}

#[derive(Subcommand, Debug)]
pub enum RunsCommands {
    /// List archived runs
    List,
    /// Show a run's audit trail and final state
    Show {
        /// Run ID
        run_id: Uuid,
        /// Only show the last N audit events
        #[arg(short, long)]
        tail: Option<usize>,
    },
}

#[derive(Debug, Serialize)]
pub struct RunListOutput {
    pub runs: Vec<RunSummary>,
}

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub brain_id: Option<String>,
    pub final_node: Option<String>,
    pub total_steps: Option<u32>,
}

impl CommandOutput for RunListOutput {
    fn to_human(&self) -> String {
        if self.runs.is_empty() {
            return "No runs archived.".to_string();
        }
        let mut runs = table(&["Run", "Brain", "Final node", "Steps"]);
        for run in &self.runs {
            runs.add_row(vec![
                run.run_id.to_string(),
                run.brain_id.clone().unwrap_or_else(|| "-".to_string()),
                run.final_node.clone().unwrap_or_else(|| "-".to_string()),
                run.total_steps.map_or_else(|| "-".to_string(), |s| s.to_string()),
            ]);
        }
        runs.to_string()
    }
}

#[derive(Debug, Serialize)]
pub struct RunOutput {
    pub run_id: Uuid,
    pub audit: Vec<AuditEvent>,
    pub final_state: Option<RunState>,
}

impl CommandOutput for RunOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![heading(&format!("Run {}", self.run_id))];

        match &self.final_state {
            Some(state) => {
                lines.push(format!("Brain:      {}", state.brain_id));
                lines.push(format!("Request:    {}", truncate(&state.user_request, 70)));
                lines.push(format!("Final node: {} ({})", state.current_node, state.stage.as_str()));
                lines.push(format!(
                    "Steps:      {} ({} retries, {} memory writes)",
                    state.counters.total_steps, state.counters.total_retries, state.counters.memory_writes
                ));
                lines.push(format!("Path:       {}", state.trail.join(" -> ")));
            }
            None => lines.push("No final state saved (run interrupted?)".to_string()),
        }

        if self.audit.is_empty() {
            lines.push("No audit events.".to_string());
        } else {
            let mut events = table(&["Time", "Node", "Stage", "Action", "Details"]);
            for event in &self.audit {
                events.add_row(vec![
                    event.timestamp.format("%H:%M:%S%.3f").to_string(),
                    event.node_id.clone(),
                    event.stage.as_str().to_string(),
                    event.action.as_str().to_string(),
                    details(&event.details),
                ]);
            }
            lines.push(String::new());
            lines.push(events.to_string());
        }
        lines.join("\n")
    }
}

fn details(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Object(map) if map.is_empty() => String::new(),
        other => truncate(&other.to_string(), 60),
    }
}

pub async fn execute(args: RunsArgs, config: &Config, json_mode: bool) -> Result<()> {
    run(args.command, &run_archive(config), json_mode).await
}

async fn run(command: RunsCommands, archive: &FileRunArchive, json_mode: bool) -> Result<()> {
    match command {
        RunsCommands::List => {
            let run_ids = archive.run_ids().await?;
            let states = try_join_all(run_ids.iter().map(|id| archive.load_final_state(*id))).await?;
            let runs = run_ids
                .into_iter()
                .zip(states)
                .map(|(run_id, state)| RunSummary {
                    run_id,
                    brain_id: state.as_ref().map(|s| s.brain_id.clone()),
                    final_node: state.as_ref().map(|s| s.current_node.clone()),
                    total_steps: state.as_ref().map(|s| s.counters.total_steps),
                })
                .collect();
            output(&RunListOutput { runs }, json_mode);
        }
        RunsCommands::Show { run_id, tail } => {
            let mut audit = archive
                .load_audit(run_id)
                .await
                .with_context(|| format!("Failed to read audit trail of {run_id}"))?;
            let final_state = archive.load_final_state(run_id).await?;
            if audit.is_empty() && final_state.is_none() {
                anyhow::bail!("Run {run_id} not found in {}", archive.runs_dir().display());
            }
            if let Some(tail) = tail {
                audit = audit.split_off(audit.len().saturating_sub(tail));
            }
            output(
                &RunOutput {
                    run_id,
                    audit,
                    final_state,
                },
                json_mode,
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::AuditAction;
    use serde_json::json;

    async fn archived_run(archive: &FileRunArchive) -> RunState {
        let mut state = RunState::new("research", "find suppliers", "intake");
        state.record_audit("intake", AuditAction::NodeExecuted, json!({"step": 1}));
        state.record_audit("search", AuditAction::NoValidEdge, json!({}));
        archive.append_audit(state.run_id, &state.drain_audit()).await.unwrap();
        archive.save_final_state(&state).await.unwrap();
        state
    }

    #[tokio::test]
    async fn test_show_unknown_run_fails() {
        let dir = tempfile::tempdir().unwrap();
        let archive = FileRunArchive::new(dir.path());
        let command = RunsCommands::Show {
            run_id: Uuid::new_v4(),
            tail: None,
        };
        let err = run(command, &archive, true).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_show_archived_run() {
        let dir = tempfile::tempdir().unwrap();
        let archive = FileRunArchive::new(dir.path());
        let state = archived_run(&archive).await;

        let command = RunsCommands::Show {
            run_id: state.run_id,
            tail: Some(1),
        };
        run(command, &archive, true).await.unwrap();
        assert_eq!(archive.run_ids().await.unwrap(), vec![state.run_id]);
    }

    #[test]
    fn test_run_output_without_final_state() {
        let rendered = RunOutput {
            run_id: Uuid::nil(),
            audit: vec![],
            final_state: None,
        }
        .to_human();
        assert!(rendered.contains("No final state saved"));
        assert!(rendered.contains("No audit events."));
    }
}
