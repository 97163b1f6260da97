//! Evolution CLI commands.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use comfy_table::Cell;
use serde::Serialize;
use uuid::Uuid;

use super::{evolution_log, open_memory};
use crate::adapters::file::YamlGraphRepository;
use crate::cli::output::{heading, output, risk_cell, short_id, status_cell, table, truncate, CommandOutput};
use crate::domain::models::{Config, EvolutionStats, Graph, Proposal, ProposalStatus};
use crate::domain::ports::EvolutionLog;
use crate::services::{EvolutionEngine, EvolutionReport};

#[derive(Args, Debug)]
pub struct EvolutionArgs {
    #[command(subcommand)]
    pub command: EvolutionCommands,
}

#[derive(Subcommand, Debug)]
pub enum EvolutionCommands {
    /// List proposals awaiting review
    Proposals {
        /// Include approved, rejected and applied proposals
        #[arg(short, long)]
        all: bool,
    },
    /// Show evolution history and edge statistics
    Stats {
        /// Graph YAML file whose edge statistics to include
        #[arg(short, long)]
        graph: Option<PathBuf>,
    },
    /// Approve a pending proposal and apply it to a graph
    Approve {
        /// Graph YAML file to update
        graph: PathBuf,
        /// Proposal ID
        proposal_id: Uuid,
    },
    /// Reject a pending proposal
    Reject {
        /// Proposal ID
        proposal_id: Uuid,
        /// Why the proposal was rejected
        #[arg(short, long, default_value = "rejected by reviewer")]
        reason: String,
    },
}

#[derive(Debug, Serialize)]
pub struct ProposalListOutput {
    pub proposals: Vec<Proposal>,
}

impl CommandOutput for ProposalListOutput {
    fn to_human(&self) -> String {
        if self.proposals.is_empty() {
            return "No proposals found.".to_string();
        }

        let mut sections = Vec::new();
        for proposal in &self.proposals {
            let mut changes = table(&["Change", "Type", "Target", "Risk", "Approval", "Applied", "Description"]);
            for change in &proposal.changes {
                changes.add_row(vec![
                    Cell::new(short_id(&change.change_id)),
                    Cell::new(change.kind.as_str()),
                    Cell::new(change.kind.target()),
                    risk_cell(change.risk),
                    Cell::new(if change.requires_approval { "required" } else { "-" }),
                    Cell::new(if change.applied { "yes" } else { "no" }),
                    Cell::new(truncate(&change.description, 50)),
                ]);
            }

            let mut header = table(&["Proposal", "Status", "Confidence", "Created", "Summary"]);
            header.add_row(vec![
                Cell::new(proposal.proposal_id),
                status_cell(proposal.status),
                Cell::new(format!("{:.2}", proposal.confidence)),
                Cell::new(proposal.created_at.format("%Y-%m-%d %H:%M")),
                Cell::new(&proposal.summary),
            ]);
            sections.push(format!("{header}\n{changes}"));
        }

        format!("{}\n\n{}", heading(&format!("{} proposal(s)", self.proposals.len())), sections.join("\n\n"))
    }
}

#[derive(Debug, Serialize)]
pub struct StatsOutput {
    #[serde(flatten)]
    pub stats: EvolutionStats,
}

impl CommandOutput for StatsOutput {
    fn to_human(&self) -> String {
        let stats = &self.stats;
        let mut lines = vec![
            format!("Evolution cycles:  {}", stats.evolution_events),
            format!("Total proposals:   {}", stats.total_proposals),
            format!("Changes applied:   {}", stats.total_applied),
            format!("Pending proposals: {}", stats.pending_proposals),
            format!("Relationships:     {}", stats.relationships),
            format!(
                "Memory records:    {} ({} valid)",
                stats.memory.total_records, stats.memory.valid_records
            ),
        ];

        if !stats.edge_stats.is_empty() {
            let mut edges = table(&["Edge", "Success", "Failure", "Rate"]);
            for (edge_id, summary) in &stats.edge_stats {
                edges.add_row(vec![
                    edge_id.clone(),
                    summary.success.to_string(),
                    summary.failure.to_string(),
                    format!("{:.0}%", summary.success_rate * 100.0),
                ]);
            }
            lines.push(String::new());
            lines.push(edges.to_string());
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct DecisionOutput {
    pub proposal_id: Uuid,
    pub status: ProposalStatus,
    pub applied: usize,
    pub errors: Vec<String>,
}

impl DecisionOutput {
    fn from_report(proposal_id: Uuid, report: &EvolutionReport) -> Self {
        Self {
            proposal_id,
            status: report
                .proposals
                .first()
                .map_or(ProposalStatus::Approved, |p| p.status),
            applied: report.applied.len(),
            errors: report.errors.clone(),
        }
    }
}

impl CommandOutput for DecisionOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![format!(
            "Proposal {} is now {} ({} change(s) applied)",
            self.proposal_id,
            self.status.as_str(),
            self.applied
        )];
        lines.extend(self.errors.iter().map(|e| format!("  ! {e}")));
        lines.join("\n")
    }
}

pub async fn execute(args: EvolutionArgs, config: &Config, json_mode: bool) -> Result<()> {
    let log: Arc<dyn EvolutionLog> = Arc::new(evolution_log(config));

    match args.command {
        EvolutionCommands::Proposals { all } => {
            let proposals = if all {
                log.proposals().await?
            } else {
                engine(config, log, Graph::new("", "")).await?.pending_proposals().await?
            };
            output(&ProposalListOutput { proposals }, json_mode);
        }
        EvolutionCommands::Stats { graph } => {
            let graph = match graph {
                Some(path) => super::graph::load(&path).await?,
                None => Graph::new("", ""),
            };
            let stats = engine(config, log, graph).await?.stats().await?;
            output(&StatsOutput { stats }, json_mode);
        }
        EvolutionCommands::Approve { graph, proposal_id } => {
            let mut evolution = engine(config, log, super::graph::load(&graph).await?)
                .await?
                .with_graph_repository(Arc::new(YamlGraphRepository::new(&graph)));
            let report = evolution
                .approve_proposal(proposal_id)
                .await
                .with_context(|| format!("Failed to approve {proposal_id}"))?;
            output(&DecisionOutput::from_report(proposal_id, &report), json_mode);
        }
        EvolutionCommands::Reject { proposal_id, reason } => {
            let proposal = engine(config, log, Graph::new("", ""))
                .await?
                .reject_proposal(proposal_id, &reason)
                .await
                .with_context(|| format!("Failed to reject {proposal_id}"))?;
            let result = DecisionOutput {
                proposal_id,
                status: proposal.status,
                applied: 0,
                errors: Vec::new(),
            };
            output(&result, json_mode);
        }
    }
    Ok(())
}

async fn engine(config: &Config, log: Arc<dyn EvolutionLog>, graph: Graph) -> Result<EvolutionEngine> {
    let memory = Arc::new(open_memory(config).await?);
    Ok(EvolutionEngine::new(graph, memory, log, config.learning.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Change, ChangeKind, Edge, EdgeKind, LearningMode, Node, NodeKind};
    use crate::domain::ports::GraphRepository;

    fn config(root: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.storage.root = root.to_path_buf();
        config.learning.mode = LearningMode::SuggestOnly;
        config
    }

    fn pending_priority_change() -> Proposal {
        let change = Change::new(
            ChangeKind::UpdateEdgePriority {
                edge_id: "e1".to_string(),
                old: 3,
                new: 2,
            },
            "Raise e1",
            "e1 keeps succeeding",
            0.9,
        );
        Proposal::new(vec![change], "Raise e1", 0.9, vec![])
    }

    #[tokio::test]
    async fn test_approve_updates_graph_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let graph_file = dir.path().join("graph.yaml");
        let graph = Graph::new("demo", "start")
            .with_node(Node::new("start", NodeKind::Reasoning))
            .with_node(Node::new("done", NodeKind::Terminal(Default::default())))
            .with_edge(Edge::new("e1", "start", "done", EdgeKind::Standard).with_priority(3))
            .with_terminal("done");
        YamlGraphRepository::new(&graph_file).save(&graph).await.unwrap();

        let proposal = pending_priority_change();
        let proposal_id = proposal.proposal_id;
        evolution_log(&config).record_proposal(&proposal).await.unwrap();

        let args = EvolutionArgs {
            command: EvolutionCommands::Approve {
                graph: graph_file.clone(),
                proposal_id,
            },
        };
        execute(args, &config, true).await.unwrap();

        let updated = YamlGraphRepository::new(&graph_file).load().await.unwrap();
        assert_eq!(updated.edge("e1").unwrap().priority, 2);

        let proposals = evolution_log(&config).proposals().await.unwrap();
        assert_eq!(proposals[0].status, ProposalStatus::Applied);
    }

    #[tokio::test]
    async fn test_reject_unknown_proposal_fails() {
        let dir = tempfile::tempdir().unwrap();
        let args = EvolutionArgs {
            command: EvolutionCommands::Reject {
                proposal_id: Uuid::new_v4(),
                reason: "no".to_string(),
            },
        };
        let err = execute(args, &config(dir.path()), true).await.unwrap_err();
        assert!(err.to_string().contains("Failed to reject"));
    }

    #[test]
    fn test_proposal_table_shows_status_and_risk() {
        let rendered = ProposalListOutput {
            proposals: vec![pending_priority_change()],
        }
        .to_human();
        assert!(rendered.contains("1 proposal(s)"));
        assert!(rendered.contains("update_edge_priority"));
        assert!(rendered.contains("pending"));
        assert!(rendered.contains("low"));
    }
}
