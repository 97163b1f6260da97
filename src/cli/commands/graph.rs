//! Graph CLI commands.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::adapters::file::YamlGraphRepository;
use crate::cli::output::{heading, output, table, truncate, CommandOutput};
use crate::domain::models::{Graph, NodeKind};
use crate::domain::ports::GraphRepository;

#[derive(Args, Debug)]
pub struct GraphArgs {
    #[command(subcommand)]
    pub command: GraphCommands,
}

#[derive(Subcommand, Debug)]
pub enum GraphCommands {
    /// Check a graph document for structural errors
    Validate {
        /// Graph YAML file
        file: PathBuf,
    },
    /// Show nodes, edges and learned statistics
    Show {
        /// Graph YAML file
        file: PathBuf,
    },
}

#[derive(Debug, Serialize)]
pub struct ValidationOutput {
    pub graph: String,
    pub valid: bool,
    pub violations: Vec<String>,
}

impl CommandOutput for ValidationOutput {
    fn to_human(&self) -> String {
        if self.valid {
            return format!("Graph '{}' is valid.", self.graph);
        }
        let mut lines = vec![format!("Graph '{}' has {} problem(s):", self.graph, self.violations.len())];
        lines.extend(self.violations.iter().map(|v| format!("  - {v}")));
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct GraphOutput {
    #[serde(flatten)]
    pub graph: Graph,
}

fn node_detail(kind: &NodeKind) -> String {
    match kind {
        NodeKind::ToolExecution(skill) => skill.skill.clone().unwrap_or_default(),
        NodeKind::QualityGate(gate) => format!("{} criteria", gate.criteria.len()),
        NodeKind::Decision(decision) => format!("on {} ({} rules)", decision.variable, decision.rules.len()),
        NodeKind::Terminal(terminal) => terminal.outcome.map(|o| o.as_str().to_string()).unwrap_or_default(),
        _ => String::new(),
    }
}

impl CommandOutput for GraphOutput {
    fn to_human(&self) -> String {
        let graph = &self.graph;
        let mut nodes = table(&["Node", "Kind", "Stage", "Detail"]);
        for node in &graph.nodes {
            let id = if graph.is_terminal(&node.id) {
                format!("{} (terminal)", node.id)
            } else {
                node.id.clone()
            };
            nodes.add_row(vec![
                id,
                node.kind.as_str().to_string(),
                node.stage.as_str().to_string(),
                node_detail(&node.kind),
            ]);
        }

        let mut edges = table(&["Edge", "From", "To", "Kind", "Guard", "Priority", "Retries", "Success", "Failure", "Weight"]);
        for edge in &graph.edges {
            edges.add_row(vec![
                edge.id.clone(),
                edge.from.to_string(),
                edge.to.clone(),
                edge.kind.as_str().to_string(),
                truncate(edge.guard.expression(), 30),
                edge.priority.to_string(),
                edge.max_retries.map(|r| r.to_string()).unwrap_or_else(|| "-".to_string()),
                edge.stats.success_count.to_string(),
                edge.stats.failure_count.to_string(),
                format!("{:.2}", edge.stats.weight),
            ]);
        }

        let mut lines = vec![
            heading(&format!("{} v{}", graph.name(), graph.meta.version)),
            format!("Start: {}", graph.start_node),
            String::new(),
            nodes.to_string(),
            String::new(),
            edges.to_string(),
        ];

        if !graph.relationships.is_empty() {
            let mut relationships = table(&["Relationship", "From", "To", "Type", "Weight"]);
            for relationship in &graph.relationships {
                relationships.add_row(vec![
                    relationship.id.clone(),
                    relationship.from.clone(),
                    relationship.to.clone(),
                    relationship.kind.as_str().to_string(),
                    format!("{:.2}", relationship.weight),
                ]);
            }
            lines.push(String::new());
            lines.push(relationships.to_string());
        }

        lines.join("\n")
    }
}

pub async fn execute(args: GraphArgs, json_mode: bool) -> Result<()> {
    match args.command {
        GraphCommands::Validate { file } => {
            let graph = load(&file).await?;
            let violations = graph.validate();
            let result = ValidationOutput {
                graph: graph.name().to_string(),
                valid: violations.is_empty(),
                violations,
            };
            output(&result, json_mode);
            if !result.valid {
                anyhow::bail!("{} failed validation", file.display());
            }
        }
        GraphCommands::Show { file } => {
            let graph = load(&file).await?;
            output(&GraphOutput { graph }, json_mode);
        }
    }
    Ok(())
}

pub(crate) async fn load(file: &Path) -> Result<Graph> {
    YamlGraphRepository::new(file)
        .load()
        .await
        .with_context(|| format!("Failed to load graph from {}", file.display()))
}
