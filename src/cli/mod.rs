//! Command-line interface.
//!
//! Every command resolves its stores from the loaded [`Config`] and prints
//! either human-readable tables or JSON (`--json`).

pub mod commands;
pub mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::domain::models::Config;
use crate::infrastructure::config::ConfigLoader;

#[derive(Parser, Debug)]
#[command(name = "brainstem")]
#[command(about = "brainstem - deterministic graph execution for LLM workflows", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to .brainstem/config.yaml plus overrides)
    #[arg(short, long, global = true, env = "BRAINSTEM_CONFIG")]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Load the configuration this invocation asked for.
    pub fn load_config(&self) -> Result<Config> {
        match &self.config {
            Some(path) => ConfigLoader::load_from_file(path),
            None => ConfigLoader::load(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate and inspect graph documents
    Graph(commands::graph::GraphArgs),

    /// Query and maintain the memory store
    Memory(commands::memory::MemoryArgs),

    /// Review and apply graph evolution proposals
    Evolution(commands::evolution::EvolutionArgs),

    /// Inspect archived runs
    Runs(commands::runs::RunsArgs),
}

/// Print an error in the selected format and exit non-zero.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let chain: Vec<String> = err.chain().skip(1).map(ToString::to_string).collect();
        let body = serde_json::json!({"error": err.to_string(), "caused_by": chain});
        eprintln!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("{} {err}", console::style("Error:").red().bold());
        for cause in err.chain().skip(1) {
            eprintln!("  caused by: {cause}");
        }
    }
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["brainstem", "memory", "stats", "--json", "--config", "custom.yaml"]).unwrap();
        assert!(cli.json);
        assert_eq!(cli.config, Some(PathBuf::from("custom.yaml")));
        assert!(matches!(cli.command, Commands::Memory(_)));
    }
}
