//! brainstem CLI entry point.

use clap::Parser;

use brainstem::cli::{commands, handle_error, Cli, Commands};
use brainstem::infrastructure::logging::LoggerImpl;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(err) => handle_error(err, cli.json),
    };

    let _logger = match LoggerImpl::init(&config.logging) {
        Ok(logger) => logger,
        Err(err) => handle_error(err.context("Failed to initialize logging"), cli.json),
    };

    let result = match cli.command {
        Commands::Graph(args) => commands::graph::execute(args, cli.json).await,
        Commands::Memory(args) => commands::memory::execute(args, &config, cli.json).await,
        Commands::Evolution(args) => commands::evolution::execute(args, &config, cli.json).await,
        Commands::Runs(args) => commands::runs::execute(args, &config, cli.json).await,
    };

    if let Err(err) = result {
        handle_error(err, cli.json);
    }
}
