mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};
use tfleet_domain::Action;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Plan(args) => commands::run(Action::Plan, args).await,
        Command::Apply(args) => commands::run(Action::Apply, args).await,
    };

    // A fatal orchestrator-level error (rules failed to load, changed-files
    // list unreadable, ...) shares exit 3 with an ambiguous batch — both mean
    // nothing in the batch reached execution. 4 is reserved for a completed,
    // otherwise-clean report whose audit trail degraded.
    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("fatal: {e:?}");
            std::process::exit(3);
        }
    }
}
