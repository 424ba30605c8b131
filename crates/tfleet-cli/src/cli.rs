use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "tfleet", about = "Centralized IaC deployment orchestrator", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Classify, gate, and plan every changed descriptor without applying.
    Plan(RunArgs),

    /// Classify, gate, plan, and apply every changed descriptor.
    Apply(RunArgs),
}

#[derive(Debug, Parser)]
pub struct RunArgs {
    /// Path to a file listing changed descriptor paths, one per line, or `-` for stdin.
    #[arg(long)]
    pub changed_files: PathBuf,

    /// Identity of the human or system that triggered this run.
    #[arg(long)]
    pub requester: String,

    /// Path to the Pre-Gate Validator's rules document (TOML).
    #[arg(long)]
    pub rules: PathBuf,

    /// Root directory under which per-unit workspaces are created.
    #[arg(long)]
    pub workspace_root: PathBuf,

    /// Maximum worker pool width; the effective width is also capped at 5
    /// and at the number of units in this run.
    #[arg(long, default_value_t = 5)]
    pub worker_cap: usize,

    /// Where to write the final report. Defaults to stdout.
    #[arg(long)]
    pub report_out: Option<PathBuf>,

    /// Report rendering.
    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    pub report_format: ReportFormat,

    /// IaC tool binary to invoke.
    #[arg(long, default_value = "terraform")]
    pub iac_binary: String,

    /// Policy engine binary to invoke.
    #[arg(long, default_value = "policy-engine")]
    pub policy_binary: String,

    /// Directory of policy-engine rule bundles, separate from `--rules`.
    #[arg(long)]
    pub policy_dir: PathBuf,

    /// Path to a raw 32-byte key file used to encrypt audit log records.
    #[arg(long)]
    pub audit_key_file: PathBuf,

    /// S3 bucket backing the state store. Omit to use an in-memory store
    /// (development/test runs only — state does not survive the process).
    #[arg(long)]
    pub state_bucket: Option<String>,

    #[arg(long, default_value = "us-east-1")]
    pub state_region: String,

    #[arg(long, default_value = "")]
    pub state_prefix: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ReportFormat {
    Text,
    Json,
}
