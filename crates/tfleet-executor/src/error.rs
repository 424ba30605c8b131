use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("failed to create workspace directory {path}: {source}")]
    Workspace { path: String, source: std::io::Error },

    #[error("failed to spawn {binary}: {source}")]
    Spawn { binary: String, source: std::io::Error },

    #[error("{binary} {subcommand} timed out after {secs}s")]
    Timeout { binary: String, subcommand: String, secs: u64 },

    #[error("failed to parse policy engine report: {0}")]
    PolicyReportParse(String),

    #[error("state store error: {0}")]
    Store(#[from] tfleet_store::StoreError),

    #[error("internal executor error: {0}")]
    Internal(String),
}
