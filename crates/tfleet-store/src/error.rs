use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    /// A lock is already held by another owner. Recovery: retry with capped
    /// exponential backoff (3 tries, 5s/30s/120s), then `lock_busy_final`.
    #[error("state lock conflict at '{key}': already held by {holder}")]
    LockBusy { key: String, holder: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("encryption error: {0}")]
    Crypto(String),

    #[error("internal store error: {0}")]
    Internal(String),
}
