use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker task panicked: {0}")]
    Join(String),
}
