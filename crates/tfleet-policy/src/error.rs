use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("failed to read rules document at '{0}': {1}")]
    Io(String, String),

    #[error("failed to parse rules document at '{0}': {1}")]
    Parse(String, String),
}
