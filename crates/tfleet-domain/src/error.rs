use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid state key '{0}': does not match the canonical service/account/region/project/state or combined/account/region/project/state form")]
    InvalidStateKey(String),

    #[error("invalid service name '{0}'")]
    InvalidServiceName(String),

    #[error("empty service set for unit derived from {0}")]
    EmptyServiceSet(String),
}
