// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Malformed event payload: {0}")]
    MalformedEvent(#[from] serde_json::Error),

    #[error("Empty event payload")]
    EmptyEvent,

    #[error("Unknown HTTP method: {0}")]
    UnknownMethod(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
