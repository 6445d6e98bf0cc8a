// Central Error Type for the Application

use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Broker error: {0}")]
    Broker(#[from] crate::port::BrokerError),

    #[error("Relay error: {0}")]
    Relay(#[from] crate::application::relay::RelayError),
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
