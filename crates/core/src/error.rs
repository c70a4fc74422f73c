// Central Error Type for the Core

use thiserror::Error;

/// Core-level error type
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] crate::application::DispatchError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] crate::application::GatewayError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;
