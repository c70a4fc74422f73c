//! HTTP Adapter Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HttpAdapterError {
    #[error("Invalid request for router: {0}")]
    InvalidRequest(#[from] axum::http::Error),

    #[error("Failed to read response body: {0}")]
    Body(#[from] axum::Error),
}

pub type Result<T> = std::result::Result<T, HttpAdapterError>;
