// Runtime Error Types

use std::path::PathBuf;
use switchyard_core::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to initialize logging: {0}")]
    Logging(String),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("Runtime API request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Runtime API returned {status} for {path}")]
    RuntimeApi { status: u16, path: String },

    #[error("Runtime API response is missing header {0}")]
    MissingHeader(&'static str),

    #[error("Failed to read layout file {path}: {source}")]
    LayoutRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid layout file {path}: {source}")]
    LayoutFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Simulation error: {0}")]
    Simulation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
