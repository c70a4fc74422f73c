// Scanner Error Types
//
// Every variant aborts the scan: a partial Layout is never returned.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("No crate root (src/lib.rs, src/main.rs or src/bin/*.rs) under {0}")]
    NoCrateRoot(PathBuf),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}:{line}:{column}: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        column: usize,
        message: String,
    },

    #[error("Failed to read package manifest {path}: {message}")]
    Manifest { path: PathBuf, message: String },

    #[error("{kind} names '{first}' and '{second}' map to the same environment key or physical name")]
    NameCollision {
        kind: String,
        first: String,
        second: String,
    },

    #[error("Module '{module}' declared in {declared_in} has no file (looked for {candidates:?})")]
    MissingModule {
        module: String,
        declared_in: PathBuf,
        candidates: Vec<PathBuf>,
    },
}

pub type Result<T> = std::result::Result<T, ScanError>;
