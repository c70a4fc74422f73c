// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid {kind} name '{name}': {reason}")]
    InvalidName {
        kind: String,
        name: String,
        reason: String,
    },

    #[error("Invalid interval for schedule '{0}': must be greater than zero")]
    InvalidInterval(String),

    #[error("{kind} names '{first}' and '{second}' map to the same environment key or physical name")]
    NameCollision {
        kind: String,
        first: String,
        second: String,
    },
}

pub type Result<T> = std::result::Result<T, DomainError>;
