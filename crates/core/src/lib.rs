// Switchyard Core - Domain Logic & Ports
// NO infrastructure dependencies: source parsing, HTTP serving and the platform
// client live in adapter crates

pub mod application;
pub mod domain;
pub mod error;
pub mod port;

pub use error::{CoreError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
