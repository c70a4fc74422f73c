// Logging Initialization
//
// JSON lines in production, pretty output for local development. `RUST_LOG`
// overrides the default filter.

use crate::config::LogFormat;
use crate::error::{Result, RuntimeError};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const DEFAULT_FILTER: &str = "switchyard=info";

/// Install the global subscriber
///
/// # Errors
/// Fails if the filter is invalid or a global subscriber is already set.
pub fn init_logging(format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))
        .map_err(|e| RuntimeError::Logging(e.to_string()))?;

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = match format {
        // Production: one JSON object per line for the platform's log collector
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
    };
    installed.map_err(|e| RuntimeError::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_an_error() {
        let _ = init_logging(LogFormat::Pretty);
        let second = init_logging(LogFormat::Json);
        assert!(matches!(second, Err(RuntimeError::Logging(_))));
    }
}
