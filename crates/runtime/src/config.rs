// Runtime Configuration
//
// Read once at start-up through the `EnvSource` port.

use crate::error::{Result, RuntimeError};
use std::path::PathBuf;
use switchyard_core::application::DEFAULT_ENV_PREFIX;
use switchyard_core::port::EnvSource;

pub const ENV_PREFIX_VAR: &str = "SWITCHYARD_ENV_PREFIX";
pub const LOG_FORMAT_VAR: &str = "SWITCHYARD_LOG_FORMAT";
pub const MODE_VAR: &str = "SWITCHYARD_MODE";
pub const RUNTIME_API_VAR: &str = "AWS_LAMBDA_RUNTIME_API";
pub const LOCAL_MAX_RECEIVES_VAR: &str = "SWITCHYARD_LOCAL_MAX_RECEIVES";
pub const LAYOUT_PATH_VAR: &str = "SWITCHYARD_LAYOUT_PATH";

/// Redeliveries before a simulated message is dead-lettered
pub const DEFAULT_LOCAL_MAX_RECEIVES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Poll the platform's runtime API
    Platform,
    /// Run the local simulator
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub env_prefix: String,
    pub log_format: LogFormat,
    pub mode: Mode,
    /// `host:port` of the runtime API (platform mode only)
    pub runtime_api: Option<String>,
    pub local_max_receives: u32,
    /// Layout emitted by `switchyard scan`, compared against the registry at start-up
    pub layout_path: Option<PathBuf>,
}

impl RuntimeConfig {
    pub fn from_env(env: &dyn EnvSource) -> Result<Self> {
        let get = |key: &str| env.get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let env_prefix = get(ENV_PREFIX_VAR).unwrap_or_else(|| DEFAULT_ENV_PREFIX.to_string());
        if !env_prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(RuntimeError::Config(format!(
                "{ENV_PREFIX_VAR} must be alphanumeric or '_', got '{env_prefix}'"
            )));
        }

        let log_format = match get(LOG_FORMAT_VAR).as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(RuntimeError::Config(format!(
                    "{LOG_FORMAT_VAR} must be 'json' or 'pretty', got '{other}'"
                )))
            }
        };

        let runtime_api = get(RUNTIME_API_VAR);

        // Default: platform when the platform advertises its runtime API
        let mode = match get(MODE_VAR).as_deref() {
            Some("platform") => Mode::Platform,
            Some("local") => Mode::Local,
            None if runtime_api.is_some() => Mode::Platform,
            None => Mode::Local,
            Some(other) => {
                return Err(RuntimeError::Config(format!(
                    "{MODE_VAR} must be 'platform' or 'local', got '{other}'"
                )))
            }
        };
        if mode == Mode::Platform && runtime_api.is_none() {
            return Err(RuntimeError::Config(format!(
                "{RUNTIME_API_VAR} is required in platform mode"
            )));
        }

        let local_max_receives = match get(LOCAL_MAX_RECEIVES_VAR) {
            None => DEFAULT_LOCAL_MAX_RECEIVES,
            Some(raw) => match raw.parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(RuntimeError::Config(format!(
                        "{LOCAL_MAX_RECEIVES_VAR} must be a positive integer, got '{raw}'"
                    )))
                }
            },
        };

        Ok(Self {
            env_prefix,
            log_format,
            mode,
            runtime_api,
            local_max_receives,
            layout_path: get(LAYOUT_PATH_VAR).map(PathBuf::from),
        })
    }
}
