// Switchyard Runtime - Composition Root
//
// Wires configuration, logging, the name mapping and the dispatcher around an
// application's `HandlerRegistry`, then runs either the platform invocation
// loop or the local simulator until shutdown.

pub mod config;
pub mod error;
pub mod logging;
pub mod platform;
pub mod shutdown;
pub mod simulator;

pub use config::{LogFormat, Mode, RuntimeConfig};
pub use error::{Result, RuntimeError};
pub use platform::LambdaRuntime;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};
pub use simulator::{LocalSimulator, SendReport};

use std::path::Path;
use std::sync::Arc;
use switchyard_core::application::{Dispatcher, HandlerRegistry, NameMapping};
use switchyard_core::domain::Layout;
use switchyard_core::port::{EnvSource, SystemEnv};
use tracing::{error, info, warn};

/// Run an application configured from the process environment
///
/// Typical `main`:
///
/// ```ignore
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let registry = HandlerRegistry::builder()
///         .on_queue("orders", handle_orders)
///         .build()?;
///     switchyard_runtime::serve(registry).await?;
///     Ok(())
/// }
/// ```
pub async fn serve(registry: HandlerRegistry) -> Result<()> {
    let config = load_config(&SystemEnv).await?;

    if let Err(e) = logging::init_logging(config.log_format) {
        warn!(error = %e, "Keeping the already installed logging subscriber");
    }
    info!(
        version = switchyard_core::VERSION,
        mode = ?config.mode,
        prefix = %config.env_prefix,
        "Switchyard runtime starting"
    );

    let dispatcher = match build_dispatcher(registry, &config, &SystemEnv) {
        Ok(dispatcher) => dispatcher,
        Err(e) => {
            if config.mode == Mode::Platform {
                report_start_failure(config.runtime_api.as_deref(), "Runtime.InitError", &e).await;
            }
            return Err(e);
        }
    };

    let (tx, token) = shutdown_channel();
    shutdown::shutdown_on_ctrl_c(tx);

    run(dispatcher, &config, token).await
}

/// Read the runtime configuration from `env`
///
/// A rejected configuration is still reported to the runtime API when the
/// platform advertises one, unless local mode was asked for.
pub async fn load_config(env: &dyn EnvSource) -> Result<RuntimeConfig> {
    match RuntimeConfig::from_env(env) {
        Ok(config) => Ok(config),
        Err(e) => {
            let local = env.get(config::MODE_VAR).is_some_and(|v| v.trim() == "local");
            if !local {
                let api = env.get(config::RUNTIME_API_VAR);
                report_start_failure(api.as_deref().map(str::trim), "Runtime.ConfigError", &e).await;
            }
            Err(e)
        }
    }
}

async fn report_start_failure(runtime_api: Option<&str>, error_type: &str, err: &RuntimeError) {
    let Some(api) = runtime_api.filter(|api| !api.is_empty()) else {
        return;
    };
    error!(error_type, error = %err, "Runtime failed to start");
    if let Err(report_err) = platform::report_init_error(api, error_type, &err.to_string()).await {
        warn!(error = %report_err, "Failed to report init error");
    }
}

/// Build the dispatcher for `registry`
///
/// In platform mode the name mapping comes from the environment; locally every
/// resource is assumed to carry its suggested physical name.
pub fn build_dispatcher(
    registry: HandlerRegistry,
    config: &RuntimeConfig,
    env: &dyn EnvSource,
) -> Result<Dispatcher> {
    let registered = registry.layout();

    if let Some(path) = &config.layout_path {
        let scanned = load_layout(path)?;
        report_layout_drift(&registered, &scanned);
    }

    let mapping = match config.mode {
        Mode::Platform => NameMapping::from_env(env, &config.env_prefix, &registered),
        Mode::Local => NameMapping::identity(&config.env_prefix, &registered),
    };

    info!(
        queues = registered.queues().len(),
        schedules = registered.schedules().len(),
        http = registry.http_router().is_some(),
        "Handler registry loaded"
    );
    Ok(Dispatcher::new(Arc::new(registry), Arc::new(mapping)))
}

/// Run until `shutdown` is signalled
pub async fn run(dispatcher: Dispatcher, config: &RuntimeConfig, shutdown: ShutdownToken) -> Result<()> {
    match config.mode {
        Mode::Platform => {
            let api = config.runtime_api.as_deref().ok_or_else(|| {
                RuntimeError::Config(format!("{} is not set", config::RUNTIME_API_VAR))
            })?;
            LambdaRuntime::new(api, dispatcher).run(shutdown).await
        }
        Mode::Local => {
            let mut waiter = shutdown.clone();
            let simulator = LocalSimulator::new(dispatcher, config.local_max_receives);
            simulator.run_schedules(shutdown).await;
            waiter.wait().await;
            Ok(())
        }
    }
}

/// Read a layout written by `switchyard scan --out`
pub fn load_layout(path: &Path) -> Result<Layout> {
    let raw = std::fs::read_to_string(path).map_err(|source| RuntimeError::LayoutRead {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| RuntimeError::LayoutFormat {
        path: path.to_path_buf(),
        source,
    })
}

/// Warn about registrations the scan did not see, and the reverse
fn report_layout_drift(registered: &Layout, scanned: &Layout) {
    let dynamic = registered.missing_from(scanned);
    for queue in dynamic.queue_names() {
        warn!(queue = %queue, "Dynamic registration, no infrastructure will be generated");
    }
    for schedule in dynamic.schedule_names() {
        warn!(schedule = %schedule, "Dynamic registration, no infrastructure will be generated");
    }

    let unregistered = scanned.missing_from(registered);
    for queue in unregistered.queue_names() {
        warn!(queue = %queue, "Queue declared in source but not registered at start-up");
    }
    for schedule in unregistered.schedule_names() {
        warn!(schedule = %schedule, "Schedule declared in source but not registered at start-up");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::Value;
    use std::time::Duration;
    use switchyard_core::application::Resolution;
    use switchyard_core::domain::{QueueDecl, ResourceKind, ScheduleDecl};
    use switchyard_core::port::handler::mocks::{MockQueueHandler, MockScheduleHandler};
    use switchyard_core::port::MapEnv;

    fn registry() -> HandlerRegistry {
        HandlerRegistry::builder()
            .on_queue("orders", MockQueueHandler::new_success())
            .on_schedule(
                "nightly-sweep",
                Duration::from_secs(3600),
                MockScheduleHandler::new_success(),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_platform_mapping_comes_from_env() {
        let env = MapEnv::new()
            .with("AWS_LAMBDA_RUNTIME_API", "127.0.0.1:9001")
            .with(
                "SWITCHYARD_QUEUE_ORDERS_URL",
                "https://sqs.us-east-1.amazonaws.com/123456789012/acct-orders-42",
            );
        let config = RuntimeConfig::from_env(&env).unwrap();

        let dispatcher = build_dispatcher(registry(), &config, &env).unwrap();

        assert_eq!(
            dispatcher.mapping().resolve(ResourceKind::Queue, "acct-orders-42"),
            Resolution::Mapped("orders".to_string())
        );
    }

    #[test]
    fn test_local_mapping_uses_suggested_names() {
        let config = RuntimeConfig::from_env(&MapEnv::new()).unwrap();
        let dispatcher = build_dispatcher(registry(), &config, &MapEnv::new()).unwrap();

        assert_eq!(
            dispatcher
                .mapping()
                .physical_for(ResourceKind::Schedule, "nightly-sweep"),
            Some("switchyard-schedule-nightly-sweep")
        );
    }

    #[test]
    fn test_layout_file_is_checked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layout.json");
        let scanned = Layout::new(
            vec![QueueDecl::new("orders"), QueueDecl::new("audit")],
            vec![ScheduleDecl::new("nightly-sweep", Duration::from_secs(3600))],
        );
        std::fs::write(&path, serde_json::to_string(&scanned).unwrap()).unwrap();

        assert_eq!(load_layout(&path).unwrap(), scanned);

        let env = MapEnv::new().with("SWITCHYARD_LAYOUT_PATH", path.display().to_string());
        let config = RuntimeConfig::from_env(&env).unwrap();
        assert!(build_dispatcher(registry(), &config, &env).is_ok());
    }

    #[test]
    fn test_bad_layout_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layout.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(
            load_layout(&path),
            Err(RuntimeError::LayoutFormat { .. })
        ));
        assert!(matches!(
            load_layout(&dir.path().join("missing.json")),
            Err(RuntimeError::LayoutRead { .. })
        ));
    }

    type Posted = Arc<tokio::sync::Mutex<Vec<(Option<String>, Value)>>>;

    async fn fake_runtime_api() -> (String, Posted) {
        async fn init_error(
            State(posted): State<Posted>,
            headers: HeaderMap,
            Json(body): Json<Value>,
        ) -> StatusCode {
            let error_type = headers
                .get("Lambda-Runtime-Function-Error-Type")
                .and_then(|v| v.to_str().ok())
                .map(String::from);
            posted.lock().await.push((error_type, body));
            StatusCode::ACCEPTED
        }

        let posted = Posted::default();
        let app = Router::new()
            .route("/2018-06-01/runtime/init/error", post(init_error))
            .with_state(posted.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (addr.to_string(), posted)
    }

    #[tokio::test]
    async fn test_config_error_reported_to_runtime_api() {
        let (addr, posted) = fake_runtime_api().await;
        let env = MapEnv::new()
            .with("AWS_LAMBDA_RUNTIME_API", addr)
            .with("SWITCHYARD_LOG_FORMAT", "xml");

        let err = load_config(&env).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Config(_)));

        let posted = posted.lock().await.clone();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].0.as_deref(), Some("Runtime.ConfigError"));
        assert_eq!(posted[0].1["errorType"], "Runtime.ConfigError");
        assert!(posted[0].1["errorMessage"]
            .as_str()
            .unwrap()
            .contains("SWITCHYARD_LOG_FORMAT"));
    }

    #[tokio::test]
    async fn test_config_error_in_local_mode_is_not_reported() {
        let (addr, posted) = fake_runtime_api().await;
        let env = MapEnv::new()
            .with("AWS_LAMBDA_RUNTIME_API", addr)
            .with("SWITCHYARD_MODE", "local")
            .with("SWITCHYARD_ENV_PREFIX", "bad-prefix");

        assert!(load_config(&env).await.is_err());
        assert!(load_config(&MapEnv::new().with("SWITCHYARD_MODE", "sideways"))
            .await
            .is_err());
        assert!(posted.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_build_failure_reported_as_init_error() {
        let (addr, posted) = fake_runtime_api().await;
        let env = MapEnv::new()
            .with("AWS_LAMBDA_RUNTIME_API", addr)
            .with("SWITCHYARD_LAYOUT_PATH", "/nonexistent/switchyard-layout.json");
        let config = load_config(&env).await.unwrap();

        let Err(err) = build_dispatcher(registry(), &config, &env) else {
            panic!("expected a missing layout file to fail start-up");
        };
        report_start_failure(config.runtime_api.as_deref(), "Runtime.InitError", &err).await;

        let posted = posted.lock().await.clone();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].0.as_deref(), Some("Runtime.InitError"));
    }

    #[tokio::test]
    async fn test_valid_config_is_not_reported() {
        let (addr, posted) = fake_runtime_api().await;
        let env = MapEnv::new().with("AWS_LAMBDA_RUNTIME_API", addr);

        let config = load_config(&env).await.unwrap();
        assert_eq!(config.mode, Mode::Platform);
        assert!(posted.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_local_run_stops_on_shutdown() {
        let config = RuntimeConfig::from_env(&MapEnv::new()).unwrap();
        let dispatcher = build_dispatcher(registry(), &config, &MapEnv::new()).unwrap();
        let (tx, token) = shutdown_channel();

        let task = tokio::spawn(async move { run(dispatcher, &config, token).await });
        tx.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
