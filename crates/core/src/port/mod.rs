// Port Layer - Interfaces for user handlers and external dependencies

pub mod env_source;
pub mod handler;
pub mod http_router;
pub mod id_provider; // For deterministic testing
pub mod time_provider;

// Re-exports
pub use env_source::{EnvSource, MapEnv, SystemEnv};
pub use handler::{BatchReport, BoxError, QueueHandler, ScheduleHandler};
pub use http_router::{HttpRequest, HttpResponse, HttpRouter};
pub use id_provider::{IdProvider, UuidProvider};
pub use time_provider::{SystemTimeProvider, TimeProvider};
