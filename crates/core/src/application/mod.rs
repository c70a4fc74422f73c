// Application Layer - Naming, classification and dispatch

pub mod classifier;
pub mod dispatcher;
pub mod gateway;
pub mod naming;
pub mod panic_guard;
pub mod registry;

// Re-exports
pub use classifier::{classify, classify_value};
pub use dispatcher::{DispatchError, Dispatcher};
pub use gateway::GatewayError;
pub use naming::{NameMapping, Resolution, DEFAULT_ENV_PREFIX};
pub use registry::{HandlerRegistry, RegistryBuilder};
