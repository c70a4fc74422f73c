//! HTTP Adapter Layer
//!
//! Serves every gateway request through one shared axum `Router`, so an
//! application can use ordinary axum routing, extractors and middleware.

pub mod error;
pub mod router;

pub use error::HttpAdapterError;
pub use router::AxumRouter;
