// Domain Layer - Layout, wire envelopes and dispatch outcomes

pub mod error;
pub mod event;
pub mod invocation;
pub mod layout;
pub mod outcome;

// Re-exports
pub use error::DomainError;
pub use event::{
    GatewayRequest, GatewayVersion, InboundEvent, QueueBatch, QueueMessage, ScheduleTick,
};
pub use invocation::InvocationContext;
pub use layout::{Layout, LogicalName, QueueDecl, ResourceKind, ScheduleDecl};
pub use outcome::{BatchItemFailure, BatchOutcome, DispatchResult, GatewayResponse};
