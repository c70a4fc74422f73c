// Handler Ports
//
// Application code implements these (or passes async closures) and registers
// them on `HandlerRegistry::builder()`.

use crate::domain::{InvocationContext, QueueMessage, ScheduleTick};
use async_trait::async_trait;
use std::future::Future;

/// Error type returned by user handlers
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// What a queue handler reports back after processing a batch normally
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    failed: Vec<String>,
}

impl BatchReport {
    /// Every message processed
    pub fn success() -> Self {
        Self::default()
    }

    /// Only the listed message ids should be redelivered
    pub fn with_failures<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            failed: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn fail(&mut self, message_id: impl Into<String>) {
        self.failed.push(message_id.into());
    }

    pub fn failed_ids(&self) -> &[String] {
        &self.failed
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Consumer for one logical queue
///
/// Receives the whole batch exactly once, in delivery order. Returning `Err`
/// marks every message in the batch as failed.
#[async_trait]
pub trait QueueHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: InvocationContext,
        messages: Vec<QueueMessage>,
    ) -> Result<BatchReport, BoxError>;
}

#[async_trait]
impl<F, Fut> QueueHandler for F
where
    F: Fn(InvocationContext, Vec<QueueMessage>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<BatchReport, BoxError>> + Send + 'static,
{
    async fn handle(
        &self,
        ctx: InvocationContext,
        messages: Vec<QueueMessage>,
    ) -> Result<BatchReport, BoxError> {
        (self)(ctx, messages).await
    }
}

/// Timer-driven task for one logical schedule
#[async_trait]
pub trait ScheduleHandler: Send + Sync {
    async fn handle(&self, ctx: InvocationContext, tick: ScheduleTick) -> Result<(), BoxError>;
}

#[async_trait]
impl<F, Fut> ScheduleHandler for F
where
    F: Fn(InvocationContext, ScheduleTick) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    async fn handle(&self, ctx: InvocationContext, tick: ScheduleTick) -> Result<(), BoxError> {
        (self)(ctx, tick).await
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Mock queue handler behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Report every message processed
        Success,
        /// Report the listed ids as failed
        Fail(Vec<String>),
        /// Return a hard error
        Error(String),
        /// Panic with message (for panic isolation testing)
        Panic(String),
    }

    /// Mock queue handler recording every batch it receives
    #[derive(Clone)]
    pub struct MockQueueHandler {
        behavior: MockBehavior,
        batches: Arc<Mutex<Vec<Vec<String>>>>,
    }

    impl MockQueueHandler {
        pub fn new(behavior: MockBehavior) -> Self {
            Self {
                behavior,
                batches: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn new_success() -> Self {
            Self::new(MockBehavior::Success)
        }

        pub fn new_failing<S: Into<String>>(ids: impl IntoIterator<Item = S>) -> Self {
            Self::new(MockBehavior::Fail(ids.into_iter().map(Into::into).collect()))
        }

        pub fn new_error(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Error(message.into()))
        }

        pub fn new_panic_inducing(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Panic(message.into()))
        }

        pub fn call_count(&self) -> usize {
            self.batches.lock().unwrap().len()
        }

        /// Message ids of every batch seen, in call order
        pub fn batches(&self) -> Vec<Vec<String>> {
            self.batches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl QueueHandler for MockQueueHandler {
        async fn handle(
            &self,
            _ctx: InvocationContext,
            messages: Vec<QueueMessage>,
        ) -> Result<BatchReport, BoxError> {
            self.batches
                .lock()
                .unwrap()
                .push(messages.iter().map(|m| m.message_id.clone()).collect());

            match &self.behavior {
                MockBehavior::Success => Ok(BatchReport::success()),
                MockBehavior::Fail(ids) => Ok(BatchReport::with_failures(ids.clone())),
                MockBehavior::Error(msg) => Err(msg.clone().into()),
                MockBehavior::Panic(msg) => panic!("{}", msg),
            }
        }
    }

    /// Mock schedule handler counting ticks
    #[derive(Clone, Default)]
    pub struct MockScheduleHandler {
        error: Option<String>,
        ticks: Arc<Mutex<Vec<ScheduleTick>>>,
    }

    impl MockScheduleHandler {
        pub fn new_success() -> Self {
            Self::default()
        }

        pub fn new_error(message: impl Into<String>) -> Self {
            Self {
                error: Some(message.into()),
                ..Default::default()
            }
        }

        pub fn call_count(&self) -> usize {
            self.ticks.lock().unwrap().len()
        }

        pub fn ticks(&self) -> Vec<ScheduleTick> {
            self.ticks.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ScheduleHandler for MockScheduleHandler {
        async fn handle(&self, _ctx: InvocationContext, tick: ScheduleTick) -> Result<(), BoxError> {
            self.ticks.lock().unwrap().push(tick);
            match &self.error {
                Some(msg) => Err(msg.clone().into()),
                None => Ok(()),
            }
        }
    }
}
