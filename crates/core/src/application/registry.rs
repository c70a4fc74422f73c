// Handler Registry
//
// Built once at start-up through `HandlerRegistry::builder()` and shared
// read-only with the dispatcher. The `on_queue`/`on_schedule` call shapes are
// the ones the build-time scanner looks for.

use crate::application::naming::colliding_names;
use crate::domain::{DomainError, Layout, LogicalName, QueueDecl, ResourceKind, ScheduleDecl};
use crate::error::Result;
use crate::port::{HttpRouter, QueueHandler, ScheduleHandler};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Longest accepted logical name (queue names are capped at 80 chars on the platform)
pub const MAX_LOGICAL_NAME_LEN: usize = 64;

#[derive(Clone)]
pub struct ScheduleEntry {
    pub interval: Duration,
    pub handler: Arc<dyn ScheduleHandler>,
}

/// Immutable map of logical names to handlers plus the shared HTTP router
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    queues: BTreeMap<LogicalName, Arc<dyn QueueHandler>>,
    schedules: BTreeMap<LogicalName, ScheduleEntry>,
    http: Option<Arc<dyn HttpRouter>>,
}

impl HandlerRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn queue_handler(&self, logical_name: &str) -> Option<&Arc<dyn QueueHandler>> {
        self.queues.get(logical_name)
    }

    pub fn schedule(&self, logical_name: &str) -> Option<&ScheduleEntry> {
        self.schedules.get(logical_name)
    }

    pub fn http_router(&self) -> Option<&Arc<dyn HttpRouter>> {
        self.http.as_ref()
    }

    /// Runtime view of what is registered, in the same shape the scanner emits
    pub fn layout(&self) -> Layout {
        Layout::new(
            self.queues.keys().map(QueueDecl::new),
            self.schedules
                .iter()
                .map(|(name, entry)| ScheduleDecl::new(name.clone(), entry.interval)),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty() && self.schedules.is_empty() && self.http.is_none()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("queues", &self.queues.keys().collect::<Vec<_>>())
            .field("schedules", &self.schedules.keys().collect::<Vec<_>>())
            .field("http", &self.http.is_some())
            .finish()
    }
}

/// Single-writer builder for [`HandlerRegistry`]
#[derive(Default)]
pub struct RegistryBuilder {
    registry: HandlerRegistry,
    errors: Vec<DomainError>,
}

impl RegistryBuilder {
    /// Register the consumer for a logical queue
    ///
    /// Registering the same name twice keeps the last handler.
    pub fn on_queue(mut self, name: impl Into<String>, handler: impl QueueHandler + 'static) -> Self {
        let name = name.into();
        if let Err(e) = validate_name(ResourceKind::Queue, &name) {
            self.errors.push(e);
            return self;
        }
        if self
            .registry
            .queues
            .insert(name.clone(), Arc::new(handler))
            .is_some()
        {
            warn!(queue = %name, "Queue handler registered twice, keeping the last one");
        }
        self
    }

    /// Register the task for a logical schedule firing every `interval`
    pub fn on_schedule(
        mut self,
        name: impl Into<String>,
        interval: Duration,
        handler: impl ScheduleHandler + 'static,
    ) -> Self {
        let name = name.into();
        if let Err(e) = validate_name(ResourceKind::Schedule, &name) {
            self.errors.push(e);
            return self;
        }
        if interval.is_zero() {
            self.errors.push(DomainError::InvalidInterval(name));
            return self;
        }
        let entry = ScheduleEntry {
            interval,
            handler: Arc::new(handler),
        };
        if self.registry.schedules.insert(name.clone(), entry).is_some() {
            warn!(schedule = %name, "Schedule handler registered twice, keeping the last one");
        }
        self
    }

    /// Install the shared HTTP router
    pub fn http(mut self, router: impl HttpRouter + 'static) -> Self {
        self.registry.http = Some(Arc::new(router));
        self
    }

    /// Finish registration
    ///
    /// # Errors
    /// The first invalid name or interval passed to the builder, or two names
    /// of one kind that the naming bridge cannot tell apart.
    pub fn build(mut self) -> Result<HandlerRegistry> {
        if !self.errors.is_empty() {
            return Err(self.errors.remove(0).into());
        }

        let queue_names = self.registry.queues.keys().map(String::as_str);
        let schedule_names = self.registry.schedules.keys().map(String::as_str);
        for (kind, collisions) in [
            (ResourceKind::Queue, colliding_names(queue_names)),
            (ResourceKind::Schedule, colliding_names(schedule_names)),
        ] {
            if let Some((first, second)) = collisions.into_iter().next() {
                return Err(DomainError::NameCollision {
                    kind: kind.to_string(),
                    first,
                    second,
                }
                .into());
            }
        }

        Ok(self.registry)
    }
}

fn validate_name(kind: ResourceKind, name: &str) -> std::result::Result<(), DomainError> {
    let invalid = |reason: &str| DomainError::InvalidName {
        kind: kind.to_string(),
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.trim().is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.len() > MAX_LOGICAL_NAME_LEN {
        return Err(invalid("name is too long"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(invalid("only alphanumeric, '-', '_' and '.' are allowed"));
    }
    Ok(())
}
