//! Handler Dispatcher
//!
//! Routes one classified event to its handler and turns the handler's result
//! into the platform's acknowledgment protocol:
//!
//! - queue batches: the handler sees the whole batch once; a hard error or an
//!   unresolvable queue fails every message, otherwise only the reported ids
//!   (restricted to the batch) are failed
//! - schedule ticks: errors propagate unchanged, the timer service owns retries
//! - gateway requests: always the one shared router
//!
//! No retries, no extra deadline. The registry and name mapping are read-only.

use crate::application::classifier::classify;
use crate::application::gateway::{to_gateway_response, to_http_request};
use crate::application::naming::{NameMapping, Resolution};
use crate::application::panic_guard::{execute_guarded, PanicGuardResult};
use crate::application::registry::HandlerRegistry;
use crate::domain::{
    BatchOutcome, DispatchResult, GatewayRequest, InboundEvent, InvocationContext, QueueBatch,
    ResourceKind, ScheduleTick,
};
use crate::port::{BoxError, HttpResponse};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// Dispatch errors (every variant is logged at error level before it is returned)
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Unclassified event: {reason}")]
    UnclassifiedEvent { reason: String },

    #[error("No {kind} handler for '{name}'")]
    UnknownHandler { kind: ResourceKind, name: String },

    #[error("No HTTP router registered")]
    NoHttpRouter,

    #[error("Handler for '{target}' failed: {source}")]
    HandlerExecution {
        target: String,
        #[source]
        source: BoxError,
    },
}

impl DispatchError {
    /// Short type name reported to the platform
    pub fn error_type(&self) -> &'static str {
        match self {
            DispatchError::UnclassifiedEvent { .. } => "UnclassifiedEventError",
            DispatchError::UnknownHandler { .. } | DispatchError::NoHttpRouter => {
                "UnknownHandlerError"
            }
            DispatchError::HandlerExecution { .. } => "HandlerExecutionError",
        }
    }
}

/// Routes classified events to registered handlers
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    mapping: Arc<NameMapping>,
}

impl Dispatcher {
    pub fn new(registry: Arc<HandlerRegistry>, mapping: Arc<NameMapping>) -> Self {
        Self { registry, mapping }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn mapping(&self) -> &NameMapping {
        &self.mapping
    }

    /// Classify a raw payload and dispatch it
    pub async fn dispatch_payload(
        &self,
        ctx: InvocationContext,
        payload: &[u8],
    ) -> Result<DispatchResult, DispatchError> {
        self.dispatch(ctx, classify(payload)).await
    }

    /// Dispatch one classified event
    pub async fn dispatch(
        &self,
        ctx: InvocationContext,
        event: InboundEvent,
    ) -> Result<DispatchResult, DispatchError> {
        match event {
            InboundEvent::HttpRequest(request) => self.dispatch_http(ctx, request).await,
            InboundEvent::QueueBatch(batch) => Ok(DispatchResult::QueueBatchOutcome(
                self.dispatch_queue(ctx, batch).await,
            )),
            InboundEvent::ScheduleTick(tick) => self.dispatch_schedule(ctx, tick).await,
            InboundEvent::Unrecognized { reason } => {
                error!(request_id = %ctx.request_id, reason = %reason, "Unclassified event");
                Err(DispatchError::UnclassifiedEvent { reason })
            }
        }
    }

    /// Dispatch a queue batch; never fails, failures are expressed per message
    pub async fn dispatch_queue(&self, ctx: InvocationContext, batch: QueueBatch) -> BatchOutcome {
        let input_ids = batch.message_ids();
        let physical = batch.queue_name().to_string();

        let logical = match self.mapping.resolve(ResourceKind::Queue, &physical) {
            Resolution::Mapped(name) | Resolution::Inferred(name) => name,
            Resolution::Unknown => {
                error!(
                    request_id = %ctx.request_id,
                    physical_name = %physical,
                    message_count = input_ids.len(),
                    "Queue is not mapped to any logical name, failing whole batch"
                );
                return BatchOutcome::all_failed(None, input_ids);
            }
        };

        let Some(handler) = self.registry.queue_handler(&logical).cloned() else {
            error!(
                request_id = %ctx.request_id,
                queue = %logical,
                message_count = input_ids.len(),
                "No handler registered for queue, failing whole batch"
            );
            return BatchOutcome::all_failed(Some(logical), input_ids);
        };

        let request_id = ctx.request_id.clone();
        let result = execute_guarded(handler.handle(ctx, batch.records)).await;

        let report = match result {
            PanicGuardResult::Completed(Ok(report)) => report,
            PanicGuardResult::Completed(Err(e)) => {
                error!(
                    request_id = %request_id,
                    queue = %logical,
                    message_count = input_ids.len(),
                    error = %e,
                    "Queue handler failed, failing whole batch"
                );
                return BatchOutcome::all_failed(Some(logical), input_ids);
            }
            PanicGuardResult::Panicked(msg) => {
                error!(
                    request_id = %request_id,
                    queue = %logical,
                    message_count = input_ids.len(),
                    panic_msg = %msg,
                    "Queue handler panicked, failing whole batch"
                );
                return BatchOutcome::all_failed(Some(logical), input_ids);
            }
        };

        let outcome = restrict_to_batch(&logical, input_ids, report.failed_ids());
        info!(
            request_id = %request_id,
            queue = %logical,
            message_count = outcome.message_count,
            failed = outcome.failed_ids.len(),
            "Queue batch processed"
        );
        outcome
    }

    async fn dispatch_schedule(
        &self,
        ctx: InvocationContext,
        tick: ScheduleTick,
    ) -> Result<DispatchResult, DispatchError> {
        let Some(rule) = tick.rule_name().map(String::from) else {
            error!(request_id = %ctx.request_id, event_id = %tick.id, "Scheduled event names no rule");
            return Err(DispatchError::UnknownHandler {
                kind: ResourceKind::Schedule,
                name: String::new(),
            });
        };

        let logical = match self.mapping.resolve(ResourceKind::Schedule, &rule) {
            Resolution::Mapped(name) | Resolution::Inferred(name) => name,
            Resolution::Unknown => {
                error!(request_id = %ctx.request_id, physical_name = %rule, "Schedule rule is not mapped to any logical name");
                return Err(DispatchError::UnknownHandler {
                    kind: ResourceKind::Schedule,
                    name: rule,
                });
            }
        };

        let Some(entry) = self.registry.schedule(&logical).cloned() else {
            error!(request_id = %ctx.request_id, schedule = %logical, "No handler registered for schedule");
            return Err(DispatchError::UnknownHandler {
                kind: ResourceKind::Schedule,
                name: logical,
            });
        };

        let request_id = ctx.request_id.clone();
        let source: BoxError = match execute_guarded(entry.handler.handle(ctx, tick)).await {
            PanicGuardResult::Completed(Ok(())) => {
                info!(request_id = %request_id, schedule = %logical, "Schedule tick processed");
                return Ok(DispatchResult::ScheduleOutcome {
                    logical_name: logical,
                });
            }
            PanicGuardResult::Completed(Err(e)) => e,
            PanicGuardResult::Panicked(msg) => format!("handler panicked: {msg}").into(),
        };

        error!(request_id = %request_id, schedule = %logical, error = %source, "Schedule handler failed");
        Err(DispatchError::HandlerExecution {
            target: logical,
            source,
        })
    }

    async fn dispatch_http(
        &self,
        ctx: InvocationContext,
        request: GatewayRequest,
    ) -> Result<DispatchResult, DispatchError> {
        let Some(router) = self.registry.http_router().cloned() else {
            error!(request_id = %ctx.request_id, "Gateway request received but no HTTP router is registered");
            return Err(DispatchError::NoHttpRouter);
        };

        let version = request.version;
        let http_request = match to_http_request(&request) {
            Ok(req) => req,
            Err(e) => {
                warn!(request_id = %ctx.request_id, error = %e, "Rejecting malformed gateway request");
                return Ok(DispatchResult::HttpResponse(to_gateway_response(
                    HttpResponse::text(400, e.to_string()),
                    version,
                )));
            }
        };

        let target = format!("{} {}", http_request.method, request.path);
        let source: BoxError = match execute_guarded(router.route(http_request)).await {
            PanicGuardResult::Completed(Ok(response)) => {
                info!(request_id = %ctx.request_id, route = %target, status = response.status, "Gateway request served");
                return Ok(DispatchResult::HttpResponse(to_gateway_response(
                    response, version,
                )));
            }
            PanicGuardResult::Completed(Err(e)) => e,
            PanicGuardResult::Panicked(msg) => format!("router panicked: {msg}").into(),
        };

        error!(request_id = %ctx.request_id, route = %target, error = %source, "HTTP router failed");
        Err(DispatchError::HandlerExecution { target, source })
    }
}

/// Keep only reported ids that belong to the batch, in batch order
fn restrict_to_batch(queue: &str, input_ids: Vec<String>, reported: &[String]) -> BatchOutcome {
    let input: HashSet<&str> = input_ids.iter().map(String::as_str).collect();
    let strays: Vec<&str> = reported
        .iter()
        .map(String::as_str)
        .filter(|id| !input.contains(id))
        .collect();
    if !strays.is_empty() {
        warn!(
            queue = %queue,
            stray_ids = ?strays,
            "Handler reported failures for ids outside the batch, ignoring them"
        );
    }

    let reported: HashSet<&str> = reported.iter().map(String::as_str).collect();
    let failed_ids = input_ids
        .iter()
        .filter(|id| reported.contains(id.as_str()))
        .cloned()
        .collect();

    BatchOutcome {
        queue: Some(queue.to_string()),
        message_count: input_ids.len(),
        failed_ids,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{QueueMessage, ResourceKind};
    use crate::port::handler::mocks::{MockQueueHandler, MockScheduleHandler};
    use crate::port::{BatchReport, HttpRequest, HttpRouter};
    use async_trait::async_trait;
    use proptest::prelude::*;
    use serde_json::json;
    use std::time::Duration;

    const ORDERS_ARN: &str = "arn:aws:sqs:us-east-1:123456789012:acct-orders-42";

    fn message(id: &str, arn: &str) -> QueueMessage {
        QueueMessage {
            message_id: id.to_string(),
            receipt_handle: format!("rh-{id}"),
            body: format!("body-{id}"),
            attributes: Default::default(),
            message_attributes: Default::default(),
            md5_of_body: None,
            event_source: "aws:sqs".to_string(),
            event_source_arn: arn.to_string(),
            aws_region: "us-east-1".to_string(),
        }
    }

    fn batch(ids: &[&str]) -> QueueBatch {
        QueueBatch {
            source_arn: ORDERS_ARN.to_string(),
            records: ids.iter().map(|id| message(id, ORDERS_ARN)).collect(),
        }
    }

    fn mapping() -> Arc<NameMapping> {
        Arc::new(
            NameMapping::default()
                .with_entry(ResourceKind::Queue, "orders", "acct-orders-42")
                .with_entry(ResourceKind::Schedule, "nightly-sweep", "acct-nightly-rule"),
        )
    }

    fn dispatcher_with(handler: MockQueueHandler) -> Dispatcher {
        let registry = HandlerRegistry::builder()
            .on_queue("orders", handler)
            .build()
            .unwrap();
        Dispatcher::new(Arc::new(registry), mapping())
    }

    fn tick(rule: &str) -> ScheduleTick {
        serde_json::from_value(json!({
            "id": "evt-1",
            "time": "2024-05-01T00:00:00Z",
            "resources": [format!("arn:aws:events:us-east-1:123456789012:rule/{rule}")]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_partial_failure_reports_subset() {
        let handler = MockQueueHandler::new_failing(["m-2"]);
        let dispatcher = dispatcher_with(handler.clone());

        let outcome = dispatcher
            .dispatch_queue(InvocationContext::new("r-1"), batch(&["m-1", "m-2", "m-3"]))
            .await;

        assert_eq!(outcome.queue.as_deref(), Some("orders"));
        assert_eq!(outcome.failed_ids, vec!["m-2"]);
        assert_eq!(handler.call_count(), 1);
        assert_eq!(handler.batches()[0], vec!["m-1", "m-2", "m-3"]);
    }

    #[tokio::test]
    async fn test_handler_error_fails_whole_batch() {
        let dispatcher = dispatcher_with(MockQueueHandler::new_error("db down"));

        let outcome = dispatcher
            .dispatch_queue(InvocationContext::new("r-1"), batch(&["m-1", "m-2", "m-3"]))
            .await;

        assert_eq!(outcome.failed_ids, vec!["m-1", "m-2", "m-3"]);
    }

    #[tokio::test]
    async fn test_handler_panic_fails_whole_batch() {
        let dispatcher = dispatcher_with(MockQueueHandler::new_panic_inducing("boom"));

        let outcome = dispatcher
            .dispatch_queue(InvocationContext::new("r-1"), batch(&["m-1", "m-2"]))
            .await;

        assert_eq!(outcome.failed_ids, vec!["m-1", "m-2"]);
    }

    #[tokio::test]
    async fn test_stray_and_duplicate_ids_filtered() {
        let dispatcher = dispatcher_with(MockQueueHandler::new_failing([
            "m-3", "not-in-batch", "m-1", "m-3",
        ]));

        let outcome = dispatcher
            .dispatch_queue(InvocationContext::new("r-1"), batch(&["m-1", "m-2", "m-3"]))
            .await;

        assert_eq!(outcome.failed_ids, vec!["m-1", "m-3"]);
    }

    #[tokio::test]
    async fn test_unmapped_queue_fails_whole_batch() {
        let handler = MockQueueHandler::new_success();
        let dispatcher = dispatcher_with(handler.clone());
        let foreign = QueueBatch {
            source_arn: "arn:aws:sqs:us-east-1:1:someone-elses-queue".to_string(),
            records: vec![message("m-1", "arn:aws:sqs:us-east-1:1:someone-elses-queue")],
        };

        let outcome = dispatcher
            .dispatch_queue(InvocationContext::new("r-1"), foreign)
            .await;

        assert_eq!(outcome.queue, None);
        assert_eq!(outcome.failed_ids, vec!["m-1"]);
        assert_eq!(handler.call_count(), 0);
    }

    #[tokio::test]
    async fn test_mapped_queue_without_handler_fails_whole_batch() {
        let registry = HandlerRegistry::builder().build().unwrap();
        let dispatcher = Dispatcher::new(Arc::new(registry), mapping());

        let outcome = dispatcher
            .dispatch_queue(InvocationContext::new("r-1"), batch(&["m-1", "m-2"]))
            .await;

        assert_eq!(outcome.queue.as_deref(), Some("orders"));
        assert_eq!(outcome.failed_ids, vec!["m-1", "m-2"]);
    }

    #[tokio::test]
    async fn test_closure_handler() {
        let registry = HandlerRegistry::builder()
            .on_queue(
                "orders",
                |_ctx: InvocationContext, messages: Vec<QueueMessage>| async move {
                    let mut report = BatchReport::success();
                    for m in &messages {
                        if m.body.ends_with("m-1") {
                            report.fail(m.message_id.clone());
                        }
                    }
                    Ok::<_, BoxError>(report)
                },
            )
            .build()
            .unwrap();
        let dispatcher = Dispatcher::new(Arc::new(registry), mapping());

        let outcome = dispatcher
            .dispatch_queue(InvocationContext::new("r-1"), batch(&["m-1", "m-2"]))
            .await;
        assert_eq!(outcome.failed_ids, vec!["m-1"]);
    }

    #[tokio::test]
    async fn test_schedule_dispatch() {
        let handler = MockScheduleHandler::new_success();
        let registry = HandlerRegistry::builder()
            .on_schedule("nightly-sweep", Duration::from_secs(3600), handler.clone())
            .build()
            .unwrap();
        let dispatcher = Dispatcher::new(Arc::new(registry), mapping());

        let result = dispatcher
            .dispatch(
                InvocationContext::new("r-1"),
                InboundEvent::ScheduleTick(tick("acct-nightly-rule")),
            )
            .await
            .unwrap();

        assert_eq!(
            result,
            DispatchResult::ScheduleOutcome {
                logical_name: "nightly-sweep".to_string()
            }
        );
        assert_eq!(handler.call_count(), 1);
    }

    #[tokio::test]
    async fn test_schedule_error_propagates() {
        let registry = HandlerRegistry::builder()
            .on_schedule(
                "nightly-sweep",
                Duration::from_secs(3600),
                MockScheduleHandler::new_error("sweep failed"),
            )
            .build()
            .unwrap();
        let dispatcher = Dispatcher::new(Arc::new(registry), mapping());

        let err = dispatcher
            .dispatch(
                InvocationContext::new("r-1"),
                InboundEvent::ScheduleTick(tick("acct-nightly-rule")),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::HandlerExecution { .. }));
        assert!(err.to_string().contains("sweep failed"));
        assert_eq!(err.error_type(), "HandlerExecutionError");
    }

    #[tokio::test]
    async fn test_unknown_schedule() {
        let registry = HandlerRegistry::builder().build().unwrap();
        let dispatcher = Dispatcher::new(Arc::new(registry), mapping());

        let err = dispatcher
            .dispatch(
                InvocationContext::new("r-1"),
                InboundEvent::ScheduleTick(tick("unrelated-rule")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnknownHandler { .. }));

        // Mapped, but nothing registered
        let err = dispatcher
            .dispatch(
                InvocationContext::new("r-2"),
                InboundEvent::ScheduleTick(tick("acct-nightly-rule")),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::UnknownHandler { ref name, .. } if name == "nightly-sweep"
        ));
    }

    #[tokio::test]
    async fn test_unrecognized_payload() {
        let dispatcher = dispatcher_with(MockQueueHandler::new_success());
        let err = dispatcher
            .dispatch_payload(InvocationContext::new("r-1"), b"{}")
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnclassifiedEvent { .. }));
        assert_eq!(err.error_type(), "UnclassifiedEventError");
    }

    struct EchoRouter;

    #[async_trait]
    impl HttpRouter for EchoRouter {
        async fn route(&self, request: HttpRequest) -> Result<HttpResponse, BoxError> {
            if request.uri == "/fail" {
                return Err("router exploded".into());
            }
            Ok(HttpResponse {
                status: 200,
                headers: vec![("content-type".to_string(), "text/plain".to_string())],
                body: format!("{} {} {}", request.method, request.uri, request.body.len())
                    .into_bytes(),
            })
        }
    }

    fn gateway_payload(method: &str, path: &str) -> serde_json::Value {
        json!({
            "version": "2.0",
            "rawPath": path,
            "rawQueryString": "",
            "headers": {},
            "requestContext": {"http": {"method": method, "path": path}},
            "body": "abc",
            "isBase64Encoded": false
        })
    }

    #[tokio::test]
    async fn test_http_dispatch() {
        let registry = HandlerRegistry::builder().http(EchoRouter).build().unwrap();
        let dispatcher = Dispatcher::new(Arc::new(registry), mapping());

        let payload = gateway_payload("POST", "/orders");
        let result = dispatcher
            .dispatch_payload(InvocationContext::new("r-1"), payload.to_string().as_bytes())
            .await
            .unwrap();

        match result {
            DispatchResult::HttpResponse(response) => {
                assert_eq!(response.status_code, 200);
                assert_eq!(response.body, "POST /orders 3");
            }
            other => panic!("expected HttpResponse, got {other:?}"),
        }

        let payload = gateway_payload("POST", "/fail");
        let err = dispatcher
            .dispatch_payload(InvocationContext::new("r-2"), payload.to_string().as_bytes())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::HandlerExecution { .. }));

        let payload = gateway_payload("BREW", "/coffee");
        match dispatcher
            .dispatch_payload(InvocationContext::new("r-3"), payload.to_string().as_bytes())
            .await
            .unwrap()
        {
            DispatchResult::HttpResponse(response) => assert_eq!(response.status_code, 400),
            other => panic!("expected HttpResponse, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_gateway_header_is_bad_request() {
        let registry = HandlerRegistry::builder().http(EchoRouter).build().unwrap();
        let dispatcher = Dispatcher::new(Arc::new(registry), mapping());

        for headers in [
            json!({"x trace": "t-1"}),
            json!({"x-trace": "t-1\r\nx-injected: 1"}),
        ] {
            let mut payload = gateway_payload("GET", "/orders");
            payload["headers"] = headers;
            match dispatcher
                .dispatch_payload(InvocationContext::new("r-1"), payload.to_string().as_bytes())
                .await
                .unwrap()
            {
                DispatchResult::HttpResponse(response) => {
                    assert_eq!(response.status_code, 400);
                    assert!(response.body.contains("header"));
                }
                other => panic!("expected HttpResponse, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_http_without_router() {
        let dispatcher = dispatcher_with(MockQueueHandler::new_success());
        let payload = gateway_payload("GET", "/");
        let err = dispatcher
            .dispatch_payload(InvocationContext::new("r-1"), payload.to_string().as_bytes())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NoHttpRouter));
    }

    proptest! {
        #[test]
        fn prop_failed_ids_subset_of_batch(
            ids in proptest::collection::hash_set("[a-z0-9]{1,6}", 1..20),
            reported in proptest::collection::vec("[a-z0-9]{1,6}", 0..20),
        ) {
            let ids: Vec<String> = ids.into_iter().collect();
            let outcome = restrict_to_batch("orders", ids.clone(), &reported);

            prop_assert_eq!(outcome.message_count, ids.len());
            for id in &outcome.failed_ids {
                prop_assert!(ids.contains(id));
                prop_assert!(reported.contains(id));
            }
            for id in &reported {
                if ids.contains(id) {
                    prop_assert!(outcome.failed_ids.contains(id));
                }
            }
        }

        #[test]
        fn prop_outcome_independent_of_batch_order(
            ids in proptest::collection::hash_set("[a-z0-9]{1,6}", 1..20),
            pick in proptest::collection::vec(any::<bool>(), 20),
        ) {
            let ids: Vec<String> = ids.into_iter().collect();
            let reported: Vec<String> = ids
                .iter()
                .zip(pick.iter())
                .filter(|(_, keep)| **keep)
                .map(|(id, _)| id.clone())
                .collect();

            let mut reversed = ids.clone();
            reversed.reverse();

            let forward: HashSet<String> =
                restrict_to_batch("q", ids, &reported).failed_ids.into_iter().collect();
            let backward: HashSet<String> =
                restrict_to_batch("q", reversed, &reported).failed_ids.into_iter().collect();
            let expected: HashSet<String> = reported.into_iter().collect();

            prop_assert_eq!(&forward, &expected);
            prop_assert_eq!(&backward, &expected);
        }
    }
}
