// Platform Invocation Loop
//
// Long-polls the runtime API for the next event, dispatches it and posts the
// outcome back. One invocation at a time per process.

use crate::error::{Result, RuntimeError};
use crate::shutdown::ShutdownToken;
use reqwest::header::HeaderMap;
use serde::Serialize;
use std::time::{Duration, Instant};
use switchyard_core::application::{DispatchError, Dispatcher};
use switchyard_core::domain::InvocationContext;
use tokio::time::sleep;
use tracing::{error, info, warn};

pub const RUNTIME_API_VERSION: &str = "2018-06-01";

const REQUEST_ID_HEADER: &str = "lambda-runtime-aws-request-id";
const DEADLINE_HEADER: &str = "lambda-runtime-deadline-ms";
const FUNCTION_ARN_HEADER: &str = "lambda-runtime-invoked-function-arn";
const ERROR_TYPE_HEADER: &str = "lambda-runtime-function-error-type";

const ERROR_RECOVERY_DELAY: Duration = Duration::from_secs(1);

/// One event fetched from the runtime API
#[derive(Debug, Clone)]
pub struct Invocation {
    pub ctx: InvocationContext,
    pub payload: Vec<u8>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody<'a> {
    error_type: &'a str,
    error_message: String,
}

pub struct LambdaRuntime {
    client: reqwest::Client,
    base_url: String,
    dispatcher: Dispatcher,
}

impl LambdaRuntime {
    /// `runtime_api` is the `host:port` advertised by the platform
    pub fn new(runtime_api: &str, dispatcher: Dispatcher) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: format!("http://{runtime_api}/{RUNTIME_API_VERSION}/runtime"),
            dispatcher,
        }
    }

    /// Process invocations until shutdown
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        info!(base_url = %self.base_url, "Runtime loop started");

        loop {
            if shutdown.is_shutdown() {
                break;
            }

            let next = tokio::select! {
                next = self.next_invocation() => next,
                _ = shutdown.wait() => {
                    info!("Runtime loop interrupted while waiting for an invocation");
                    break;
                }
            };

            let handled = match next {
                Ok(invocation) => self.handle(invocation).await,
                Err(e) => Err(e),
            };

            if let Err(e) = handled {
                error!(error = %e, "Runtime API error");
                tokio::select! {
                    _ = sleep(ERROR_RECOVERY_DELAY) => {},
                    _ = shutdown.wait() => break,
                }
            }
        }

        info!("Runtime loop stopped");
        Ok(())
    }

    /// Block until the platform hands over the next event
    pub async fn next_invocation(&self) -> Result<Invocation> {
        let path = format!("{}/invocation/next", self.base_url);
        let response = self.client.get(&path).send().await?;
        if !response.status().is_success() {
            return Err(RuntimeError::RuntimeApi {
                status: response.status().as_u16(),
                path,
            });
        }

        let ctx = invocation_context(response.headers())?;
        let payload = response.bytes().await?.to_vec();
        Ok(Invocation { ctx, payload })
    }

    /// Dispatch one invocation and report its outcome
    ///
    /// Dispatch failures are reported to the platform, so only runtime API
    /// failures surface as `Err`.
    pub async fn handle(&self, invocation: Invocation) -> Result<()> {
        let request_id = invocation.ctx.request_id.clone();
        let started = Instant::now();

        match self
            .dispatcher
            .dispatch_payload(invocation.ctx, &invocation.payload)
            .await
        {
            Ok(result) => {
                self.post_response(&request_id, &result.into_response_json())
                    .await?;
                info!(
                    request_id = %request_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Invocation completed"
                );
            }
            Err(e) => {
                error!(
                    request_id = %request_id,
                    error_type = e.error_type(),
                    error = %e,
                    "Invocation failed"
                );
                self.post_error(&request_id, &e).await?;
            }
        }
        Ok(())
    }

    async fn post_response(&self, request_id: &str, body: &serde_json::Value) -> Result<()> {
        let path = format!("{}/invocation/{request_id}/response", self.base_url);
        let response = self.client.post(&path).json(body).send().await?;
        check_accepted(response.status(), path)
    }

    async fn post_error(&self, request_id: &str, err: &DispatchError) -> Result<()> {
        let path = format!("{}/invocation/{request_id}/error", self.base_url);
        let body = ErrorBody {
            error_type: err.error_type(),
            error_message: err.to_string(),
        };
        let response = self
            .client
            .post(&path)
            .header(ERROR_TYPE_HEADER, err.error_type())
            .json(&body)
            .send()
            .await?;
        check_accepted(response.status(), path)
    }
}

/// Report a start-up failure; the platform then recycles the environment
pub async fn report_init_error(runtime_api: &str, error_type: &str, message: &str) -> Result<()> {
    let path = format!("http://{runtime_api}/{RUNTIME_API_VERSION}/runtime/init/error");
    let body = ErrorBody {
        error_type,
        error_message: message.to_string(),
    };
    let response = reqwest::Client::new()
        .post(&path)
        .header(ERROR_TYPE_HEADER, error_type)
        .json(&body)
        .send()
        .await?;
    check_accepted(response.status(), path)
}

fn invocation_context(headers: &HeaderMap) -> Result<InvocationContext> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    let request_id = header(REQUEST_ID_HEADER)
        .filter(|id| !id.is_empty())
        .ok_or(RuntimeError::MissingHeader(REQUEST_ID_HEADER))?;
    let mut ctx = InvocationContext::new(request_id);

    match header(DEADLINE_HEADER).map(str::parse::<i64>) {
        Some(Ok(deadline_ms)) => ctx = ctx.with_deadline(deadline_ms),
        Some(Err(_)) => warn!(request_id = %request_id, "Unparseable invocation deadline ignored"),
        None => {}
    }
    if let Some(arn) = header(FUNCTION_ARN_HEADER) {
        ctx = ctx.with_function_arn(arn);
    }
    Ok(ctx)
}

fn check_accepted(status: reqwest::StatusCode, path: String) -> Result<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(RuntimeError::RuntimeApi {
            status: status.as_u16(),
            path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::shutdown_channel;
    use axum::extract::{Path, State};
    use axum::http::{HeaderMap as AxumHeaders, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::Arc;
    use switchyard_core::application::{HandlerRegistry, NameMapping};
    use switchyard_core::domain::{Layout, QueueDecl, ResourceKind};
    use switchyard_core::port::handler::mocks::MockQueueHandler;
    use tokio::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    struct Posted {
        kind: &'static str,
        request_id: String,
        error_type: Option<String>,
        body: Value,
    }

    #[derive(Clone, Default)]
    struct FakeRuntimeApi {
        pending: Arc<Mutex<VecDeque<(String, Value)>>>,
        posted: Arc<Mutex<Vec<Posted>>>,
    }

    async fn next(State(api): State<FakeRuntimeApi>) -> Response {
        let Some((request_id, payload)) = api.pending.lock().await.pop_front() else {
            return std::future::pending::<Response>().await;
        };
        (
            [
                (REQUEST_ID_HEADER.to_string(), request_id),
                (DEADLINE_HEADER.to_string(), "4102444800000".to_string()),
                (
                    FUNCTION_ARN_HEADER.to_string(),
                    "arn:aws:lambda:us-east-1:123456789012:function:app".to_string(),
                ),
            ],
            Json(payload),
        )
            .into_response()
    }

    async fn response(
        State(api): State<FakeRuntimeApi>,
        Path(request_id): Path<String>,
        Json(body): Json<Value>,
    ) -> StatusCode {
        api.posted.lock().await.push(Posted {
            kind: "response",
            request_id,
            error_type: None,
            body,
        });
        StatusCode::ACCEPTED
    }

    async fn error(
        State(api): State<FakeRuntimeApi>,
        Path(request_id): Path<String>,
        headers: AxumHeaders,
        Json(body): Json<Value>,
    ) -> StatusCode {
        api.posted.lock().await.push(Posted {
            kind: "error",
            request_id,
            error_type: headers
                .get(ERROR_TYPE_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(String::from),
            body,
        });
        StatusCode::ACCEPTED
    }

    async fn init_error(
        State(api): State<FakeRuntimeApi>,
        headers: AxumHeaders,
        Json(body): Json<Value>,
    ) -> StatusCode {
        api.posted.lock().await.push(Posted {
            kind: "init-error",
            request_id: String::new(),
            error_type: headers
                .get(ERROR_TYPE_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(String::from),
            body,
        });
        StatusCode::ACCEPTED
    }

    async fn start(api: FakeRuntimeApi) -> String {
        let app = Router::new()
            .route("/2018-06-01/runtime/invocation/next", get(next))
            .route("/2018-06-01/runtime/invocation/:id/response", post(response))
            .route("/2018-06-01/runtime/invocation/:id/error", post(error))
            .route("/2018-06-01/runtime/init/error", post(init_error))
            .with_state(api);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        addr.to_string()
    }

    fn dispatcher(handler: MockQueueHandler) -> Dispatcher {
        let registry = HandlerRegistry::builder()
            .on_queue("orders", handler)
            .build()
            .unwrap();
        let layout = Layout::new(vec![QueueDecl::new("orders")], vec![]);
        let mapping = NameMapping::new("SWITCHYARD", &layout).with_entry(
            ResourceKind::Queue,
            "orders",
            "acct-orders-42",
        );
        Dispatcher::new(Arc::new(registry), Arc::new(mapping))
    }

    fn batch(ids: &[&str]) -> Value {
        let records: Vec<Value> = ids
            .iter()
            .map(|id| {
                json!({
                    "messageId": id,
                    "receiptHandle": format!("rh-{id}"),
                    "body": "{}",
                    "eventSource": "aws:sqs",
                    "eventSourceARN": "arn:aws:sqs:us-east-1:123456789012:acct-orders-42",
                    "awsRegion": "us-east-1"
                })
            })
            .collect();
        json!({ "Records": records })
    }

    #[tokio::test]
    async fn test_queue_batch_posts_partial_failures() {
        let api = FakeRuntimeApi::default();
        api.pending
            .lock()
            .await
            .push_back(("req-1".to_string(), batch(&["m1", "m2", "m3"])));
        let addr = start(api.clone()).await;

        let handler = MockQueueHandler::new_failing(["m2"]);
        let runtime = LambdaRuntime::new(&addr, dispatcher(handler.clone()));

        let invocation = runtime.next_invocation().await.unwrap();
        assert_eq!(invocation.ctx.request_id, "req-1");
        assert_eq!(invocation.ctx.deadline_ms, Some(4_102_444_800_000));
        assert!(invocation.ctx.invoked_function_arn.is_some());

        runtime.handle(invocation).await.unwrap();

        let posted = api.posted.lock().await.clone();
        assert_eq!(
            posted,
            vec![Posted {
                kind: "response",
                request_id: "req-1".to_string(),
                error_type: None,
                body: json!({ "batchItemFailures": [{ "itemIdentifier": "m2" }] }),
            }]
        );
        assert_eq!(handler.call_count(), 1);
    }

    #[tokio::test]
    async fn test_unrecognized_payload_posts_error() {
        let api = FakeRuntimeApi::default();
        api.pending
            .lock()
            .await
            .push_back(("req-2".to_string(), json!({ "hello": "world" })));
        let addr = start(api.clone()).await;

        let runtime = LambdaRuntime::new(&addr, dispatcher(MockQueueHandler::new_success()));
        let invocation = runtime.next_invocation().await.unwrap();
        runtime.handle(invocation).await.unwrap();

        let posted = api.posted.lock().await.clone();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].kind, "error");
        assert_eq!(posted[0].error_type.as_deref(), Some("UnclassifiedEventError"));
        assert_eq!(posted[0].body["errorType"], "UnclassifiedEventError");
        assert!(posted[0].body["errorMessage"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_run_processes_then_stops_on_shutdown() {
        let api = FakeRuntimeApi::default();
        api.pending
            .lock()
            .await
            .push_back(("req-3".to_string(), batch(&["m1"])));
        let addr = start(api.clone()).await;

        let runtime = LambdaRuntime::new(&addr, dispatcher(MockQueueHandler::new_success()));
        let (tx, token) = shutdown_channel();
        let task = tokio::spawn(async move { runtime.run(token).await });

        for _ in 0..100 {
            if !api.posted.lock().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tx.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());

        let posted = api.posted.lock().await.clone();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].body, json!({ "batchItemFailures": [] }));
    }

    #[tokio::test]
    async fn test_report_init_error() {
        let api = FakeRuntimeApi::default();
        let addr = start(api.clone()).await;

        report_init_error(&addr, "ConfigError", "bad prefix").await.unwrap();

        let posted = api.posted.lock().await.clone();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].kind, "init-error");
        assert_eq!(posted[0].error_type.as_deref(), Some("ConfigError"));
        assert_eq!(
            posted[0].body,
            json!({ "errorType": "ConfigError", "errorMessage": "bad prefix" })
        );
    }

    #[test]
    fn test_missing_request_id_is_an_error() {
        let headers = HeaderMap::new();
        assert!(matches!(
            invocation_context(&headers),
            Err(RuntimeError::MissingHeader(REQUEST_ID_HEADER))
        ));
    }
}
