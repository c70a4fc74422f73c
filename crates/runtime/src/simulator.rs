// Local Simulator
//
// Emulates queue deliveries, timer firings and gateway requests against a
// dispatcher. Every event is encoded in the platform's wire shape and goes
// through `classify`, so local runs take the same path as production.
//
// Queue semantics follow the platform: batches of at most ten, failed ids are
// redelivered with a growing receive count, and a message that fails
// `max_receives` times moves to the queue's dead-letter list.

use crate::error::{Result, RuntimeError};
use crate::shutdown::ShutdownToken;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::SecondsFormat;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use switchyard_core::application::classifier::{
    QUEUE_EVENT_SOURCE, SCHEDULE_DETAIL_TYPE, SCHEDULE_SOURCE,
};
use switchyard_core::application::naming::physical_name;
use switchyard_core::application::Dispatcher;
use switchyard_core::domain::{
    DispatchResult, InvocationContext, LogicalName, QueueMessage, ResourceKind,
};
use switchyard_core::port::{
    HttpRequest, HttpResponse, IdProvider, SystemTimeProvider, TimeProvider, UuidProvider,
};
use switchyard_core::CoreError;
use tokio::sync::Mutex;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub const LOCAL_REGION: &str = "local-1";
pub const LOCAL_ACCOUNT: &str = "000000000000";

/// Largest batch the platform hands to one invocation
pub const MAX_BATCH_SIZE: usize = 10;

const RECEIVE_COUNT_ATTRIBUTE: &str = "ApproximateReceiveCount";
const SENT_TIMESTAMP_ATTRIBUTE: &str = "SentTimestamp";

/// Outcome of `send_messages`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReport {
    pub queue: LogicalName,
    /// Message ids that were eventually processed
    pub delivered: Vec<String>,
    /// Message ids moved to the dead-letter list
    pub dead_lettered: Vec<String>,
    /// Batch invocations performed, redeliveries included
    pub invocations: u32,
}

#[derive(Serialize)]
struct QueueEnvelope<'a> {
    #[serde(rename = "Records")]
    records: Vec<&'a QueueMessage>,
}

#[derive(Serialize)]
struct ScheduleEnvelope {
    version: &'static str,
    id: String,
    #[serde(rename = "detail-type")]
    detail_type: &'static str,
    source: &'static str,
    account: &'static str,
    time: String,
    region: &'static str,
    resources: Vec<String>,
    detail: Value,
}

pub struct LocalSimulator {
    dispatcher: Dispatcher,
    max_receives: u32,
    ids: Arc<dyn IdProvider>,
    clock: Arc<dyn TimeProvider>,
    dead_letters: Mutex<HashMap<LogicalName, Vec<QueueMessage>>>,
}

impl LocalSimulator {
    pub fn new(dispatcher: Dispatcher, max_receives: u32) -> Self {
        Self {
            dispatcher,
            max_receives: max_receives.max(1),
            ids: Arc::new(UuidProvider),
            clock: Arc::new(SystemTimeProvider),
            dead_letters: Mutex::new(HashMap::new()),
        }
    }

    /// Replace id and time sources (deterministic tests)
    pub fn with_providers(mut self, ids: Arc<dyn IdProvider>, clock: Arc<dyn TimeProvider>) -> Self {
        self.ids = ids;
        self.clock = clock;
        self
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Enqueue `bodies` on a logical queue and deliver them until each one
    /// succeeds or is dead-lettered
    pub async fn send_messages<I, S>(&self, queue: &str, bodies: I) -> Result<SendReport>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let physical = self.physical(ResourceKind::Queue, queue);
        let source_arn = format!("arn:aws:sqs:{LOCAL_REGION}:{LOCAL_ACCOUNT}:{physical}");
        let sent_at = self.clock.now_millis().to_string();

        let messages: Vec<QueueMessage> = bodies
            .into_iter()
            .map(|body| {
                let mut attributes = HashMap::new();
                attributes.insert(SENT_TIMESTAMP_ATTRIBUTE.to_string(), sent_at.clone());
                QueueMessage {
                    message_id: self.ids.generate_id(),
                    receipt_handle: String::new(),
                    body: body.into(),
                    attributes,
                    message_attributes: HashMap::new(),
                    md5_of_body: None,
                    event_source: QUEUE_EVENT_SOURCE.to_string(),
                    event_source_arn: source_arn.clone(),
                    aws_region: LOCAL_REGION.to_string(),
                }
            })
            .collect();

        let mut report = SendReport {
            queue: queue.to_string(),
            ..Default::default()
        };
        let mut dead = Vec::new();

        for chunk in messages.chunks(MAX_BATCH_SIZE) {
            let mut in_flight: Vec<(QueueMessage, u32)> =
                chunk.iter().cloned().map(|m| (m, 0)).collect();

            while !in_flight.is_empty() {
                for (message, receives) in in_flight.iter_mut() {
                    *receives += 1;
                    message
                        .attributes
                        .insert(RECEIVE_COUNT_ATTRIBUTE.to_string(), receives.to_string());
                    message.receipt_handle = self.ids.generate_id();
                }

                let failed = self.deliver(queue, &in_flight).await?;
                report.invocations += 1;

                let mut retry = Vec::new();
                for (message, receives) in in_flight.drain(..) {
                    if !failed.contains(&message.message_id) {
                        report.delivered.push(message.message_id);
                    } else if receives >= self.max_receives {
                        warn!(
                            queue = %queue,
                            message_id = %message.message_id,
                            receives,
                            "Message exceeded max receives, moved to dead-letter list"
                        );
                        report.dead_lettered.push(message.message_id.clone());
                        dead.push(message);
                    } else {
                        retry.push((message, receives));
                    }
                }
                in_flight = retry;
            }
        }

        if !dead.is_empty() {
            self.dead_letters
                .lock()
                .await
                .entry(queue.to_string())
                .or_default()
                .extend(dead);
        }

        info!(
            queue = %queue,
            delivered = report.delivered.len(),
            dead_lettered = report.dead_lettered.len(),
            invocations = report.invocations,
            "Simulated send finished"
        );
        Ok(report)
    }

    /// One batch invocation; returns the ids to redeliver
    async fn deliver(&self, queue: &str, in_flight: &[(QueueMessage, u32)]) -> Result<HashSet<String>> {
        let envelope = QueueEnvelope {
            records: in_flight.iter().map(|(m, _)| m).collect(),
        };
        let payload = serde_json::to_vec(&envelope)?;

        match self.dispatcher.dispatch_payload(self.context(), &payload).await {
            Ok(DispatchResult::QueueBatchOutcome(outcome)) => {
                debug!(queue = %queue, failed = outcome.failed_ids.len(), "Batch delivered");
                Ok(outcome.failed_ids.into_iter().collect())
            }
            Ok(_) => Err(RuntimeError::Simulation(format!(
                "queue batch for '{queue}' was not dispatched as a queue batch"
            ))),
            Err(e) => {
                error!(queue = %queue, error = %e, "Batch dispatch failed, redelivering all");
                Ok(in_flight.iter().map(|(m, _)| m.message_id.clone()).collect())
            }
        }
    }

    /// Messages dead-lettered so far for a logical queue
    pub async fn dead_letters(&self, queue: &str) -> Vec<QueueMessage> {
        self.dead_letters
            .lock()
            .await
            .get(queue)
            .cloned()
            .unwrap_or_default()
    }

    /// Fire a logical schedule once
    pub async fn fire_schedule(&self, name: &str) -> Result<DispatchResult> {
        let physical = self.physical(ResourceKind::Schedule, name);
        let envelope = ScheduleEnvelope {
            version: "0",
            id: self.ids.generate_id(),
            detail_type: SCHEDULE_DETAIL_TYPE,
            source: SCHEDULE_SOURCE,
            account: LOCAL_ACCOUNT,
            time: self.clock.now().to_rfc3339_opts(SecondsFormat::Secs, true),
            region: LOCAL_REGION,
            resources: vec![format!(
                "arn:aws:events:{LOCAL_REGION}:{LOCAL_ACCOUNT}:rule/{physical}"
            )],
            detail: Value::Object(Map::new()),
        };
        let payload = serde_json::to_vec(&envelope)?;

        let result = self
            .dispatcher
            .dispatch_payload(self.context(), &payload)
            .await
            .map_err(CoreError::from)?;
        debug!(schedule = %name, "Schedule fired");
        Ok(result)
    }

    /// Serve one request through the shared router, wrapped as a v2 gateway event
    pub async fn http(&self, request: HttpRequest) -> Result<HttpResponse> {
        let (path, query) = request
            .uri
            .split_once('?')
            .unwrap_or((request.uri.as_str(), ""));

        let mut headers = Map::new();
        let mut cookies = Vec::new();
        for (name, value) in &request.headers {
            let name = name.to_ascii_lowercase();
            if name == "cookie" {
                cookies.extend(value.split(';').map(|c| Value::from(c.trim())));
                continue;
            }
            let joined = match headers.get(&name).and_then(Value::as_str) {
                Some(existing) => format!("{existing},{value}"),
                None => value.clone(),
            };
            headers.insert(name, Value::from(joined));
        }

        let (body, is_base64_encoded) = match std::str::from_utf8(&request.body) {
            Ok(text) => (text.to_string(), false),
            Err(_) => (BASE64.encode(&request.body), true),
        };

        let user_agent = headers
            .get("user-agent")
            .cloned()
            .unwrap_or_else(|| Value::from("switchyard-local"));
        let envelope = json!({
            "version": "2.0",
            "routeKey": "$default",
            "rawPath": path,
            "rawQueryString": query,
            "cookies": cookies,
            "headers": headers,
            "requestContext": {
                "accountId": LOCAL_ACCOUNT,
                "apiId": "local",
                "domainName": "localhost",
                "http": {
                    "method": request.method,
                    "path": path,
                    "protocol": "HTTP/1.1",
                    "sourceIp": "127.0.0.1",
                    "userAgent": user_agent,
                },
                "requestId": self.ids.generate_id(),
                "routeKey": "$default",
                "stage": "$default",
                "timeEpoch": self.clock.now_millis(),
            },
            "body": body,
            "isBase64Encoded": is_base64_encoded,
        });
        let payload = serde_json::to_vec(&envelope)?;

        let result = self
            .dispatcher
            .dispatch_payload(self.context(), &payload)
            .await
            .map_err(CoreError::from)?;
        let DispatchResult::HttpResponse(response) = result else {
            return Err(RuntimeError::Simulation(
                "gateway request was not answered with an HTTP response".to_string(),
            ));
        };

        let mut headers: Vec<(String, String)> = response.headers.into_iter().collect();
        for (name, values) in response.multi_value_headers {
            headers.extend(values.into_iter().map(|v| (name.clone(), v)));
        }
        headers.extend(
            response
                .cookies
                .into_iter()
                .map(|c| ("set-cookie".to_string(), c)),
        );

        let body = if response.is_base64_encoded {
            BASE64
                .decode(response.body.as_bytes())
                .map_err(|e| RuntimeError::Simulation(format!("invalid base64 response: {e}")))?
        } else {
            response.body.into_bytes()
        };

        Ok(HttpResponse {
            status: response.status_code,
            headers,
            body,
        })
    }

    /// Fire every registered schedule at its interval until shutdown
    pub async fn run_schedules(&self, shutdown: ShutdownToken) {
        let schedules = self.dispatcher.registry().layout().schedules().to_vec();
        if schedules.is_empty() {
            info!("No schedules registered, nothing to simulate");
            return;
        }

        let loops = schedules.into_iter().map(|decl| {
            let mut shutdown = shutdown.clone();
            async move {
                info!(
                    schedule = %decl.logical_name,
                    interval_ms = decl.interval.as_millis() as u64,
                    "Simulating schedule"
                );
                let mut ticker = interval_at(Instant::now() + decl.interval, decl.interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(e) = self.fire_schedule(&decl.logical_name).await {
                                error!(schedule = %decl.logical_name, error = %e, "Simulated schedule failed");
                            }
                        }
                        _ = shutdown.wait() => break,
                    }
                }
            }
        });

        futures::future::join_all(loops).await;
        info!("Schedule simulation stopped");
    }

    fn physical(&self, kind: ResourceKind, logical: &str) -> String {
        let mapping = self.dispatcher.mapping();
        mapping
            .physical_for(kind, logical)
            .map(String::from)
            .unwrap_or_else(|| physical_name(mapping.prefix(), kind, logical))
    }

    fn context(&self) -> InvocationContext {
        InvocationContext::new(self.ids.generate_id()).with_function_arn(format!(
            "arn:aws:lambda:{LOCAL_REGION}:{LOCAL_ACCOUNT}:function:switchyard-local"
        ))
    }
}
