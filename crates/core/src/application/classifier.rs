//! Event Classifier
//!
//! Platform payloads carry no type tag, so classification inspects structure in
//! a fixed priority order:
//!
//! 1. `requestContext` with an HTTP method -> [`InboundEvent::HttpRequest`]
//! 2. non-empty `Records` of queue deliveries from one source -> [`InboundEvent::QueueBatch`]
//! 3. `source`/`detail-type` of a timer firing -> [`InboundEvent::ScheduleTick`]
//!
//! Anything else is [`InboundEvent::Unrecognized`]. There is no default handler.

use crate::application::gateway::encode_query_component;
use crate::domain::{
    GatewayRequest, GatewayVersion, InboundEvent, QueueBatch, QueueMessage, ScheduleTick,
};
use serde_json::{Map, Value};
use tracing::debug;

/// `eventSource` tag of queue delivery records
pub const QUEUE_EVENT_SOURCE: &str = "aws:sqs";
/// `source` of timer firings
pub const SCHEDULE_SOURCE: &str = "aws.events";
/// `detail-type` of timer firings
pub const SCHEDULE_DETAIL_TYPE: &str = "Scheduled Event";

/// Classify a raw invocation payload
pub fn classify(payload: &[u8]) -> InboundEvent {
    match serde_json::from_slice::<Value>(payload) {
        Ok(value) => classify_value(value),
        Err(e) => unrecognized(format!("payload is not valid JSON: {e}")),
    }
}

/// Classify an already-parsed payload
pub fn classify_value(value: Value) -> InboundEvent {
    let Some(obj) = value.as_object() else {
        return unrecognized("payload is not a JSON object");
    };

    if let Some((version, method)) = gateway_method(obj) {
        debug!(method = %method, "Payload classified as gateway request");
        return match parse_gateway(obj, version, method) {
            Ok(request) => InboundEvent::HttpRequest(request),
            Err(reason) => unrecognized(reason),
        };
    }

    if let Some(records) = obj.get("Records").and_then(Value::as_array) {
        return match parse_queue_batch(records) {
            Ok(batch) => {
                debug!(records = batch.len(), source_arn = %batch.source_arn, "Payload classified as queue batch");
                InboundEvent::QueueBatch(batch)
            }
            Err(reason) => unrecognized(reason),
        };
    }

    if is_schedule_tick(obj) {
        return match serde_json::from_value::<ScheduleTick>(value) {
            Ok(tick) => {
                debug!(event_id = %tick.id, "Payload classified as schedule tick");
                InboundEvent::ScheduleTick(tick)
            }
            Err(e) => unrecognized(format!("malformed scheduled event: {e}")),
        };
    }

    unrecognized("payload matches no gateway, queue or schedule shape")
}

fn unrecognized(reason: impl Into<String>) -> InboundEvent {
    InboundEvent::Unrecognized {
        reason: reason.into(),
    }
}

fn gateway_method(obj: &Map<String, Value>) -> Option<(GatewayVersion, String)> {
    let ctx = obj.get("requestContext")?.as_object()?;

    if let Some(method) = ctx
        .get("http")
        .and_then(|http| http.get("method"))
        .and_then(Value::as_str)
    {
        return Some((GatewayVersion::V2, method.to_string()));
    }

    ctx.get("httpMethod")
        .or_else(|| obj.get("httpMethod"))
        .and_then(Value::as_str)
        .map(|method| (GatewayVersion::V1, method.to_string()))
}

fn str_field<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(Value::as_str)
}

fn parse_gateway(
    obj: &Map<String, Value>,
    version: GatewayVersion,
    method: String,
) -> Result<GatewayRequest, String> {
    let mut headers: Vec<(String, String)> = Vec::new();
    let raw_query;
    let path;

    match version {
        GatewayVersion::V2 => {
            path = str_field(obj, "rawPath")
                .or_else(|| {
                    obj.get("requestContext")
                        .and_then(|c| c.get("http"))
                        .and_then(|h| h.get("path"))
                        .and_then(Value::as_str)
                })
                .unwrap_or("/")
                .to_string();
            raw_query = str_field(obj, "rawQueryString").unwrap_or("").to_string();

            if let Some(map) = obj.get("headers").and_then(Value::as_object) {
                for (name, value) in map {
                    if let Some(value) = value.as_str() {
                        headers.push((name.clone(), value.to_string()));
                    }
                }
            }
            if let Some(cookies) = obj.get("cookies").and_then(Value::as_array) {
                let joined: Vec<&str> = cookies.iter().filter_map(Value::as_str).collect();
                if !joined.is_empty() {
                    headers.push(("cookie".to_string(), joined.join("; ")));
                }
            }
        }
        GatewayVersion::V1 => {
            path = str_field(obj, "path").unwrap_or("/").to_string();
            raw_query = v1_query(obj);

            match obj.get("multiValueHeaders").and_then(Value::as_object) {
                Some(map) if !map.is_empty() => {
                    for (name, values) in map {
                        for value in values.as_array().into_iter().flatten() {
                            if let Some(value) = value.as_str() {
                                headers.push((name.clone(), value.to_string()));
                            }
                        }
                    }
                }
                _ => {
                    if let Some(map) = obj.get("headers").and_then(Value::as_object) {
                        for (name, value) in map {
                            if let Some(value) = value.as_str() {
                                headers.push((name.clone(), value.to_string()));
                            }
                        }
                    }
                }
            }
        }
    }

    if !path.starts_with('/') {
        return Err(format!("gateway request path '{path}' is not absolute"));
    }

    Ok(GatewayRequest {
        version,
        method,
        path,
        raw_query,
        headers,
        body: str_field(obj, "body").map(String::from),
        is_base64_encoded: obj
            .get("isBase64Encoded")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        request_context: obj.get("requestContext").cloned().unwrap_or(Value::Null),
    })
}

/// Rebuild an encoded query string from the decoded v1 parameter maps
fn v1_query(obj: &Map<String, Value>) -> String {
    let mut pairs: Vec<String> = Vec::new();

    match obj
        .get("multiValueQueryStringParameters")
        .and_then(Value::as_object)
    {
        Some(map) if !map.is_empty() => {
            for (name, values) in map {
                for value in values.as_array().into_iter().flatten() {
                    if let Some(value) = value.as_str() {
                        pairs.push(format!(
                            "{}={}",
                            encode_query_component(name),
                            encode_query_component(value)
                        ));
                    }
                }
            }
        }
        _ => {
            if let Some(map) = obj.get("queryStringParameters").and_then(Value::as_object) {
                for (name, value) in map {
                    if let Some(value) = value.as_str() {
                        pairs.push(format!(
                            "{}={}",
                            encode_query_component(name),
                            encode_query_component(value)
                        ));
                    }
                }
            }
        }
    }

    pairs.join("&")
}

fn parse_queue_batch(records: &[Value]) -> Result<QueueBatch, String> {
    if records.is_empty() {
        return Err("records array is empty".to_string());
    }

    let mut messages = Vec::with_capacity(records.len());
    for (idx, record) in records.iter().enumerate() {
        let source = record
            .get("eventSource")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if source != QUEUE_EVENT_SOURCE {
            return Err(format!(
                "record {idx} has event source '{source}', expected '{QUEUE_EVENT_SOURCE}'"
            ));
        }
        let message: QueueMessage = serde_json::from_value(record.clone())
            .map_err(|e| format!("record {idx} is not a queue delivery: {e}"))?;
        messages.push(message);
    }

    let source_arn = messages[0].event_source_arn.clone();
    if let Some(stray) = messages.iter().find(|m| m.event_source_arn != source_arn) {
        return Err(format!(
            "records come from more than one queue ('{}' and '{}')",
            source_arn, stray.event_source_arn
        ));
    }

    Ok(QueueBatch {
        source_arn,
        records: messages,
    })
}

fn is_schedule_tick(obj: &Map<String, Value>) -> bool {
    str_field(obj, "source") == Some(SCHEDULE_SOURCE)
        && str_field(obj, "detail-type") == Some(SCHEDULE_DETAIL_TYPE)
}
