// Inbound Event Domain Model
//
// Tagged view over the untagged platform payloads. Only the classifier builds
// these; everything downstream matches on `InboundEvent`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Classified invocation payload
#[derive(Debug, Clone)]
pub enum InboundEvent {
    HttpRequest(GatewayRequest),
    QueueBatch(QueueBatch),
    ScheduleTick(ScheduleTick),
    Unrecognized { reason: String },
}

impl InboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::HttpRequest(_) => "http_request",
            InboundEvent::QueueBatch(_) => "queue_batch",
            InboundEvent::ScheduleTick(_) => "schedule_tick",
            InboundEvent::Unrecognized { .. } => "unrecognized",
        }
    }
}

/// API Gateway payload format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayVersion {
    /// REST API / payload format 1.0
    V1,
    /// HTTP API / payload format 2.0
    V2,
}

/// Gateway proxy request, normalized across payload versions
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub version: GatewayVersion,
    pub method: String,
    pub path: String,
    /// Already percent-encoded query string, without the leading `?`
    pub raw_query: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub is_base64_encoded: bool,
    pub request_context: serde_json::Value,
}

/// One queue delivery record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    pub message_id: String,
    #[serde(default)]
    pub receipt_handle: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default)]
    pub message_attributes: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5_of_body: Option<String>,
    pub event_source: String,
    #[serde(rename = "eventSourceARN")]
    pub event_source_arn: String,
    #[serde(default)]
    pub aws_region: String,
}

/// Batch of deliveries from a single queue
#[derive(Debug, Clone)]
pub struct QueueBatch {
    /// Event-source identifier shared by every record
    pub source_arn: String,
    pub records: Vec<QueueMessage>,
}

impl QueueBatch {
    pub fn message_ids(&self) -> Vec<String> {
        self.records.iter().map(|r| r.message_id.clone()).collect()
    }

    /// Physical queue name: the last `:` segment of the source ARN
    pub fn queue_name(&self) -> &str {
        arn_resource(&self.source_arn)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Timer firing delivered by the event bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleTick {
    pub id: String,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub detail: serde_json::Value,
}

impl ScheduleTick {
    /// Name of the rule that fired, taken from the first rule ARN in `resources`
    pub fn rule_name(&self) -> Option<&str> {
        self.resources
            .iter()
            .find_map(|arn| arn_resource(arn).strip_prefix("rule/"))
            .and_then(|rule| rule.rsplit('/').next())
            .filter(|name| !name.is_empty())
    }
}

/// Resource part of an ARN (everything after the fifth `:`), or the input if it is no ARN
fn arn_resource(arn: &str) -> &str {
    if arn.starts_with("arn:") {
        arn.splitn(6, ':').nth(5).unwrap_or(arn)
    } else {
        arn
    }
}
