// Dispatch Outcome Domain Model

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::layout::LogicalName;

/// Result of dispatching one classified event
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchResult {
    HttpResponse(GatewayResponse),
    QueueBatchOutcome(BatchOutcome),
    /// Schedule handler finished without error; errors surface as `DispatchError`
    ScheduleOutcome { logical_name: LogicalName },
}

impl DispatchResult {
    /// Platform wire encoding of the outcome
    pub fn into_response_json(self) -> serde_json::Value {
        match self {
            DispatchResult::HttpResponse(response) => {
                serde_json::to_value(response).unwrap_or(serde_json::Value::Null)
            }
            DispatchResult::QueueBatchOutcome(outcome) => outcome.to_response_json(),
            DispatchResult::ScheduleOutcome { .. } => serde_json::Value::Null,
        }
    }
}

/// Partial batch failure report
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Logical queue the batch was resolved to, if any
    pub queue: Option<LogicalName>,
    pub message_count: usize,
    /// Always a subset of the batch's message ids, in batch order
    pub failed_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemFailure {
    pub item_identifier: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchResponse<'a> {
    batch_item_failures: Vec<BatchItemFailureRef<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchItemFailureRef<'a> {
    item_identifier: &'a str,
}

impl BatchOutcome {
    pub fn all_failed(queue: Option<LogicalName>, ids: Vec<String>) -> Self {
        Self {
            queue,
            message_count: ids.len(),
            failed_ids: ids,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed_ids.is_empty()
    }

    pub fn item_failures(&self) -> Vec<BatchItemFailure> {
        self.failed_ids
            .iter()
            .map(|id| BatchItemFailure {
                item_identifier: id.clone(),
            })
            .collect()
    }

    pub fn to_response_json(&self) -> serde_json::Value {
        let response = BatchResponse {
            batch_item_failures: self
                .failed_ids
                .iter()
                .map(|id| BatchItemFailureRef { item_identifier: id })
                .collect(),
        };
        serde_json::to_value(response).unwrap_or(serde_json::Value::Null)
    }
}

/// Gateway proxy response envelope
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayResponse {
    pub status_code: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub multi_value_headers: BTreeMap<String, Vec<String>>,
    /// Set-Cookie values (payload format 2.0 only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cookies: Vec<String>,
    pub body: String,
    pub is_base64_encoded: bool,
}
