use pricewatch_core::runtime::RunState;
use serde::{Deserialize, Serialize};

/// Request body for `POST /parse`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseRequest {
    pub url: String,
    /// Caller-supplied idempotency key; a fresh one is minted when absent
    /// so repeated manual requests are not deduplicated away.
    pub unique_key: Option<String>,
    /// Caller-side wait bound; the job itself keeps running past it.
    pub timeout_ms: Option<u64>,
}

/// Request body for `POST /parse/batch`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchParseRequest {
    pub urls: Vec<String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub runtime_state: RunState,
    pub queue_depth: usize,
}

#[derive(Debug, Serialize)]
pub struct ResumeResponse {
    pub state: RunState,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
