use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Queue position class for a submitted job.
///
/// Urgent jobs are inserted at the front of the queue, so a single-shot
/// on-demand request preempts a large background backlog. Urgent jobs
/// therefore observe LIFO order among themselves; normal jobs are FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Normal,
    Urgent,
}

/// A single extraction job, created at submission and consumed exactly
/// once by the runtime loop.
#[derive(Debug, Clone)]
pub struct Job {
    pub target: String,
    /// Queue-level deduplication key, distinct from browser fingerprinting.
    pub fingerprint: String,
    /// Opaque id linking this job to its pending result in the correlator.
    pub correlation_key: Uuid,
    pub payload: serde_json::Map<String, serde_json::Value>,
    pub priority: JobPriority,
}

impl Job {
    pub fn new(target: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            fingerprint: fingerprint.into(),
            correlation_key: Uuid::new_v4(),
            payload: serde_json::Map::new(),
            priority: JobPriority::Urgent,
        }
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Map<String, serde_json::Value>) -> Self {
        self.payload = payload;
        self
    }
}

/// Result of an enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueResult {
    /// The fingerprint was already seen (pending, in flight, or completed).
    pub already_handled: bool,
}

/// Mint the default fingerprint for a fresh submission.
pub fn default_fingerprint(target: &str) -> String {
    format!("{}::{}", target, Utc::now().timestamp_millis())
}

/// Mint a forced fingerprint after a dedup collision, guaranteeing one
/// re-execution of an already-handled fingerprint. Deliberately
/// deterministic: a third submission of the same fingerprint collides
/// again and becomes unresolvable instead of silently re-running forever.
pub fn forced_fingerprint(fingerprint: &str) -> String {
    format!("{fingerprint}::force")
}

/// Mint a per-attempt fingerprint for cycle retries; the same fingerprint
/// would be deduplicated, so each retry gets a fresh one.
pub fn attempt_fingerprint(target: &str, attempt: u32) -> String {
    format!(
        "{}::{}::try{}",
        target,
        Utc::now().timestamp_millis(),
        attempt
    )
}
