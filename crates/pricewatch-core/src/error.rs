use thiserror::Error;

/// Application-wide error types for pricewatch.
#[derive(Error, Debug)]
pub enum WatchError {
    /// No extractor is registered for the target's market.
    #[error("No extractor registered for market '{0}'")]
    NoExtractor(String),

    /// The extractor ran but failed to produce a usable result
    /// (threw, or the mandatory price field was missing).
    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    /// Navigation/page-ready wait exceeded its bound.
    #[error("Navigation timed out after {0} ms")]
    NavigationTimeout(u64),

    /// Caller-side timeout: the job may still be running in the background.
    #[error("Timed out after {0} ms waiting for extraction result")]
    JobTimeout(u64),

    /// Fingerprint still collided after a forced resubmission.
    #[error("Job already handled and forced resubmission collided: {0}")]
    DuplicateUnresolvable(String),

    /// The work-list source was unreachable or returned a malformed shape.
    /// Aborts the whole cycle.
    #[error("Work-list fetch failed: {0}")]
    SourceFetchFailed(String),

    /// Report POST failed. Logged only, never retried.
    #[error("Report delivery failed: {0}")]
    ReportDeliveryFailed(String),

    /// The controlled runtime (browser) died or could not be driven.
    #[error("Runtime error: {0}")]
    RuntimeCrashed(String),

    /// The singleton loop is paused after an extractor error and an
    /// operator has not resumed it yet.
    #[error("Runtime loop is paused, awaiting operator resume")]
    Paused,

    /// HTTP request failed (source/sink plumbing).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Invalid or missing configuration.
    #[error("Config error: {0}")]
    ConfigError(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl WatchError {
    /// Returns true if this error is transient and worth retrying
    /// within a cycle (with a freshly minted fingerprint).
    pub fn is_retryable(&self) -> bool {
        Self::kind_is_retryable(self.kind())
    }

    /// Same predicate keyed by the machine-readable kind, for code that
    /// only holds an outcome's kind string.
    pub fn kind_is_retryable(kind: &str) -> bool {
        matches!(
            kind,
            "job_timeout" | "navigation_timeout" | "extraction_failed" | "runtime_crashed"
                | "http_error"
        )
    }

    /// Short machine-readable kind, used in structured reports.
    pub fn kind(&self) -> &'static str {
        match self {
            WatchError::NoExtractor(_) => "no_extractor",
            WatchError::ExtractionFailed(_) => "extraction_failed",
            WatchError::NavigationTimeout(_) => "navigation_timeout",
            WatchError::JobTimeout(_) => "job_timeout",
            WatchError::DuplicateUnresolvable(_) => "duplicate_unresolvable",
            WatchError::SourceFetchFailed(_) => "source_fetch_failed",
            WatchError::ReportDeliveryFailed(_) => "report_delivery_failed",
            WatchError::RuntimeCrashed(_) => "runtime_crashed",
            WatchError::Paused => "paused",
            WatchError::HttpError(_) => "http_error",
            WatchError::SerializationError(_) => "serialization_error",
            WatchError::ConfigError(_) => "config_error",
            WatchError::Generic(_) => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(WatchError::JobTimeout(90_000).is_retryable());
        assert!(WatchError::NavigationTimeout(60_000).is_retryable());
        assert!(WatchError::ExtractionFailed("selector gone".into()).is_retryable());
        assert!(!WatchError::NoExtractor("unknownshop".into()).is_retryable());
        assert!(!WatchError::DuplicateUnresolvable("k1".into()).is_retryable());
        assert!(!WatchError::SourceFetchFailed("503".into()).is_retryable());
        assert!(!WatchError::ConfigError("bad env".into()).is_retryable());
    }

    #[test]
    fn retryable_kinds() {
        for kind in ["job_timeout", "navigation_timeout", "extraction_failed"] {
            assert!(WatchError::kind_is_retryable(kind), "{kind}");
        }
        for kind in ["no_extractor", "duplicate_unresolvable", "config_error", "paused", "error"] {
            assert!(!WatchError::kind_is_retryable(kind), "{kind}");
        }
    }

    #[test]
    fn kinds_are_stable() {
        assert_eq!(WatchError::NoExtractor("x".into()).kind(), "no_extractor");
        assert_eq!(WatchError::JobTimeout(10).kind(), "job_timeout");
        assert_eq!(
            WatchError::ReportDeliveryFailed("500".into()).kind(),
            "report_delivery_failed"
        );
    }
}
