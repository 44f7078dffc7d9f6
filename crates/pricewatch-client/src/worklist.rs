use std::time::Duration;

use pricewatch_core::error::WatchError;
use pricewatch_core::models::{CheckReport, WorkItem};
use pricewatch_core::traits::{ReportSink, WorklistSource};
use reqwest::Client;

/// Build the shared HTTP client used by the work-list source and the
/// report sink.
pub fn build_client(timeout: Duration) -> Result<Client, WatchError> {
    Client::builder()
        .user_agent("pricewatch/0.2")
        .timeout(timeout)
        .build()
        .map_err(|e| WatchError::HttpError(e.to_string()))
}

/// Work-list source backed by an HTTP GET endpoint returning
/// `[{ "id": "...", "url": "..." }, ...]`.
#[derive(Clone)]
pub struct HttpWorklistSource {
    client: Client,
    endpoint: String,
}

impl HttpWorklistSource {
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

impl WorklistSource for HttpWorklistSource {
    async fn fetch_worklist(&self) -> Result<Vec<WorkItem>, WatchError> {
        let response = self
            .client
            .get(&self.endpoint)
            .send()
            .await
            .map_err(|e| WatchError::SourceFetchFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(WatchError::SourceFetchFailed(format!(
                "HTTP {} from {}",
                status.as_u16(),
                self.endpoint
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| WatchError::SourceFetchFailed(e.to_string()))?;
        let items = parse_worklist(&body)?;
        tracing::debug!(count = items.len(), "Work list fetched");
        Ok(items)
    }
}

/// Strict shape check: the body must be a JSON array of `{id, url}` objects
/// with non-empty fields. Anything else aborts the cycle as a fetch failure.
fn parse_worklist(body: &str) -> Result<Vec<WorkItem>, WatchError> {
    let items: Vec<WorkItem> = serde_json::from_str(body)
        .map_err(|e| WatchError::SourceFetchFailed(format!("unexpected work-list shape: {e}")))?;

    for item in &items {
        if item.id.is_empty() || item.url.is_empty() {
            return Err(WatchError::SourceFetchFailed(
                "work-list item with empty id or url".to_string(),
            ));
        }
    }
    Ok(items)
}

/// Report sink POSTing one `{id, url, result, checkedAt}` document per
/// checked item.
#[derive(Clone)]
pub struct HttpReportSink {
    client: Client,
    endpoint: String,
}

impl HttpReportSink {
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

impl ReportSink for HttpReportSink {
    async fn deliver(&self, report: &CheckReport) -> Result<(), WatchError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(report)
            .send()
            .await
            .map_err(|e| WatchError::ReportDeliveryFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(WatchError::ReportDeliveryFailed(format!(
                "HTTP {} from {}",
                status.as_u16(),
                self.endpoint
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_worklist() {
        let body = r#"[
            {"id": "42", "url": "https://shop.pl/p/1"},
            {"id": "43", "url": "https://shop.pl/p/2"}
        ]"#;
        let items = parse_worklist(body).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "42");
        assert_eq!(items[1].url, "https://shop.pl/p/2");
    }

    #[test]
    fn extra_fields_are_ignored() {
        let body = r#"[{"id": "1", "url": "https://shop.pl/p/1", "name": "TV"}]"#;
        assert_eq!(parse_worklist(body).unwrap().len(), 1);
    }

    #[test]
    fn rejects_non_array_bodies() {
        for body in ["{}", "\"items\"", "42", r#"{"items": []}"#] {
            let err = parse_worklist(body).unwrap_err();
            assert_eq!(err.kind(), "source_fetch_failed");
        }
    }

    #[test]
    fn rejects_items_missing_fields() {
        let err = parse_worklist(r#"[{"id": "1"}]"#).unwrap_err();
        assert_eq!(err.kind(), "source_fetch_failed");

        let err = parse_worklist(r#"[{"id": "", "url": "https://x.pl"}]"#).unwrap_err();
        assert_eq!(err.kind(), "source_fetch_failed");
    }

    #[test]
    fn empty_list_is_valid() {
        assert!(parse_worklist("[]").unwrap().is_empty());
    }
}
