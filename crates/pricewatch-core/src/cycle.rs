use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;

use crate::error::WatchError;
use crate::job::attempt_fingerprint;
use crate::models::{CheckReport, CycleSummary, ExtractionOutcome, WorkItem};
use crate::registry::{is_http_url, market_key};
use crate::traits::{Dispatch, ReportSink, WorklistSource};

/// Fixed per-deployment cycle policy; not dynamically tuned.
#[derive(Debug, Clone)]
pub struct CycleConfig {
    /// Concurrent in-flight items (cooperative tasks, not OS threads).
    pub concurrency: usize,
    pub per_item_timeout: Duration,
    /// Retries after the first attempt, each with a fresh fingerprint.
    pub max_retries: u32,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            per_item_timeout: Duration::from_secs(90),
            max_retries: 2,
        }
    }
}

/// The outer periodic driver: fetch the work list, dispatch every item
/// through a bounded concurrency limiter with timeout and bounded retry,
/// and report each outcome to the sink.
///
/// Only a work-list fetch failure aborts a cycle, since there is nothing
/// to iterate. Individual item failures are caught, retried, reported, and
/// tallied; the cycle itself always completes, so it is safe to re-run on
/// a fixed interval.
pub struct CycleOrchestrator<D, S, K>
where
    D: Dispatch,
    S: WorklistSource,
    K: ReportSink,
{
    dispatch: Arc<D>,
    source: S,
    sink: K,
    config: CycleConfig,
}

impl<D, S, K> CycleOrchestrator<D, S, K>
where
    D: Dispatch,
    S: WorklistSource,
    K: ReportSink,
{
    pub fn new(dispatch: Arc<D>, source: S, sink: K, config: CycleConfig) -> Self {
        Self {
            dispatch,
            source,
            sink,
            config,
        }
    }

    pub async fn run_cycle(&self) -> CycleSummary {
        let started_at = Utc::now();
        tracing::info!(%started_at, "Cycle started");

        let items = match self.source.fetch_worklist().await {
            Ok(items) => items,
            Err(err) => {
                tracing::error!(error = %err, "Cycle aborted: work-list fetch failed");
                return CycleSummary::aborted(err.to_string());
            }
        };
        tracing::info!(total = items.len(), "Work list fetched");

        let limiter = Semaphore::new(self.config.concurrency.max(1));
        let checks = items.iter().map(|item| self.check_item(item, &limiter));
        let results = futures::future::join_all(checks).await;

        let succeeded = results.iter().filter(|ok| **ok).count();
        tracing::info!(
            total = results.len(),
            %succeeded,
            "Cycle finished"
        );

        CycleSummary {
            ok: true,
            total: results.len(),
            succeeded,
            error: None,
        }
    }

    /// Run one item to a terminal state (reported-success or
    /// reported-failure). Returns true on success.
    async fn check_item(&self, item: &WorkItem, limiter: &Semaphore) -> bool {
        // The semaphore is never closed while a cycle runs.
        let _permit = limiter.acquire().await.expect("cycle limiter closed");

        if !is_http_url(&item.url) {
            tracing::warn!(id = %item.id, url = %item.url, "Skipping item with invalid URL");
            let outcome = ExtractionOutcome::failure(
                &item.url,
                &market_key(&item.url),
                &WatchError::Generic("invalid item payload".into()),
            );
            self.report(item, outcome).await;
            return false;
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            // The same fingerprint would be deduplicated by the queue, so
            // every attempt mints a fresh one.
            let fingerprint = attempt_fingerprint(&item.url, attempt);

            let outcome = match tokio::time::timeout(
                self.config.per_item_timeout,
                self.dispatch.dispatch(&item.url, fingerprint),
            )
            .await
            {
                Ok(outcome) => outcome,
                // The losing dispatch keeps running; its eventual result is
                // an orphan handled by the correlator.
                Err(_) => ExtractionOutcome::failure(
                    &item.url,
                    &market_key(&item.url),
                    &WatchError::JobTimeout(self.config.per_item_timeout.as_millis() as u64),
                ),
            };

            if outcome.is_success() {
                self.report(item, outcome).await;
                return true;
            }

            if !outcome_is_retryable(&outcome) || attempt > self.config.max_retries {
                tracing::warn!(
                    id = %item.id,
                    url = %item.url,
                    %attempt,
                    "Item failed terminally"
                );
                self.report(item, outcome).await;
                return false;
            }

            tracing::warn!(
                id = %item.id,
                url = %item.url,
                %attempt,
                max_attempts = self.config.max_retries + 1,
                "Attempt failed, retrying with fresh fingerprint"
            );
        }
    }

    /// Deliver one report. Sink failures are logged, never retried, and do
    /// not change the item's own classification.
    async fn report(&self, item: &WorkItem, outcome: ExtractionOutcome) {
        let report = CheckReport {
            id: item.id.clone(),
            url: item.url.clone(),
            result: outcome,
            checked_at: Utc::now(),
        };
        if let Err(err) = self.sink.deliver(&report).await {
            tracing::error!(id = %item.id, error = %err, "Report delivery failed");
        }
    }
}

/// Retry only errors that re-running the same target can fix, per the
/// shared [`WatchError::kind_is_retryable`] predicate.
fn outcome_is_retryable(outcome: &ExtractionOutcome) -> bool {
    outcome
        .error
        .as_ref()
        .is_some_and(|err| WatchError::kind_is_retryable(&err.kind))
}
