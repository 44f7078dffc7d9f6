//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;

use crate::error::WatchError;
use crate::models::{CheckReport, ExtractionOutcome, MarketData, WorkItem};
use crate::traits::{Dispatch, MarketExtractor, ReportSink, TabRuntime, WorklistSource};

// ---------------------------------------------------------------------------
// MockRuntime
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RuntimeStats {
    /// Total contexts opened over the mock's lifetime.
    opened: usize,
    /// Contexts currently open (opened and not yet closed).
    current: usize,
    /// High-water mark of simultaneously open contexts.
    max_concurrent: usize,
}

/// Mock controlled runtime that tracks context lifecycles instead of
/// driving a browser.
#[derive(Clone, Default)]
pub struct MockRuntime {
    stats: Arc<Mutex<RuntimeStats>>,
    fail_open: bool,
}

/// Context handle produced by [`MockRuntime::open_context`].
pub struct MockContext {
    pub url: String,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// A runtime whose every `open_context` fails as if the browser died.
    pub fn failing_open() -> Self {
        Self {
            stats: Arc::new(Mutex::new(RuntimeStats::default())),
            fail_open: true,
        }
    }

    pub fn opened(&self) -> usize {
        self.stats.lock().unwrap().opened
    }

    pub fn open_contexts(&self) -> usize {
        self.stats.lock().unwrap().current
    }

    pub fn max_concurrent(&self) -> usize {
        self.stats.lock().unwrap().max_concurrent
    }
}

impl TabRuntime for MockRuntime {
    type Context = MockContext;

    async fn open_context(&self, url: &str) -> Result<MockContext, WatchError> {
        if self.fail_open {
            return Err(WatchError::RuntimeCrashed("browser unreachable".into()));
        }
        let mut stats = self.stats.lock().unwrap();
        stats.opened += 1;
        stats.current += 1;
        stats.max_concurrent = stats.max_concurrent.max(stats.current);
        Ok(MockContext {
            url: url.to_string(),
        })
    }

    async fn close_context(&self, _ctx: MockContext) -> Result<(), WatchError> {
        self.stats.lock().unwrap().current -= 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockMarketExtractor
// ---------------------------------------------------------------------------

enum Fallback {
    Success(MarketData),
    Failure(fn() -> WatchError),
}

/// Mock extractor with a scripted response queue. Each call pops the first
/// element; when the queue is empty the fallback answers every call.
pub struct MockMarketExtractor {
    responses: Mutex<Vec<Result<MarketData, WatchError>>>,
    fallback: Fallback,
    delay: Duration,
}

impl MockMarketExtractor {
    /// Answers the first call with `data`, later calls with the same value.
    pub fn returning(data: MarketData) -> Self {
        Self::always(data)
    }

    /// Answers every call with `data`.
    pub fn always(data: MarketData) -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            fallback: Fallback::Success(data),
            delay: Duration::ZERO,
        }
    }

    /// Fails every call with a freshly built error.
    pub fn failing(make_error: fn() -> WatchError) -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            fallback: Fallback::Failure(make_error),
            delay: Duration::ZERO,
        }
    }

    /// Scripted responses in call order; exhausted scripts fall back to a
    /// default success.
    pub fn with_responses(responses: Vec<Result<MarketData, WatchError>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            fallback: Fallback::Success(MarketData::price_only(1.0)),
            delay: Duration::ZERO,
        }
    }

    /// Answers every call with `data` after sleeping for `delay`.
    pub fn slow(data: MarketData, delay: Duration) -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            fallback: Fallback::Success(data),
            delay,
        }
    }
}

// Generic over the context type: the mock never inspects the page.
impl<C> MarketExtractor<C> for MockMarketExtractor {
    fn extract<'a>(
        &'a self,
        _ctx: &'a C,
        _url: &'a str,
        _payload: &'a serde_json::Map<String, serde_json::Value>,
    ) -> BoxFuture<'a, Result<MarketData, WatchError>> {
        let next = {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                None
            } else {
                Some(responses.remove(0))
            }
        };
        Box::pin(async move {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match next {
                Some(response) => response,
                None => match &self.fallback {
                    Fallback::Success(data) => Ok(data.clone()),
                    Fallback::Failure(make_error) => Err(make_error()),
                },
            }
        })
    }
}

// ---------------------------------------------------------------------------
// MockWorklistSource
// ---------------------------------------------------------------------------

/// Mock work-list source serving a fixed list or a fixed failure.
#[derive(Clone)]
pub struct MockWorklistSource {
    items: Vec<WorkItem>,
    error: Option<String>,
}

impl MockWorklistSource {
    pub fn with_items(items: Vec<WorkItem>) -> Self {
        Self { items, error: None }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            items: Vec::new(),
            error: Some(message.to_string()),
        }
    }
}

impl WorklistSource for MockWorklistSource {
    async fn fetch_worklist(&self) -> Result<Vec<WorkItem>, WatchError> {
        match &self.error {
            Some(message) => Err(WatchError::SourceFetchFailed(message.clone())),
            None => Ok(self.items.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingSink
// ---------------------------------------------------------------------------

/// Report sink that records every delivered report.
#[derive(Clone, Default)]
pub struct RecordingSink {
    delivered: Arc<Mutex<Vec<CheckReport>>>,
    fail: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose every delivery fails after recording the attempt.
    pub fn failing() -> Self {
        Self {
            delivered: Arc::new(Mutex::new(Vec::new())),
            fail: true,
        }
    }

    pub fn delivered(&self) -> Vec<CheckReport> {
        self.delivered.lock().unwrap().clone()
    }
}

impl ReportSink for RecordingSink {
    async fn deliver(&self, report: &CheckReport) -> Result<(), WatchError> {
        self.delivered.lock().unwrap().push(report.clone());
        if self.fail {
            Err(WatchError::ReportDeliveryFailed("sink offline".into()))
        } else {
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// MockDispatch
// ---------------------------------------------------------------------------

/// Mock dispatch seam recording `(target, fingerprint)` per call, with a
/// scripted outcome queue; exhausted scripts repeat the last fallback.
pub struct MockDispatch {
    outcomes: Mutex<Vec<ExtractionOutcome>>,
    fallback: ExtractionOutcome,
    delay: Duration,
    calls: Mutex<Vec<(String, String)>>,
}

impl MockDispatch {
    /// Answers every call with `outcome`.
    pub fn always(outcome: ExtractionOutcome) -> Self {
        Self {
            outcomes: Mutex::new(Vec::new()),
            fallback: outcome,
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Scripted outcomes in call order; exhausted scripts fall back to a
    /// default success.
    pub fn with_outcomes(outcomes: Vec<ExtractionOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes),
            fallback: ExtractionOutcome::success(MarketData::price_only(1.0)),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answers every call with `outcome` after sleeping for `delay`.
    pub fn slow(outcome: ExtractionOutcome, delay: Duration) -> Self {
        Self {
            outcomes: Mutex::new(Vec::new()),
            fallback: outcome,
            delay,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Recorded `(target, fingerprint)` pairs in call order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

impl Dispatch for MockDispatch {
    async fn dispatch(&self, target: &str, fingerprint: String) -> ExtractionOutcome {
        self.calls
            .lock()
            .unwrap()
            .push((target.to_string(), fingerprint));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let mut outcomes = self.outcomes.lock().unwrap();
        if outcomes.is_empty() {
            self.fallback.clone()
        } else {
            outcomes.remove(0)
        }
    }
}
