use std::future::Future;

use futures::future::BoxFuture;

use crate::error::WatchError;
use crate::models::{CheckReport, ExtractionOutcome, MarketData, WorkItem};

/// The controlled automation runtime (one long-lived browser).
///
/// `open_context` opens one isolated execution context (tab), navigates it
/// to `url`, and waits (bounded) until the page is interactive. Contexts
/// are never shared between concurrent workers; only the worker holding a
/// context may drive it, and every opened context must be passed back to
/// `close_context` regardless of extraction outcome.
pub trait TabRuntime: Send + Sync + Clone + 'static {
    /// Contexts cross task boundaries and are borrowed across awaits
    /// inside spawned loops, so they must be `Sync` as well as `Send`.
    type Context: Send + Sync + 'static;

    fn open_context(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<Self::Context, WatchError>> + Send;

    fn close_context(
        &self,
        ctx: Self::Context,
    ) -> impl Future<Output = Result<(), WatchError>> + Send;
}

/// Site-family extraction capability, resolved per job by market key.
///
/// Returns boxed futures so implementations can live behind `dyn` in the
/// registry map. `price` is the only mandatory output field; a missing or
/// unparseable price must be reported as an error.
pub trait MarketExtractor<C>: Send + Sync {
    fn extract<'a>(
        &'a self,
        ctx: &'a C,
        url: &'a str,
        payload: &'a serde_json::Map<String, serde_json::Value>,
    ) -> BoxFuture<'a, Result<MarketData, WatchError>>;
}

/// External source of the periodic work list (HTTP GET returning
/// `[{id, url}, ...]`). Any other shape is a fetch failure for the cycle.
pub trait WorklistSource: Send + Sync {
    fn fetch_worklist(&self) -> impl Future<Output = Result<Vec<WorkItem>, WatchError>> + Send;
}

/// External sink receiving one report per checked item. Delivery failures
/// are logged by the orchestrator and never retried.
pub trait ReportSink: Send + Sync {
    fn deliver(&self, report: &CheckReport) -> impl Future<Output = Result<(), WatchError>> + Send;
}

/// Seam between the cycle orchestrator and the singleton runtime loop:
/// submit one target with an explicit fingerprint and await its outcome.
/// Job-level errors arrive inside the outcome, never as a raw error.
pub trait Dispatch: Send + Sync {
    fn dispatch(
        &self,
        target: &str,
        fingerprint: String,
    ) -> impl Future<Output = ExtractionOutcome> + Send;
}
