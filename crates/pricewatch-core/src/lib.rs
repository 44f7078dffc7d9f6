//! Core domain for the price-watch scheduler: job queue, result
//! correlation, the singleton runtime loop, batch scheduling, and the
//! periodic check cycle. Everything here is transport-agnostic; the
//! browser runtime and the HTTP surfaces live in sibling crates behind
//! the traits in [`traits`].

pub mod batch;
pub mod correlator;
pub mod cycle;
pub mod error;
pub mod job;
pub mod models;
pub mod queue;
pub mod registry;
pub mod runtime;
pub mod testutil;
pub mod traits;

pub use batch::{BatchItem, BatchOptions, BatchOutcome, BatchScheduler};
pub use correlator::CorrelationTable;
pub use cycle::{CycleConfig, CycleOrchestrator};
pub use error::WatchError;
pub use job::{Job, JobPriority};
pub use models::{CheckReport, CycleSummary, ExtractionOutcome, MarketData, WorkItem};
pub use queue::WorkQueue;
pub use registry::{is_http_url, market_key, ExtractorRegistry};
pub use runtime::{RunState, RuntimeManager, SubmitRequest};
pub use traits::{Dispatch, MarketExtractor, ReportSink, TabRuntime, WorklistSource};
