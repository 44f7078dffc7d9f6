use pricewatch_core::batch::BatchScheduler;
use pricewatch_core::cycle::CycleOrchestrator;
use pricewatch_core::runtime::RuntimeManager;
use pricewatch_core::traits::{ReportSink, TabRuntime, WorklistSource};

use crate::config::ServiceConfig;

/// Shared application state, generic over the runtime and the cycle's
/// source/sink so tests can substitute mocks.
pub struct AppState<R, S, K>
where
    R: TabRuntime,
    S: WorklistSource,
    K: ReportSink,
{
    pub manager: RuntimeManager<R>,
    pub batch: BatchScheduler<R>,
    pub cycle: CycleOrchestrator<RuntimeManager<R>, S, K>,
    pub config: ServiceConfig,
}
