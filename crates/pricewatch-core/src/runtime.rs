use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde::Serialize;

use crate::correlator::CorrelationTable;
use crate::error::WatchError;
use crate::job::{default_fingerprint, forced_fingerprint, Job, JobPriority};
use crate::models::ExtractionOutcome;
use crate::queue::WorkQueue;
use crate::registry::{market_key, ExtractorRegistry};
use crate::traits::{Dispatch, TabRuntime};

/// Hard bound on one job's open + extract work inside the loop. A single
/// hung page must never stall the singleton queue.
const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(90);

/// State of the singleton consumption loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// No loop running; the next submission starts one.
    Idle,
    /// Exactly one loop is draining the queue.
    Running,
    /// Dispatch suspended after a job error; an operator must resume.
    /// Submissions still enqueue, their callers' timeouts still fire.
    Paused,
}

/// A single extraction request for [`RuntimeManager::submit`].
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub target: String,
    /// Caller-supplied idempotency key; minted from target + timestamp
    /// when absent.
    pub fingerprint: Option<String>,
    pub priority: JobPriority,
    pub payload: serde_json::Map<String, serde_json::Value>,
}

impl SubmitRequest {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            fingerprint: None,
            priority: JobPriority::Urgent,
            payload: serde_json::Map::new(),
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }
}

/// Owns the controlled runtime's job queue, correlation table, and the one
/// active consumption loop.
///
/// The loop is started lazily on submission and terminates when the queue
/// drains; reentrant submissions while it runs attach to the in-flight loop
/// instead of starting a second one. Mutual exclusion over queue consumption
/// holds by construction: only an `Idle → Running` transition, guarded by
/// the state lock, ever spawns a loop.
pub struct RuntimeManager<R: TabRuntime> {
    runtime: R,
    registry: Arc<ExtractorRegistry<R::Context>>,
    queue: Arc<WorkQueue>,
    correlator: Arc<CorrelationTable>,
    state: Arc<Mutex<RunState>>,
    /// Suspend further dispatch after a job error, leaving the browser in
    /// its failed state for live diagnosis.
    hold_on_error: bool,
    job_timeout: Duration,
}

impl<R: TabRuntime> Clone for RuntimeManager<R> {
    fn clone(&self) -> Self {
        Self {
            runtime: self.runtime.clone(),
            registry: Arc::clone(&self.registry),
            queue: Arc::clone(&self.queue),
            correlator: Arc::clone(&self.correlator),
            state: Arc::clone(&self.state),
            hold_on_error: self.hold_on_error,
            job_timeout: self.job_timeout,
        }
    }
}

impl<R: TabRuntime> RuntimeManager<R> {
    pub fn new(
        runtime: R,
        registry: impl Into<Arc<ExtractorRegistry<R::Context>>>,
        hold_on_error: bool,
    ) -> Self {
        Self {
            runtime,
            registry: registry.into(),
            queue: Arc::new(WorkQueue::new()),
            correlator: Arc::new(CorrelationTable::new()),
            state: Arc::new(Mutex::new(RunState::Idle)),
            hold_on_error,
            job_timeout: DEFAULT_JOB_TIMEOUT,
        }
    }

    /// Override the per-job bound enforced inside the consumption loop.
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn state(&self) -> RunState {
        *self.state.lock().expect("run state lock poisoned")
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// Submit one job and await its outcome. Job-level failures come back
    /// inside the outcome; this future itself only resolves, never errors.
    ///
    /// Duplicate fingerprints are retried once with a forced fingerprint; a
    /// second collision settles the result as `DuplicateUnresolvable`.
    pub async fn submit(&self, request: SubmitRequest) -> ExtractionOutcome {
        let fingerprint = request
            .fingerprint
            .unwrap_or_else(|| default_fingerprint(&request.target));
        let market = market_key(&request.target);

        let (key, rx) = self.correlator.register();
        let mut job = Job {
            target: request.target.clone(),
            fingerprint: fingerprint.clone(),
            correlation_key: key,
            payload: request.payload,
            priority: request.priority,
        };

        if self.queue.enqueue(job.clone()).already_handled {
            // Forced resubmission with a freshly minted fingerprint.
            job.fingerprint = forced_fingerprint(&fingerprint);
            tracing::debug!(
                original = %fingerprint,
                forced = %job.fingerprint,
                "Fingerprint already handled, forcing resubmission"
            );
            if self.queue.enqueue(job).already_handled {
                self.correlator.forget(key);
                return ExtractionOutcome::failure(
                    &request.target,
                    &market,
                    &WatchError::DuplicateUnresolvable(fingerprint),
                );
            }
        }

        self.ensure_running();

        match rx.await {
            Ok(outcome) => outcome,
            // Sender dropped without a settle: the loop died mid-job.
            Err(_) => ExtractionOutcome::failure(
                &request.target,
                &market,
                &WatchError::RuntimeCrashed("loop terminated before settling result".into()),
            ),
        }
    }

    /// Start the consumption loop if no loop is in flight. Reentrant calls
    /// while a loop runs (or while paused) are no-ops.
    pub fn ensure_running(&self) {
        let mut state = self.state.lock().expect("run state lock poisoned");
        match *state {
            RunState::Running | RunState::Paused => {}
            RunState::Idle => {
                *state = RunState::Running;
                drop(state);
                let manager = self.clone();
                tokio::spawn(async move {
                    let result = AssertUnwindSafe(manager.drain_loop()).catch_unwind().await;
                    if result.is_err() {
                        tracing::error!("Runtime loop panicked");
                        manager.crash("runtime loop panicked");
                    }
                });
            }
        }
    }

    /// Leave the paused state and, if work is queued, restart the loop.
    pub fn resume(&self) {
        {
            let mut state = self.state.lock().expect("run state lock poisoned");
            if *state == RunState::Paused {
                tracing::info!("Operator resumed the runtime loop");
                *state = RunState::Idle;
            }
        }
        if !self.queue.is_empty() {
            self.ensure_running();
        }
    }

    /// Drain the queue until empty, then flip back to idle. Exactly one
    /// instance of this loop runs at any time.
    async fn drain_loop(&self) {
        tracing::debug!("Runtime loop started");
        loop {
            let Some(job) = self.queue.pop() else {
                // Re-check emptiness under the state lock so a job enqueued
                // between pop and the flip is not stranded.
                let mut state = self.state.lock().expect("run state lock poisoned");
                if self.queue.is_empty() {
                    *state = RunState::Idle;
                    tracing::debug!("Queue drained, runtime loop idle");
                    return;
                }
                continue;
            };

            let correlation_key = job.correlation_key;
            let outcome = match AssertUnwindSafe(self.process_job(&job)).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::error!(target = %job.target, "Job processing panicked");
                    self.correlator.settle(
                        correlation_key,
                        ExtractionOutcome::failure(
                            &job.target,
                            &market_key(&job.target),
                            &WatchError::RuntimeCrashed("job processing panicked".into()),
                        ),
                    );
                    self.crash("job processing panicked");
                    return;
                }
            };

            let failed = !outcome.is_success();
            let runtime_dead = outcome
                .error
                .as_ref()
                .is_some_and(|e| e.kind == "runtime_crashed");
            let hold = failed
                && self.hold_on_error
                && outcome
                    .error
                    .as_ref()
                    .is_some_and(|e| e.kind != "no_extractor");

            self.correlator.settle(correlation_key, outcome);

            if runtime_dead {
                self.crash("controlled runtime unreachable");
                return;
            }

            if hold {
                let mut state = self.state.lock().expect("run state lock poisoned");
                *state = RunState::Paused;
                tracing::warn!(
                    queued = self.queue.len(),
                    "Job failed with hold_on_error set, pausing dispatch for inspection"
                );
                return;
            }
        }
    }

    /// Process one job: open an isolated context, run the extractor, close
    /// the context in every path. Never returns a raw error. Both phases
    /// share one `job_timeout` budget so a hung page or extractor cannot
    /// hold the loop past the bound.
    async fn process_job(&self, job: &Job) -> ExtractionOutcome {
        tracing::info!(target = %job.target, fingerprint = %job.fingerprint, "Dispatching job");
        let market = market_key(&job.target);

        let started = Instant::now();
        let ctx = match tokio::time::timeout(
            self.job_timeout,
            self.runtime.open_context(&job.target),
        )
        .await
        {
            Ok(Ok(ctx)) => ctx,
            Ok(Err(err)) => {
                return ExtractionOutcome::failure(&job.target, &market, &err);
            }
            Err(_) => {
                return ExtractionOutcome::failure(
                    &job.target,
                    &market,
                    &WatchError::NavigationTimeout(self.job_timeout.as_millis() as u64),
                );
            }
        };

        let remaining = self.job_timeout.saturating_sub(started.elapsed());
        let outcome = match tokio::time::timeout(
            remaining,
            self.registry.run(&ctx, &job.target, &job.payload),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => ExtractionOutcome::failure(
                &job.target,
                &market,
                &WatchError::JobTimeout(self.job_timeout.as_millis() as u64),
            ),
        };

        if let Err(err) = self.runtime.close_context(ctx).await {
            tracing::warn!(target = %job.target, error = %err, "Failed to close context");
        }

        outcome
    }

    /// Crash path: flip to idle and reject every job that was queued but
    /// never dispatched, so no caller is left hanging.
    fn crash(&self, reason: &str) {
        {
            let mut state = self.state.lock().expect("run state lock poisoned");
            *state = RunState::Idle;
        }
        for job in self.queue.drain() {
            self.correlator.settle(
                job.correlation_key,
                ExtractionOutcome::failure(
                    &job.target,
                    &market_key(&job.target),
                    &WatchError::RuntimeCrashed(reason.to_string()),
                ),
            );
        }
    }
}

impl<R: TabRuntime> Dispatch for RuntimeManager<R> {
    async fn dispatch(&self, target: &str, fingerprint: String) -> ExtractionOutcome {
        // Cycle work is background traffic: FIFO, no backlog preemption.
        self.submit(
            SubmitRequest::new(target)
                .with_fingerprint(fingerprint)
                .with_priority(JobPriority::Normal),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MarketData;
    use crate::testutil::{MockMarketExtractor, MockRuntime};
    use std::time::Duration;

    fn manager_with(
        runtime: MockRuntime,
        extractor: MockMarketExtractor,
        hold_on_error: bool,
    ) -> RuntimeManager<MockRuntime> {
        let registry = ExtractorRegistry::new().register("shop", Arc::new(extractor));
        RuntimeManager::new(runtime, registry, hold_on_error)
    }

    #[tokio::test]
    async fn submit_returns_extraction_outcome_and_goes_idle() {
        let runtime = MockRuntime::new();
        let manager = manager_with(
            runtime.clone(),
            MockMarketExtractor::returning(MarketData::price_only(4099.0)),
            false,
        );

        let outcome = manager.submit(SubmitRequest::new("https://shop.pl/p/1")).await;

        assert_eq!(outcome.data.unwrap().price, 4099.0);
        assert_eq!(runtime.opened(), 1);
        assert_eq!(runtime.open_contexts(), 0);

        // Loop termination races the settle; give it a tick.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(manager.state(), RunState::Idle);
    }

    #[tokio::test]
    async fn concurrent_submissions_share_one_loop() {
        let runtime = MockRuntime::new();
        let manager = Arc::new(manager_with(
            runtime.clone(),
            MockMarketExtractor::always(MarketData::price_only(1.0)),
            false,
        ));

        let mut handles = Vec::new();
        for i in 0..5 {
            let m = Arc::clone(&manager);
            handles.push(tokio::spawn(async move {
                m.submit(SubmitRequest::new(format!("https://shop.pl/p/{i}")))
                    .await
            }));
        }
        for h in handles {
            assert!(h.await.unwrap().is_success());
        }

        assert_eq!(runtime.opened(), 5);
        // Contexts were consumed strictly one at a time.
        assert_eq!(runtime.max_concurrent(), 1);
    }

    #[tokio::test]
    async fn duplicate_fingerprint_is_forced_then_unresolvable() {
        let runtime = MockRuntime::new();
        let manager = manager_with(
            runtime.clone(),
            MockMarketExtractor::always(MarketData::price_only(1.0)),
            false,
        );

        let req = || SubmitRequest::new("https://shop.pl/p/1").with_fingerprint("k1");

        // First submission executes.
        assert!(manager.submit(req()).await.is_success());
        // Second collides, is forced, and executes again.
        assert!(manager.submit(req()).await.is_success());
        assert_eq!(runtime.opened(), 2);

        // Third collides even after forcing: unresolvable, nothing dispatched.
        let outcome = manager.submit(req()).await;
        assert_eq!(outcome.error.unwrap().kind, "duplicate_unresolvable");
        assert_eq!(runtime.opened(), 2);
    }

    #[tokio::test]
    async fn extractor_error_becomes_structured_outcome() {
        let runtime = MockRuntime::new();
        let manager = manager_with(
            runtime.clone(),
            MockMarketExtractor::failing(|| WatchError::ExtractionFailed("selector gone".into())),
            false,
        );

        let outcome = manager.submit(SubmitRequest::new("https://shop.pl/p/1")).await;

        let err = outcome.error.unwrap();
        assert_eq!(err.kind, "extraction_failed");
        assert_eq!(err.market, "shop");
        // The context is still released.
        assert_eq!(runtime.open_contexts(), 0);
    }

    #[tokio::test]
    async fn hold_on_error_pauses_until_resume() {
        let runtime = MockRuntime::new();
        let extractor = MockMarketExtractor::with_responses(vec![
            Err(WatchError::ExtractionFailed("broken page".into())),
            Ok(MarketData::price_only(2.0)),
        ]);
        let manager = Arc::new(manager_with(runtime.clone(), extractor, true));

        let outcome = manager
            .submit(SubmitRequest::new("https://shop.pl/p/1").with_fingerprint("a"))
            .await;
        assert!(!outcome.is_success());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(manager.state(), RunState::Paused);

        // A submission while paused enqueues but is not dispatched.
        let m = Arc::clone(&manager);
        let pending = tokio::spawn(async move {
            m.submit(SubmitRequest::new("https://shop.pl/p/2").with_fingerprint("b"))
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(runtime.opened(), 1);
        assert_eq!(manager.queue_depth(), 1);

        manager.resume();
        let outcome = pending.await.unwrap();
        assert_eq!(outcome.data.unwrap().price, 2.0);
        assert_eq!(runtime.opened(), 2);
    }

    #[tokio::test]
    async fn no_extractor_does_not_pause_even_with_hold_on_error() {
        let runtime = MockRuntime::new();
        let manager = manager_with(
            runtime,
            MockMarketExtractor::always(MarketData::price_only(1.0)),
            true,
        );

        let outcome = manager
            .submit(SubmitRequest::new("https://unregistered.pl/p/1"))
            .await;
        assert_eq!(outcome.error.unwrap().kind, "no_extractor");

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(manager.state(), RunState::Idle);
    }

    #[tokio::test]
    async fn runtime_crash_rejects_undispatched_jobs() {
        let runtime = MockRuntime::failing_open();
        let manager = manager_with(
            runtime,
            MockMarketExtractor::always(MarketData::price_only(1.0)),
            false,
        );

        // Queue two jobs by hand so both are pending before any dispatch.
        let (k1, rx1) = manager.correlator.register();
        let (k2, rx2) = manager.correlator.register();
        let mut j1 = Job::new("https://shop.pl/p/1", "f1");
        j1.correlation_key = k1;
        let mut j2 = Job::new("https://shop.pl/p/2", "f2");
        j2.correlation_key = k2;
        manager.queue.enqueue(j1);
        manager.queue.enqueue(j2);

        manager.ensure_running();

        // Both futures settle: the dispatched one with the open failure,
        // the queued one via the crash path. Neither caller hangs.
        let o1 = rx1.await.unwrap();
        let o2 = rx2.await.unwrap();
        assert_eq!(o1.error.unwrap().kind, "runtime_crashed");
        assert_eq!(o2.error.unwrap().kind, "runtime_crashed");

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(manager.state(), RunState::Idle);
    }

    #[tokio::test]
    async fn hung_extractor_times_out_and_the_loop_moves_on() {
        let runtime = MockRuntime::new();
        let extractor =
            MockMarketExtractor::slow(MarketData::price_only(1.0), Duration::from_secs(30));
        let manager = Arc::new(
            manager_with(runtime.clone(), extractor, false)
                .with_job_timeout(Duration::from_millis(50)),
        );

        let mut handles = Vec::new();
        for i in 0..2 {
            let m = Arc::clone(&manager);
            handles.push(tokio::spawn(async move {
                m.submit(
                    SubmitRequest::new(format!("https://shop.pl/p/{i}"))
                        .with_fingerprint(format!("hung{i}")),
                )
                .await
            }));
        }

        // Both callers settle with the bound, neither starves behind the
        // first hung job, and both contexts are released.
        for h in handles {
            let outcome = h.await.unwrap();
            assert_eq!(outcome.error.unwrap().kind, "job_timeout");
        }
        assert_eq!(runtime.opened(), 2);
        assert_eq!(runtime.open_contexts(), 0);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(manager.state(), RunState::Idle);
        assert_eq!(manager.queue_depth(), 0);
    }

    #[tokio::test]
    async fn late_result_after_caller_timeout_is_discarded() {
        let runtime = MockRuntime::new();
        let extractor = MockMarketExtractor::slow(
            MarketData::price_only(1.0),
            Duration::from_millis(200),
        );
        let manager = Arc::new(manager_with(runtime.clone(), extractor, false));

        // Caller races submit against a 10ms timeout, as the server does.
        let m = Arc::clone(&manager);
        let result = tokio::time::timeout(
            Duration::from_millis(10),
            m.submit(SubmitRequest::new("https://shop.pl/p/1")),
        )
        .await;
        assert!(result.is_err(), "caller should time out at ~10ms");

        // The underlying work keeps running and settles as an orphan
        // without crashing anything.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(runtime.opened(), 1);
        assert_eq!(runtime.open_contexts(), 0);
        assert_eq!(manager.correlator.pending_count(), 0);
        assert_eq!(manager.state(), RunState::Idle);
    }
}
