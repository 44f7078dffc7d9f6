use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::WatchError;
use crate::models::ExtractionOutcome;
use crate::registry::{is_http_url, market_key, ExtractorRegistry};
use crate::traits::TabRuntime;

/// Options for one batch run.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Concurrent isolated contexts, clamped to 1..=8.
    pub max_concurrency: usize,
    pub per_item_timeout: Duration,
    /// Launch stagger: a worker waits `stagger * index` before its first
    /// claim and `stagger` before each later one, bounding the burst rate
    /// against targets for the whole run.
    pub stagger: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            per_item_timeout: Duration::from_secs(60),
            stagger: Duration::from_millis(150),
        }
    }
}

/// One input item; every item yields exactly one output record.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub id: String,
    pub target: String,
}

/// Output record, paired with its input id, in input order.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BatchOutcome {
    pub id: String,
    #[serde(flatten)]
    pub outcome: ExtractionOutcome,
}

/// Runs many extractions against the shared runtime through a bounded pool
/// of isolated contexts.
///
/// This is the self-contained alternative to the single-job correlation
/// path: no queue and no fingerprints; the caller owns the item list and
/// gets back one outcome per item. Workers share nothing but the claim cursor;
/// a worker that finishes (or fails) an item immediately claims the next
/// index, so the pool self-balances without fixed rounds.
pub struct BatchScheduler<R: TabRuntime> {
    runtime: R,
    registry: Arc<ExtractorRegistry<R::Context>>,
}

impl<R: TabRuntime> BatchScheduler<R> {
    pub fn new(runtime: R, registry: Arc<ExtractorRegistry<R::Context>>) -> Self {
        Self { runtime, registry }
    }

    pub async fn run_batch(&self, items: &[BatchItem], options: &BatchOptions) -> Vec<BatchOutcome> {
        if items.is_empty() {
            return Vec::new();
        }

        let concurrency = options.max_concurrency.clamp(1, 8).min(items.len());
        tracing::info!(
            total = items.len(),
            %concurrency,
            "Starting batch extraction"
        );

        let cursor = AtomicUsize::new(0);
        let results: Mutex<Vec<Option<ExtractionOutcome>>> =
            Mutex::new(vec![None; items.len()]);

        let workers = (0..concurrency).map(|_| {
            let cursor = &cursor;
            let results = &results;
            async move {
                let mut first_claim = true;
                loop {
                    let index = cursor.fetch_add(1, Ordering::Relaxed);
                    if index >= items.len() {
                        return;
                    }
                    let delay = if first_claim {
                        first_claim = false;
                        options.stagger.saturating_mul(index as u32)
                    } else {
                        options.stagger
                    };
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }

                    let item = &items[index];
                    let outcome = self.run_one(item, options.per_item_timeout).await;
                    results.lock().expect("batch results lock poisoned")[index] = Some(outcome);
                }
            }
        });

        futures::future::join_all(workers).await;

        let slots = results.into_inner().expect("batch results lock poisoned");
        items
            .iter()
            .zip(slots)
            .map(|(item, slot)| BatchOutcome {
                id: item.id.clone(),
                // Every claimed index is written before the worker moves on.
                outcome: slot.unwrap_or_else(|| {
                    ExtractionOutcome::failure(
                        &item.target,
                        &market_key(&item.target),
                        &WatchError::Generic("batch worker produced no outcome".into()),
                    )
                }),
            })
            .collect()
    }

    /// Process one item with full failure isolation: any error becomes this
    /// item's outcome and the context is released in every path.
    async fn run_one(&self, item: &BatchItem, per_item_timeout: Duration) -> ExtractionOutcome {
        let market = market_key(&item.target);

        if !is_http_url(&item.target) {
            return ExtractionOutcome::failure(
                &item.target,
                &market,
                &WatchError::Generic("invalid target URL".into()),
            );
        }

        let started = Instant::now();
        let ctx = match tokio::time::timeout(
            per_item_timeout,
            self.runtime.open_context(&item.target),
        )
        .await
        {
            Ok(Ok(ctx)) => ctx,
            Ok(Err(err)) => {
                return ExtractionOutcome::failure(&item.target, &market, &err);
            }
            Err(_) => {
                return ExtractionOutcome::failure(
                    &item.target,
                    &market,
                    &WatchError::NavigationTimeout(per_item_timeout.as_millis() as u64),
                );
            }
        };

        let remaining = per_item_timeout.saturating_sub(started.elapsed());
        let outcome = match tokio::time::timeout(
            remaining,
            self.registry.run(&ctx, &item.target, &serde_json::Map::new()),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => ExtractionOutcome::failure(
                &item.target,
                &market,
                &WatchError::JobTimeout(per_item_timeout.as_millis() as u64),
            ),
        };

        if let Err(err) = self.runtime.close_context(ctx).await {
            tracing::warn!(target = %item.target, error = %err, "Failed to close batch context");
        }

        outcome
    }
}
