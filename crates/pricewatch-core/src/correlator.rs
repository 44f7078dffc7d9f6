use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::models::ExtractionOutcome;

/// Maps correlation keys to pending result channels.
///
/// Each submitted job registers a key and hands the receiver to its caller;
/// the runtime loop settles the key when extraction finishes. A settle for
/// an unknown key (already settled, or the caller timed out and gave up) is
/// an orphan: logged and dropped, never an error.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    pending: Mutex<HashMap<Uuid, oneshot::Sender<ExtractionOutcome>>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new pending result. Returns the correlation key and the
    /// receiver the caller awaits.
    pub fn register(&self) -> (Uuid, oneshot::Receiver<ExtractionOutcome>) {
        let key = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("correlation table lock poisoned")
            .insert(key, tx);
        (key, rx)
    }

    /// Settle a pending result exactly once. Idempotent-safe: an absent key
    /// is a no-op.
    pub fn settle(&self, key: Uuid, outcome: ExtractionOutcome) {
        let sender = self
            .pending
            .lock()
            .expect("correlation table lock poisoned")
            .remove(&key);

        match sender {
            Some(tx) => {
                // The receiver may already be dropped (caller timed out);
                // the late result is discarded either way.
                if tx.send(outcome).is_err() {
                    tracing::debug!(%key, "Orphan result: caller gave up before settle");
                }
            }
            None => {
                tracing::debug!(%key, "Orphan settle: no pending entry for key");
            }
        }
    }

    /// Remove a registration without settling it (e.g. the job could not be
    /// enqueued in the first place).
    pub fn forget(&self, key: Uuid) {
        self.pending
            .lock()
            .expect("correlation table lock poisoned")
            .remove(&key);
    }

    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .expect("correlation table lock poisoned")
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MarketData;

    #[tokio::test]
    async fn register_then_settle_delivers_outcome() {
        let table = CorrelationTable::new();
        let (key, rx) = table.register();

        table.settle(key, ExtractionOutcome::success(MarketData::price_only(1.5)));

        let outcome = rx.await.unwrap();
        assert_eq!(outcome.data.unwrap().price, 1.5);
        assert_eq!(table.pending_count(), 0);
    }

    #[tokio::test]
    async fn second_settle_is_a_noop() {
        let table = CorrelationTable::new();
        let (key, rx) = table.register();

        table.settle(key, ExtractionOutcome::success(MarketData::price_only(1.0)));
        // Late duplicate: must not panic or disturb anything.
        table.settle(key, ExtractionOutcome::success(MarketData::price_only(2.0)));

        assert_eq!(rx.await.unwrap().data.unwrap().price, 1.0);
    }

    #[tokio::test]
    async fn settle_unknown_key_is_a_noop() {
        let table = CorrelationTable::new();
        table.settle(
            Uuid::new_v4(),
            ExtractionOutcome::success(MarketData::price_only(1.0)),
        );
        assert_eq!(table.pending_count(), 0);
    }

    #[tokio::test]
    async fn settle_after_receiver_dropped_does_not_panic() {
        let table = CorrelationTable::new();
        let (key, rx) = table.register();
        drop(rx);
        table.settle(key, ExtractionOutcome::success(MarketData::price_only(1.0)));
        assert_eq!(table.pending_count(), 0);
    }

    #[tokio::test]
    async fn forget_drops_a_registration_without_settling() {
        let table = CorrelationTable::new();
        let (key, rx) = table.register();

        table.forget(key);

        assert_eq!(table.pending_count(), 0);
        // The caller observes a closed channel, not a result.
        assert!(rx.await.is_err());
    }
}
