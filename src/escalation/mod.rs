// ============================================================================
// Escalation Scanner
// ============================================================================
//
// Finds orders that have sat in RECEIVED for at least the escalation
// threshold and asks the transition processor to move each one along.
//
// A scan keeps no state between runs: an order whose advance request failed
// is still RECEIVED and is simply selected again by the next run. That is
// the only retry there is.
//
// ============================================================================

mod client;

pub use client::{AdvanceClient, AdvanceRequest, HttpAdvanceClient, ADVANCE_PATH};

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::Serialize;
use tokio::time::MissedTickBehavior;

use crate::config::EscalationConfig;
use crate::errors::StoreError;
use crate::metrics::Metrics;
use crate::models::{OrderRecord, OrderStatus};
use crate::store::OrderStore;

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct ScanReport {
    /// Orders found due for escalation.
    pub matched: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub order_ids: Vec<String>,
}

/// Whether an order is due: still `RECEIVED` and created at least
/// `threshold` before `now`. Unparseable or future creation times are never
/// due.
pub fn is_due(record: &OrderRecord, now: DateTime<Utc>, threshold: Duration) -> bool {
    if record.status() != Some(OrderStatus::Received) {
        return false;
    }
    let Some(created_at) = record.created_at() else {
        return false;
    };
    match (now - created_at).to_std() {
        Ok(elapsed) => elapsed >= threshold,
        Err(_) => false,
    }
}

pub struct EscalationScanner {
    store: Arc<dyn OrderStore>,
    client: Arc<dyn AdvanceClient>,
    metrics: Arc<Metrics>,
    threshold: Duration,
    concurrency: usize,
}

impl EscalationScanner {
    pub fn new(
        store: Arc<dyn OrderStore>,
        client: Arc<dyn AdvanceClient>,
        metrics: Arc<Metrics>,
        cfg: &EscalationConfig,
    ) -> Self {
        Self {
            store,
            client,
            metrics,
            threshold: cfg.threshold,
            concurrency: cfg.concurrency.max(1),
        }
    }

    pub async fn run_once(&self) -> Result<ScanReport, StoreError> {
        self.run_at(Utc::now()).await
    }

    /// One scan pass as of `now`. Fails only if the store could not be
    /// scanned; individual advance failures are counted in the report.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<ScanReport, StoreError> {
        let started = Instant::now();

        let candidates = match self.store.scan_by_status(OrderStatus::Received).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::error!(error = %e, "Escalation scan could not read the order store");
                self.metrics.record_scan(false);
                return Err(e);
            }
        };

        let due: Vec<String> = candidates
            .iter()
            .filter(|record| {
                if record.created_at().is_none() {
                    tracing::warn!(
                        order_id = %record.order_id,
                        created_at = ?record.created_at,
                        "Order has no valid creation time, not escalating"
                    );
                }
                is_due(record, now, self.threshold)
            })
            .map(|record| record.order_id.clone())
            .collect();

        self.metrics.record_scan(true);

        if due.is_empty() {
            self.metrics
                .observe_duration("escalation", started.elapsed().as_secs_f64());
            tracing::debug!(scanned = candidates.len(), "No orders due for escalation");
            return Ok(ScanReport::default());
        }

        tracing::info!(
            scanned = candidates.len(),
            matched = due.len(),
            threshold_secs = self.threshold.as_secs(),
            "Escalating stalled orders"
        );

        let results: Vec<bool> = futures_util::stream::iter(due.iter())
            .map(|order_id| self.escalate(order_id))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let succeeded = results.iter().filter(|ok| **ok).count();
        let report = ScanReport {
            matched: due.len(),
            attempted: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            order_ids: due,
        };

        self.metrics
            .observe_duration("escalation", started.elapsed().as_secs_f64());
        tracing::info!(
            matched = report.matched,
            succeeded = report.succeeded,
            failed = report.failed,
            "Escalation scan complete"
        );
        Ok(report)
    }

    async fn escalate(&self, order_id: &str) -> bool {
        match self.client.request_advance(order_id).await {
            Ok(()) => {
                tracing::info!(order_id = %order_id, "📤 Advance requested");
                self.metrics.record_escalation_request(true);
                true
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    order_id = %order_id,
                    "Advance request failed, order stays due for the next scan"
                );
                self.metrics.record_escalation_request(false);
                false
            }
        }
    }

    /// Run a scan on every tick of `interval`, forever. A failed scan is
    /// logged and the loop waits for the next tick.
    pub async fn run_every(&self, interval: Duration) {
        tracing::info!(interval_secs = interval.as_secs(), "🔄 Escalation schedule started");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if let Err(e) = self.run_once().await {
                tracing::warn!(error = %e, "Escalation scan failed, waiting for next tick");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AdvanceError;
    use crate::models::{ConfirmationSignal, Order};
    use crate::storage::fixed::FixedMetadata;
    use crate::store::memory::InMemoryOrderStore;
    use crate::transition::TransitionProcessor;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::HashSet;
    use std::sync::Mutex;

    const FOUR_MINUTES: Duration = Duration::from_secs(240);

    #[derive(Default)]
    struct RecordingClient {
        calls: Mutex<Vec<String>>,
        failing: HashSet<String>,
    }

    #[async_trait]
    impl AdvanceClient for RecordingClient {
        async fn request_advance(&self, order_id: &str) -> Result<(), AdvanceError> {
            self.calls.lock().unwrap().push(order_id.to_string());
            if self.failing.contains(order_id) {
                return Err(AdvanceError::Status { status: 500, body: "boom".into() });
            }
            Ok(())
        }
    }

    /// Calls the processor in-process instead of over HTTP.
    struct DirectClient(Arc<TransitionProcessor>);

    #[async_trait]
    impl AdvanceClient for DirectClient {
        async fn request_advance(&self, order_id: &str) -> Result<(), AdvanceError> {
            self.0
                .advance(order_id)
                .await
                .map(|_| ())
                .map_err(|e| AdvanceError::Status { status: 503, body: e.to_string() })
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn config() -> EscalationConfig {
        EscalationConfig {
            target_scheme: "http".into(),
            target_host: "localhost".into(),
            target_port: 3000,
            threshold: FOUR_MINUTES,
            interval: Duration::from_secs(60),
            concurrency: 4,
            call_timeout: Duration::from_secs(10),
        }
    }

    fn scanner(store: Arc<InMemoryOrderStore>, client: Arc<dyn AdvanceClient>) -> EscalationScanner {
        EscalationScanner::new(store, client, Arc::new(Metrics::new().unwrap()), &config())
    }

    fn placed(id: &str, at: DateTime<Utc>) -> Order {
        Order::received(id, "Ana", "ana@example.com", "50.00", at)
    }

    #[test]
    fn test_threshold_boundary() {
        let record = placed("O1", t0()).to_record();

        assert!(!is_due(&record, t0() + chrono::Duration::seconds(239), FOUR_MINUTES));
        assert!(is_due(&record, t0() + chrono::Duration::seconds(240), FOUR_MINUTES));
        assert!(is_due(&record, t0() + chrono::Duration::hours(2), FOUR_MINUTES));
    }

    #[test]
    fn test_not_due_cases() {
        let mut future = placed("F", t0() + chrono::Duration::minutes(30)).to_record();
        assert!(!is_due(&future, t0(), FOUR_MINUTES));

        future.created_at = Some("01/05/2024 12:00".into());
        assert!(!is_due(&future, t0() + chrono::Duration::days(1), FOUR_MINUTES));

        let mut prep = placed("P", t0()).to_record();
        prep.status = Some("IN_PREPARATION".into());
        assert!(!is_due(&prep, t0() + chrono::Duration::days(1), FOUR_MINUTES));
    }

    #[tokio::test]
    async fn test_scan_selects_only_due_orders() {
        let store = Arc::new(InMemoryOrderStore::new());
        store.insert(&placed("old", t0()));
        store.insert(&placed("fresh", t0() + chrono::Duration::minutes(2)));
        let mut broken = placed("broken", t0()).to_record();
        broken.created_at = Some("not-a-date".into());
        store.insert_record(broken);

        let client = Arc::new(RecordingClient::default());
        let report = scanner(store, client.clone())
            .run_at(t0() + chrono::Duration::minutes(5))
            .await
            .unwrap();

        assert_eq!(report.matched, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.order_ids, vec!["old".to_string()]);
        assert_eq!(*client.calls.lock().unwrap(), vec!["old".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_advance_does_not_stop_the_scan() {
        let store = Arc::new(InMemoryOrderStore::new());
        for id in ["a", "b", "c"] {
            store.insert(&placed(id, t0()));
        }
        let client = Arc::new(RecordingClient {
            failing: HashSet::from(["b".to_string()]),
            ..Default::default()
        });

        let report = scanner(store, client.clone())
            .run_at(t0() + chrono::Duration::minutes(10))
            .await
            .unwrap();

        assert_eq!(report.attempted, 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(client.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_empty_store_is_quiet() {
        let store = Arc::new(InMemoryOrderStore::new());
        let client = Arc::new(RecordingClient::default());

        let report = scanner(store, client.clone()).run_at(t0()).await.unwrap();

        assert_eq!(report, ScanReport::default());
        assert!(client.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_scan_still_records_duration() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let client: Arc<dyn AdvanceClient> = Arc::new(RecordingClient::default());
        let scanner = EscalationScanner::new(
            Arc::new(InMemoryOrderStore::new()),
            client,
            metrics.clone(),
            &config(),
        );

        scanner.run_at(t0()).await.unwrap();

        let samples = metrics
            .processing_duration
            .with_label_values(&["escalation"])
            .get_sample_count();
        assert_eq!(samples, 1);
    }

    #[tokio::test]
    async fn test_store_failure_fails_the_run() {
        let store = Arc::new(InMemoryOrderStore::new());
        store.set_unavailable(true);
        let client = Arc::new(RecordingClient::default());

        assert!(scanner(store, client).run_at(t0()).await.is_err());
    }

    #[tokio::test]
    async fn test_shipped_order_is_not_re_promoted() {
        let store = Arc::new(InMemoryOrderStore::new());
        store.insert(&placed("O1", t0()));
        store.insert(&placed("O2", t0()));

        let processor = Arc::new(TransitionProcessor::new(
            store.clone(),
            Arc::new(FixedMetadata::default()),
            Arc::new(Metrics::new().unwrap()),
        ));

        // Shipment document for O1 lands one minute in.
        processor
            .apply(&ConfirmationSignal::shipment("O1", "invoices/o1.pdf"))
            .await
            .unwrap();
        let shipped = store.record("O1").unwrap();

        let sweep = scanner(store.clone(), Arc::new(DirectClient(processor.clone())));
        let report = sweep.run_at(t0() + chrono::Duration::minutes(5)).await.unwrap();

        assert_eq!(report.order_ids, vec!["O2".to_string()]);
        assert_eq!(store.record("O1").unwrap(), shipped);
        assert_eq!(store.record("O2").unwrap().status(), Some(OrderStatus::InPreparation));

        // A stray escalation for O1 is a no-op too.
        let outcome = processor.advance("O1").await.unwrap();
        assert_eq!(outcome.item_outcome(), crate::models::ItemOutcome::Unchanged);

        // The next scan finds nothing left in RECEIVED.
        let again = sweep.run_at(t0() + chrono::Duration::minutes(6)).await.unwrap();
        assert_eq!(again.matched, 0);
    }
}
