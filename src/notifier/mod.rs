mod cdc;
pub mod templates;

pub use cdc::watch_changes;

use std::sync::Arc;
use std::time::Instant;

use crate::messaging::NotificationChannel;
use crate::metrics::Metrics;
use crate::models::{BatchReport, ChangeEvent, ChangeEventKind, ItemOutcome, OrderStatus};

// ============================================================================
// Change Notifier
// ============================================================================
//
// Reacts to committed order mutations, never to the signals that caused
// them. Every CREATE or UPDATE carrying a recognizable status produces one
// customer message; deletions and unknown statuses are dropped quietly.
// A failed publish is reported and not retried.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    Deleted,
    /// No snapshot, or a snapshot without an order id.
    Malformed,
    MissingEmail,
    MissingStatus,
    UnrecognizedStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    Published(OrderStatus),
    Ignored(IgnoreReason),
    Failed,
}

impl NotifyOutcome {
    pub fn item_outcome(&self) -> ItemOutcome {
        match self {
            NotifyOutcome::Published(_) => ItemOutcome::Succeeded,
            NotifyOutcome::Ignored(_) => ItemOutcome::Skipped,
            NotifyOutcome::Failed => ItemOutcome::Failed,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            NotifyOutcome::Published(_) => "published",
            NotifyOutcome::Ignored(_) => "ignored",
            NotifyOutcome::Failed => "failed",
        }
    }
}

pub struct ChangeNotifier {
    channel: Arc<dyn NotificationChannel>,
    metrics: Arc<Metrics>,
}

impl ChangeNotifier {
    pub fn new(channel: Arc<dyn NotificationChannel>, metrics: Arc<Metrics>) -> Self {
        Self { channel, metrics }
    }

    /// Handle one change event. Never fails; problems are reported in the outcome.
    pub async fn process(&self, event: &ChangeEvent) -> NotifyOutcome {
        let started = Instant::now();
        let (status_label, outcome) = self.try_process(event).await;

        self.metrics.record_notification(status_label, outcome.label());
        self.metrics
            .observe_duration("notifier", started.elapsed().as_secs_f64());
        outcome
    }

    async fn try_process(&self, event: &ChangeEvent) -> (&'static str, NotifyOutcome) {
        if event.kind == ChangeEventKind::Delete {
            tracing::debug!(order_id = ?event.order_id, "Order deleted, nothing to notify");
            return ("none", NotifyOutcome::Ignored(IgnoreReason::Deleted));
        }

        let Some(snapshot) = event
            .new_snapshot
            .as_ref()
            .filter(|s| !s.order_id.trim().is_empty())
        else {
            tracing::warn!(order_id = ?event.order_id, kind = ?event.kind, "Change event without a usable snapshot, skipping");
            return ("none", NotifyOutcome::Ignored(IgnoreReason::Malformed));
        };

        if snapshot.customer_email().is_none() {
            tracing::warn!(order_id = %snapshot.order_id, "Order has no customer email, skipping notification");
            return ("none", NotifyOutcome::Ignored(IgnoreReason::MissingEmail));
        }

        let Some(raw_status) = snapshot.status.as_deref().filter(|s| !s.trim().is_empty()) else {
            tracing::warn!(order_id = %snapshot.order_id, "Order has no status, skipping notification");
            return ("none", NotifyOutcome::Ignored(IgnoreReason::MissingStatus));
        };

        let Ok(status) = raw_status.parse::<OrderStatus>() else {
            tracing::debug!(order_id = %snapshot.order_id, status = %raw_status, "Unrecognized status, no template");
            return ("unknown", NotifyOutcome::Ignored(IgnoreReason::UnrecognizedStatus));
        };

        let notification = templates::render(status, snapshot);
        match self.channel.publish(&notification).await {
            Ok(()) => {
                tracing::info!(
                    order_id = %notification.order_id,
                    status = %status,
                    kind = ?event.kind,
                    "📤 Notification published"
                );
                (status.as_str(), NotifyOutcome::Published(status))
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    order_id = %notification.order_id,
                    status = %status,
                    "❌ Failed to publish notification"
                );
                (status.as_str(), NotifyOutcome::Failed)
            }
        }
    }

    /// Handle one delivery batch in order; one bad event never blocks the rest.
    pub async fn process_batch(&self, events: &[ChangeEvent]) -> BatchReport {
        let mut report = BatchReport::default();
        for event in events {
            report.record(self.process(event).await.item_outcome());
        }

        tracing::debug!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            skipped = report.skipped,
            failed = report.failed,
            "Change batch processed"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::recording::RecordingChannel;
    use crate::models::{Order, OrderRecord};

    fn notifier(channel: Arc<RecordingChannel>) -> ChangeNotifier {
        ChangeNotifier::new(channel, Arc::new(Metrics::new().unwrap()))
    }

    fn snapshot(id: &str, status: &str) -> OrderRecord {
        let mut record = Order::received(id, "Ana", "ana@example.com", "129.90", chrono::Utc::now()).to_record();
        record.status = Some(status.into());
        record
    }

    fn event(kind: ChangeEventKind, snapshot: Option<OrderRecord>) -> ChangeEvent {
        ChangeEvent {
            order_id: snapshot.as_ref().map(|s| s.order_id.clone()),
            kind,
            new_snapshot: snapshot,
        }
    }

    #[tokio::test]
    async fn test_create_publishes_received_notification() {
        let channel = Arc::new(RecordingChannel::default());
        let outcome = notifier(channel.clone())
            .process(&event(ChangeEventKind::Create, Some(snapshot("O1", "RECEIVED"))))
            .await;

        assert_eq!(outcome, NotifyOutcome::Published(OrderStatus::Received));
        let sent = channel.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].order_id, "O1");
        assert_eq!(sent[0].recipient, "ana@example.com");
        assert_eq!(sent[0].subject, "Order update: RECEIVED");
    }

    #[tokio::test]
    async fn test_delete_is_ignored() {
        let channel = Arc::new(RecordingChannel::default());
        let deleted = ChangeEvent {
            order_id: Some("O1".into()),
            kind: ChangeEventKind::Delete,
            new_snapshot: None,
        };

        let outcome = notifier(channel.clone()).process(&deleted).await;

        assert_eq!(outcome, NotifyOutcome::Ignored(IgnoreReason::Deleted));
        assert!(channel.sent().is_empty());
    }

    #[tokio::test]
    async fn test_missing_email_is_ignored() {
        let channel = Arc::new(RecordingChannel::default());
        let mut record = snapshot("O1", "SHIPPED");
        record.customer_email = Some(" ".into());

        let outcome = notifier(channel.clone())
            .process(&event(ChangeEventKind::Update, Some(record)))
            .await;

        assert_eq!(outcome, NotifyOutcome::Ignored(IgnoreReason::MissingEmail));
        assert!(channel.sent().is_empty());
    }

    #[tokio::test]
    async fn test_missing_and_unknown_status_are_ignored() {
        let channel = Arc::new(RecordingChannel::default());
        let notifier = notifier(channel.clone());

        let mut no_status = snapshot("O1", "RECEIVED");
        no_status.status = None;
        assert_eq!(
            notifier.process(&event(ChangeEventKind::Update, Some(no_status))).await,
            NotifyOutcome::Ignored(IgnoreReason::MissingStatus)
        );
        assert_eq!(
            notifier
                .process(&event(ChangeEventKind::Update, Some(snapshot("O2", "CANCELLED"))))
                .await,
            NotifyOutcome::Ignored(IgnoreReason::UnrecognizedStatus)
        );
        assert!(channel.sent().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_event_does_not_block_batch() {
        let channel = Arc::new(RecordingChannel::default());
        let events = vec![
            event(ChangeEventKind::Create, Some(snapshot("O1", "RECEIVED"))),
            ChangeEvent { order_id: None, kind: ChangeEventKind::Update, new_snapshot: None },
            event(ChangeEventKind::Update, Some(snapshot("O3", "SHIPPED"))),
        ];

        let report = notifier(channel.clone()).process_batch(&events).await;

        assert_eq!(
            report,
            BatchReport { attempted: 3, succeeded: 2, unchanged: 0, skipped: 1, failed: 0 }
        );
        let ids: Vec<_> = channel.sent().into_iter().map(|n| n.order_id).collect();
        assert_eq!(ids, vec!["O1", "O3"]);
    }

    #[tokio::test]
    async fn test_publish_failure_is_isolated() {
        let channel = Arc::new(RecordingChannel::failing_for(&["O2"]));
        let events = vec![
            event(ChangeEventKind::Update, Some(snapshot("O1", "IN_PREPARATION"))),
            event(ChangeEventKind::Update, Some(snapshot("O2", "IN_PREPARATION"))),
            event(ChangeEventKind::Update, Some(snapshot("O3", "IN_PREPARATION"))),
        ];

        let report = notifier(channel.clone()).process_batch(&events).await;

        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(channel.sent().len(), 2);
    }
}
