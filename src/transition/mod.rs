use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::errors::{InvocationError, TransitionError};
use crate::metrics::Metrics;
use crate::models::{BatchReport, ConfirmationSignal, ItemOutcome, OrderStatus, SignalKind};
use crate::storage::{ObjectMetadataSource, StorageEvent, StorageEventRecord};
use crate::store::{ConditionalUpdate, OrderStore, ShipmentDetails, UpdateOutcome};

// ============================================================================
// Transition Processor
// ============================================================================
//
// Turns confirmation signals into conditional status writes:
//
//   escalation         RECEIVED                  -> IN_PREPARATION
//   shipment upload    RECEIVED | IN_PREPARATION -> SHIPPED
//
// The write is conditioned on the allowed predecessor statuses, so a
// duplicate or late delivery of a signal after the order has moved on is an
// `Unchanged` outcome rather than an error or a regression. The processor
// never notifies anyone; the change feed does that.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The input does not name an order; it is not order-related.
    MissingOrderId,
    OrderNotFound,
    /// The stored status is not one of the known stages.
    UnrecognizedStatus,
    /// The storage record reports something other than a new object.
    NotAnUpload,
    /// The storage record does not name a bucket and key.
    MissingObject,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TransitionOutcome {
    Applied { from: OrderStatus, to: OrderStatus },
    /// The order is already at or past the target stage.
    Unchanged { current: Option<String> },
    Skipped { reason: SkipReason },
}

impl TransitionOutcome {
    pub fn item_outcome(&self) -> ItemOutcome {
        match self {
            TransitionOutcome::Applied { .. } => ItemOutcome::Succeeded,
            TransitionOutcome::Unchanged { .. } => ItemOutcome::Unchanged,
            TransitionOutcome::Skipped { .. } => ItemOutcome::Skipped,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            TransitionOutcome::Applied { .. } => "applied",
            TransitionOutcome::Unchanged { .. } => "unchanged",
            TransitionOutcome::Skipped { .. } => "skipped",
        }
    }

    fn skipped(reason: SkipReason) -> Self {
        TransitionOutcome::Skipped { reason }
    }
}

pub struct TransitionProcessor {
    store: Arc<dyn OrderStore>,
    metadata: Arc<dyn ObjectMetadataSource>,
    metrics: Arc<Metrics>,
}

impl TransitionProcessor {
    pub fn new(
        store: Arc<dyn OrderStore>,
        metadata: Arc<dyn ObjectMetadataSource>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { store, metadata, metrics }
    }

    /// Escalation entry point: promote a stalled order to `IN_PREPARATION`.
    pub async fn advance(&self, order_id: &str) -> Result<TransitionOutcome, TransitionError> {
        let order_id = order_id.trim();
        if order_id.is_empty() {
            tracing::debug!("Advance request without an order id, ignoring");
            self.metrics
                .record_transition(OrderStatus::InPreparation.as_str(), "skipped");
            return Ok(TransitionOutcome::skipped(SkipReason::MissingOrderId));
        }

        self.apply(&ConfirmationSignal::escalation(order_id)).await
    }

    /// Apply one signal. Store failures are returned so the invoking trigger
    /// can redeliver; everything else is an outcome.
    pub async fn apply(&self, signal: &ConfirmationSignal) -> Result<TransitionOutcome, TransitionError> {
        let started = Instant::now();
        let target = signal.target();

        let result = self.try_apply(signal, target).await;

        match &result {
            Ok(outcome) => self.metrics.record_transition(target.as_str(), outcome.label()),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    order_id = %signal.order_id,
                    target = %target,
                    trigger = %signal.trigger(),
                    metadata = ?signal.correlation_metadata,
                    "❌ Transition failed, leaving retry to the trigger's redelivery"
                );
                self.metrics.record_transition(target.as_str(), "failed");
            }
        }
        self.metrics
            .observe_duration("transition", started.elapsed().as_secs_f64());

        result
    }

    async fn try_apply(
        &self,
        signal: &ConfirmationSignal,
        target: OrderStatus,
    ) -> Result<TransitionOutcome, TransitionError> {
        let order_id = signal.order_id.as_str();

        let Some(record) = self.store.get(order_id).await? else {
            tracing::warn!(order_id = %order_id, trigger = %signal.trigger(), "Order not found, skipping signal");
            return Ok(TransitionOutcome::skipped(SkipReason::OrderNotFound));
        };

        let Some(current) = record.status() else {
            tracing::warn!(
                order_id = %order_id,
                status = ?record.status,
                "Order has no recognized status, skipping signal"
            );
            return Ok(TransitionOutcome::skipped(SkipReason::UnrecognizedStatus));
        };

        if !current.can_advance_to(target) {
            tracing::info!(
                order_id = %order_id,
                current = %current,
                target = %target,
                "Order already at or past target, nothing to do"
            );
            return Ok(TransitionOutcome::Unchanged {
                current: Some(current.as_str().to_string()),
            });
        }

        let mut update = ConditionalUpdate::advance(order_id, target);
        if let SignalKind::Shipment { evidence_reference } = &signal.kind {
            update = update.with_shipment(ShipmentDetails {
                shipped_at: Utc::now(),
                shipment_reference: evidence_reference.clone(),
            });
        }

        match self.store.conditional_update(&update).await? {
            UpdateOutcome::Applied => {
                tracing::info!(
                    order_id = %order_id,
                    from = %current,
                    to = %target,
                    trigger = %signal.trigger(),
                    "✅ Order status advanced"
                );
                Ok(TransitionOutcome::Applied { from: current, to: target })
            }
            UpdateOutcome::Rejected { current } => {
                tracing::info!(
                    order_id = %order_id,
                    current = ?current,
                    target = %target,
                    "Order moved concurrently, conditional update not applied"
                );
                Ok(TransitionOutcome::Unchanged { current })
            }
        }
    }

    /// Storage-event entry point. Each record is handled independently;
    /// the invocation itself only fails when every record failed on an
    /// unreachable dependency (order store or object storage).
    pub async fn handle_storage_event(&self, event: &StorageEvent) -> Result<BatchReport, InvocationError> {
        let invocation_id = Uuid::now_v7();
        tracing::info!(
            invocation_id = %invocation_id,
            records = event.records.len(),
            "Processing storage event batch"
        );

        let results = futures_util::future::join_all(
            event.records.iter().map(|record| self.handle_storage_record(record)),
        )
        .await;

        let mut report = BatchReport::default();
        let mut store_failures = 0;
        let mut dependency_failures = 0;
        for result in results {
            match result {
                Ok(outcome) => report.record(outcome.item_outcome()),
                Err(e) => {
                    if e.is_store() {
                        store_failures += 1;
                    }
                    dependency_failures += 1;
                    report.record(ItemOutcome::Failed);
                }
            }
        }

        if dependency_failures > 0 && dependency_failures == event.records.len() {
            tracing::error!(
                invocation_id = %invocation_id,
                failed = dependency_failures,
                store_failures,
                "Dependencies unreachable for the whole batch"
            );
            return Err(if store_failures == dependency_failures {
                InvocationError::StoreUnreachable { failed: store_failures }
            } else {
                InvocationError::DependenciesUnreachable { failed: dependency_failures }
            });
        }

        tracing::info!(
            invocation_id = %invocation_id,
            succeeded = report.succeeded,
            unchanged = report.unchanged,
            skipped = report.skipped,
            failed = report.failed,
            "Storage event batch processed"
        );
        Ok(report)
    }

    async fn handle_storage_record(
        &self,
        record: &StorageEventRecord,
    ) -> Result<TransitionOutcome, TransitionError> {
        let shipped = OrderStatus::Shipped.as_str();

        if !record.is_upload() {
            tracing::debug!(event_name = ?record.event_name, "Not an upload event, ignoring");
            self.metrics.record_transition(shipped, "skipped");
            return Ok(TransitionOutcome::skipped(SkipReason::NotAnUpload));
        }

        let Some(location) = record.location() else {
            tracing::warn!(event_name = ?record.event_name, "Storage record names no object, skipping");
            self.metrics.record_transition(shipped, "skipped");
            return Ok(TransitionOutcome::skipped(SkipReason::MissingObject));
        };

        tracing::debug!(object = %location, "Resolving order tag for uploaded object");

        let order_id = match self.metadata.order_tag(&location).await {
            Ok(Some(order_id)) => order_id,
            Ok(None) => {
                tracing::debug!(object = %location, "Object carries no order tag, ignoring");
                self.metrics.record_transition(shipped, "skipped");
                return Ok(TransitionOutcome::skipped(SkipReason::MissingOrderId));
            }
            Err(e) => {
                tracing::error!(error = %e, object = %location, "Failed to read object metadata");
                self.metrics.record_transition(shipped, "failed");
                return Err(e.into());
            }
        };

        let mut signal = ConfirmationSignal::shipment(order_id, location.key.clone())
            .with_metadata("bucket", location.bucket.clone());
        if let Some(event_name) = &record.event_name {
            signal = signal.with_metadata("event_name", event_name.clone());
        }

        self.apply(&signal).await
    }
}
