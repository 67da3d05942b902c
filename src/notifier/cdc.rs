use std::sync::Arc;

use async_trait::async_trait;
use scylla::client::session::Session;
use scylla_cdc::consumer::{CDCRow, Consumer, ConsumerFactory, OperationType};
use scylla_cdc::log_reader::CDCLogReaderBuilder;

use super::ChangeNotifier;
use crate::models::{ChangeEvent, ChangeEventKind, OrderRecord};

// ============================================================================
// CDC Change Feed - ScyllaDB CDC log -> ChangeNotifier
// ============================================================================
//
// The orders table is created with CDC post-images enabled, so every write
// shows up in the log as a delta row followed by a post-image row holding
// the full row as committed. The delta row tells us CREATE vs UPDATE; the
// post-image is the snapshot. Deletes have no post-image and become events
// on their own row. Events are handed to the notifier one CDC batch at a
// time, closed by the row flagged `end_of_batch`.
//
// ============================================================================

/// What a CDC log row means for order notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowRole {
    Delta(ChangeEventKind),
    PostImage,
    Other,
}

fn classify(operation: &OperationType) -> RowRole {
    match operation {
        OperationType::RowInsert => RowRole::Delta(ChangeEventKind::Create),
        OperationType::RowUpdate => RowRole::Delta(ChangeEventKind::Update),
        OperationType::RowDelete | OperationType::PartitionDelete => {
            RowRole::Delta(ChangeEventKind::Delete)
        }
        OperationType::PostImage => RowRole::PostImage,
        _ => RowRole::Other,
    }
}

/// Pairs each delta row with the post-image that follows it, and collects
/// the resulting events until the CDC batch they were written in ends.
#[derive(Debug, Default)]
struct ChangeAssembler {
    pending: Option<ChangeEventKind>,
    window: Vec<ChangeEvent>,
}

impl ChangeAssembler {
    /// Feed one log row; returns the events of a CDC batch once its last row
    /// has been seen.
    fn push_row(
        &mut self,
        role: RowRole,
        order_id: Option<String>,
        snapshot: impl FnOnce() -> Option<OrderRecord>,
        end_of_batch: bool,
    ) -> Option<Vec<ChangeEvent>> {
        if let Some(event) = self.accept(role, order_id, snapshot) {
            self.window.push(event);
        }
        if end_of_batch && !self.window.is_empty() {
            return Some(std::mem::take(&mut self.window));
        }
        None
    }

    fn accept(
        &mut self,
        role: RowRole,
        order_id: Option<String>,
        snapshot: impl FnOnce() -> Option<OrderRecord>,
    ) -> Option<ChangeEvent> {
        match role {
            RowRole::Delta(ChangeEventKind::Delete) => {
                self.pending = None;
                Some(ChangeEvent {
                    order_id,
                    kind: ChangeEventKind::Delete,
                    new_snapshot: None,
                })
            }
            RowRole::Delta(kind) => {
                self.pending = Some(kind);
                None
            }
            RowRole::PostImage => Some(ChangeEvent {
                order_id,
                // an LWT update against a missing row still lands as an update
                kind: self.pending.take().unwrap_or(ChangeEventKind::Update),
                new_snapshot: snapshot(),
            }),
            RowRole::Other => None,
        }
    }
}

fn text_column(data: &CDCRow<'_>, column: &str) -> Option<String> {
    if !data.column_exists(column) {
        return None;
    }
    data.get_value(column)
        .as_ref()
        .and_then(|v| v.as_text())
        .map(|s| s.to_string())
}

fn snapshot_from_row(data: &CDCRow<'_>) -> Option<OrderRecord> {
    let order_id = text_column(data, "order_id")?;
    Some(OrderRecord {
        order_id,
        status: text_column(data, "status"),
        customer_name: text_column(data, "customer_name"),
        customer_email: text_column(data, "customer_email"),
        amount: text_column(data, "amount"),
        created_at: text_column(data, "created_at"),
        shipped_at: text_column(data, "shipped_at"),
        shipment_reference: text_column(data, "shipment_reference"),
    })
}

pub(crate) struct OrderChangeConsumer {
    notifier: Arc<ChangeNotifier>,
    assembler: ChangeAssembler,
}

impl OrderChangeConsumer {
    pub fn new(notifier: Arc<ChangeNotifier>) -> Self {
        Self {
            notifier,
            assembler: ChangeAssembler::default(),
        }
    }
}

#[async_trait]
impl Consumer for OrderChangeConsumer {
    async fn consume_cdc(&mut self, data: CDCRow<'_>) -> anyhow::Result<()> {
        tracing::debug!(
            stream_id = ?data.stream_id,
            operation = %data.operation,
            "Received CDC row"
        );

        let role = classify(&data.operation);
        let order_id = text_column(&data, "order_id");
        let window = self.assembler.push_row(
            role,
            order_id,
            || snapshot_from_row(&data),
            data.end_of_batch,
        );

        // Outcomes are reported by the notifier; the stream itself never errors.
        if let Some(events) = window {
            self.notifier.process_batch(&events).await;
        }
        Ok(())
    }
}

/// scylla-cdc creates one consumer per VNode group.
pub(crate) struct OrderChangeConsumerFactory {
    notifier: Arc<ChangeNotifier>,
}

impl OrderChangeConsumerFactory {
    pub fn new(notifier: Arc<ChangeNotifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl ConsumerFactory for OrderChangeConsumerFactory {
    async fn new_consumer(&self) -> Box<dyn Consumer> {
        tracing::debug!("Creating new OrderChangeConsumer instance");
        Box::new(OrderChangeConsumer::new(self.notifier.clone()))
    }
}

/// Stream the orders table's CDC log into the notifier until the reader stops.
pub async fn watch_changes(
    session: Arc<Session>,
    keyspace: &str,
    table: &str,
    notifier: Arc<ChangeNotifier>,
) -> anyhow::Result<()> {
    tracing::info!(keyspace = %keyspace, table = %table, "🔄 Starting CDC change feed");

    let factory = Arc::new(OrderChangeConsumerFactory::new(notifier));

    // The reader stops its workers when dropped, so it stays bound until the
    // handle completes.
    let (_reader, handle) = CDCLogReaderBuilder::new()
        .session(session)
        .keyspace(keyspace)
        .table_name(table)
        .consumer_factory(factory)
        .build()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create CDC log reader: {}", e))?;

    tracing::info!("🎯 Listening for changes to {}.{}", keyspace, table);

    match handle.await {
        Ok(()) => {
            tracing::info!("CDC reader completed");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "CDC reader failed");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, status: &str) -> OrderRecord {
        OrderRecord {
            order_id: id.into(),
            status: Some(status.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_classify_operations() {
        assert_eq!(classify(&OperationType::RowInsert), RowRole::Delta(ChangeEventKind::Create));
        assert_eq!(classify(&OperationType::RowUpdate), RowRole::Delta(ChangeEventKind::Update));
        assert_eq!(classify(&OperationType::RowDelete), RowRole::Delta(ChangeEventKind::Delete));
        assert_eq!(
            classify(&OperationType::PartitionDelete),
            RowRole::Delta(ChangeEventKind::Delete)
        );
        assert_eq!(classify(&OperationType::PostImage), RowRole::PostImage);
        assert_eq!(classify(&OperationType::PreImage), RowRole::Other);
    }

    #[test]
    fn test_insert_then_post_image_is_create() {
        let mut assembler = ChangeAssembler::default();

        let delta = assembler.accept(RowRole::Delta(ChangeEventKind::Create), Some("O1".into()), || None);
        assert!(delta.is_none());

        let event = assembler
            .accept(RowRole::PostImage, Some("O1".into()), || Some(record("O1", "RECEIVED")))
            .unwrap();
        assert_eq!(event.kind, ChangeEventKind::Create);
        assert_eq!(event.new_snapshot.unwrap().status.as_deref(), Some("RECEIVED"));
    }

    #[test]
    fn test_update_then_post_image_is_update() {
        let mut assembler = ChangeAssembler::default();
        assembler.accept(RowRole::Delta(ChangeEventKind::Update), Some("O1".into()), || None);

        let event = assembler
            .accept(RowRole::PostImage, Some("O1".into()), || Some(record("O1", "SHIPPED")))
            .unwrap();
        assert_eq!(event.kind, ChangeEventKind::Update);

        // pending kind is consumed by its post-image
        let orphan = assembler
            .accept(RowRole::PostImage, Some("O2".into()), || Some(record("O2", "SHIPPED")))
            .unwrap();
        assert_eq!(orphan.kind, ChangeEventKind::Update);
    }

    #[test]
    fn test_delete_emits_immediately_without_snapshot() {
        let mut assembler = ChangeAssembler::default();

        let event = assembler
            .accept(RowRole::Delta(ChangeEventKind::Delete), Some("O1".into()), || {
                Some(record("O1", "RECEIVED"))
            })
            .unwrap();

        assert_eq!(event.kind, ChangeEventKind::Delete);
        assert_eq!(event.order_id.as_deref(), Some("O1"));
        assert!(event.new_snapshot.is_none());
    }

    #[test]
    fn test_events_are_released_at_end_of_batch() {
        let mut assembler = ChangeAssembler::default();

        let released = assembler.push_row(
            RowRole::Delta(ChangeEventKind::Update),
            Some("O1".into()),
            || None,
            false,
        );
        assert!(released.is_none());

        let released = assembler.push_row(
            RowRole::PostImage,
            Some("O1".into()),
            || Some(record("O1", "SHIPPED")),
            false,
        );
        assert!(released.is_none());

        let window = assembler
            .push_row(RowRole::Delta(ChangeEventKind::Delete), Some("O2".into()), || None, true)
            .unwrap();
        let kinds: Vec<_> = window.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![ChangeEventKind::Update, ChangeEventKind::Delete]);

        // an ending batch with nothing actionable releases nothing
        assert!(assembler.push_row(RowRole::Other, None, || None, true).is_none());
    }

    #[test]
    fn test_other_rows_are_ignored() {
        let mut assembler = ChangeAssembler::default();
        assert!(assembler.accept(RowRole::Other, None, || None).is_none());
    }
}
