use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{ConditionalUpdate, OrderStore, UpdateOutcome};
use crate::errors::StoreError;
use crate::models::{ChangeEvent, ChangeEventKind, Order, OrderRecord, OrderStatus};

/// In-process stand-in for the order store with the same conditional-write
/// semantics. Every committed mutation is appended to a change log, playing
/// the part of the CDC feed.
#[derive(Default)]
pub(crate) struct InMemoryOrderStore {
    rows: Mutex<HashMap<String, OrderRecord>>,
    changes: Mutex<Vec<ChangeEvent>>,
    unavailable: AtomicBool,
    committed_writes: AtomicUsize,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, order: &Order) {
        self.insert_record(order.to_record());
    }

    pub fn insert_record(&self, record: OrderRecord) {
        self.changes.lock().unwrap().push(ChangeEvent {
            order_id: Some(record.order_id.clone()),
            kind: ChangeEventKind::Create,
            new_snapshot: Some(record.clone()),
        });
        self.rows.lock().unwrap().insert(record.order_id.clone(), record);
    }

    pub fn record(&self, order_id: &str) -> Option<OrderRecord> {
        self.rows.lock().unwrap().get(order_id).cloned()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Conditional updates that actually committed.
    pub fn committed_writes(&self) -> usize {
        self.committed_writes.load(Ordering::SeqCst)
    }

    pub fn drain_changes(&self) -> Vec<ChangeEvent> {
        std::mem::take(&mut *self.changes.lock().unwrap())
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn get(&self, order_id: &str) -> Result<Option<OrderRecord>, StoreError> {
        self.check_available()?;
        Ok(self.record(order_id))
    }

    async fn scan_by_status(&self, status: OrderStatus) -> Result<Vec<OrderRecord>, StoreError> {
        self.check_available()?;
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.status.as_deref() == Some(status.as_str()))
            .cloned()
            .collect())
    }

    async fn conditional_update(&self, update: &ConditionalUpdate) -> Result<UpdateOutcome, StoreError> {
        self.check_available()?;

        let mut rows = self.rows.lock().unwrap();
        let Some(row) = rows.get_mut(&update.order_id) else {
            return Ok(UpdateOutcome::Rejected { current: None });
        };

        let matches = row
            .status()
            .map(|current| update.expected.contains(&current))
            .unwrap_or(false);
        if !matches {
            return Ok(UpdateOutcome::Rejected { current: row.status.clone() });
        }

        row.status = Some(update.target.as_str().to_string());
        if let Some(shipment) = &update.shipment {
            row.shipped_at = Some(shipment.shipped_at.to_rfc3339());
            row.shipment_reference = Some(shipment.shipment_reference.clone());
        }

        self.committed_writes.fetch_add(1, Ordering::SeqCst);
        self.changes.lock().unwrap().push(ChangeEvent {
            order_id: Some(row.order_id.clone()),
            kind: ChangeEventKind::Update,
            new_snapshot: Some(row.clone()),
        });
        Ok(UpdateOutcome::Applied)
    }
}
