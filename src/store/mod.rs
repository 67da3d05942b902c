// ============================================================================
// Order Store
// ============================================================================
//
// The durable record every trigger converges on. All coordination between
// the triggers happens here: writes are conditional on the current status,
// so concurrent or redelivered transitions cannot regress an order.
//
// ============================================================================

mod scylla_store;
#[cfg(test)]
pub(crate) mod memory;

pub use scylla_store::{connect, ScyllaOrderStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::StoreError;
use crate::models::{OrderRecord, OrderStatus};

/// Shipment columns written together with the `SHIPPED` status.
#[derive(Debug, Clone, PartialEq)]
pub struct ShipmentDetails {
    pub shipped_at: DateTime<Utc>,
    pub shipment_reference: String,
}

/// A status write that only commits if the order's current status is one of
/// `expected`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalUpdate {
    pub order_id: String,
    pub expected: Vec<OrderStatus>,
    pub target: OrderStatus,
    pub shipment: Option<ShipmentDetails>,
}

impl ConditionalUpdate {
    pub fn advance(order_id: impl Into<String>, target: OrderStatus) -> Self {
        Self {
            order_id: order_id.into(),
            expected: target.predecessors().to_vec(),
            target,
            shipment: None,
        }
    }

    pub fn with_shipment(mut self, shipment: ShipmentDetails) -> Self {
        self.shipment = Some(shipment);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    Applied,
    /// The precondition did not hold. `current` is the status the store saw,
    /// or `None` if the order does not exist.
    Rejected { current: Option<String> },
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn get(&self, order_id: &str) -> Result<Option<OrderRecord>, StoreError>;

    /// Full scan of the table, filtered to orders currently in `status`.
    async fn scan_by_status(&self, status: OrderStatus) -> Result<Vec<OrderRecord>, StoreError>;

    async fn conditional_update(&self, update: &ConditionalUpdate) -> Result<UpdateOutcome, StoreError>;
}
