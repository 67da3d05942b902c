use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Order Status
// ============================================================================

/// Fulfillment stage of an order. Variants are declared in lifecycle order,
/// so the derived `Ord` is the progression order.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Received,
    InPreparation,
    Shipped,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 3] = [
        OrderStatus::Received,
        OrderStatus::InPreparation,
        OrderStatus::Shipped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Received => "RECEIVED",
            OrderStatus::InPreparation => "IN_PREPARATION",
            OrderStatus::Shipped => "SHIPPED",
        }
    }

    /// Statuses an order may hold immediately before moving to `self`.
    ///
    /// Shipping is allowed straight from `RECEIVED`; nothing moves back to
    /// `RECEIVED`.
    pub fn predecessors(&self) -> &'static [OrderStatus] {
        match self {
            OrderStatus::Received => &[],
            OrderStatus::InPreparation => &[OrderStatus::Received],
            OrderStatus::Shipped => &[OrderStatus::Received, OrderStatus::InPreparation],
        }
    }

    pub fn can_advance_to(&self, target: OrderStatus) -> bool {
        target.predecessors().contains(self)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized order status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for OrderStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

// ============================================================================
// Order Models
// ============================================================================

/// A fully-formed order, as the upstream placement flow writes it. Orders
/// are created outside this service, so only tests build them.
#[cfg(test)]
#[derive(Clone, Debug, PartialEq)]
pub struct Order {
    pub order_id: String,
    pub status: OrderStatus,
    pub customer_name: String,
    pub customer_email: String,
    pub amount: String,
    pub created_at: DateTime<Utc>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub shipment_reference: Option<String>,
}

#[cfg(test)]
impl Order {
    /// A freshly placed order.
    pub fn received(
        order_id: impl Into<String>,
        customer_name: impl Into<String>,
        customer_email: impl Into<String>,
        amount: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            status: OrderStatus::Received,
            customer_name: customer_name.into(),
            customer_email: customer_email.into(),
            amount: amount.into(),
            created_at,
            shipped_at: None,
            shipment_reference: None,
        }
    }

    pub fn to_record(&self) -> OrderRecord {
        OrderRecord {
            order_id: self.order_id.clone(),
            status: Some(self.status.as_str().to_string()),
            customer_name: Some(self.customer_name.clone()),
            customer_email: Some(self.customer_email.clone()),
            amount: Some(self.amount.clone()),
            created_at: Some(self.created_at.to_rfc3339()),
            shipped_at: self.shipped_at.map(|t| t.to_rfc3339()),
            shipment_reference: self.shipment_reference.clone(),
        }
    }
}

/// An order row exactly as persisted (and as carried by the change feed).
///
/// Every non-key column is optional: rows written by other producers, or
/// snapshots from the feed, are not guaranteed to be complete.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecord {
    pub order_id: String,
    pub status: Option<String>,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub amount: Option<String>,
    pub created_at: Option<String>,
    pub shipped_at: Option<String>,
    pub shipment_reference: Option<String>,
}

impl OrderRecord {
    /// Parsed status; `None` when absent or not one of the known stages.
    pub fn status(&self) -> Option<OrderStatus> {
        self.status.as_deref().and_then(|s| s.parse().ok())
    }

    /// Parsed creation time; `None` when absent or not RFC 3339.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
    }

    pub fn customer_email(&self) -> Option<&str> {
        self.customer_email.as_deref().filter(|e| !e.trim().is_empty())
    }
}

// ============================================================================
// Transient Inputs
// ============================================================================

/// Which trigger produced a confirmation signal.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalKind {
    /// The order sat in `RECEIVED` past the escalation deadline.
    Escalation,
    /// A shipment document was uploaded for the order.
    Shipment { evidence_reference: String },
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ConfirmationSignal {
    pub order_id: String,
    pub kind: SignalKind,
    #[serde(default)]
    pub correlation_metadata: BTreeMap<String, String>,
}

impl ConfirmationSignal {
    pub fn escalation(order_id: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            kind: SignalKind::Escalation,
            correlation_metadata: BTreeMap::from([(
                "trigger".to_string(),
                "escalation".to_string(),
            )]),
        }
    }

    pub fn shipment(order_id: impl Into<String>, evidence_reference: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            kind: SignalKind::Shipment {
                evidence_reference: evidence_reference.into(),
            },
            correlation_metadata: BTreeMap::from([(
                "trigger".to_string(),
                "storage".to_string(),
            )]),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.correlation_metadata.insert(key.into(), value.into());
        self
    }

    /// Status this signal asks the order to reach.
    pub fn target(&self) -> OrderStatus {
        match self.kind {
            SignalKind::Escalation => OrderStatus::InPreparation,
            SignalKind::Shipment { .. } => OrderStatus::Shipped,
        }
    }

    pub fn trigger(&self) -> &str {
        self.correlation_metadata
            .get("trigger")
            .map(String::as_str)
            .unwrap_or("unknown")
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeEventKind {
    Create,
    Update,
    Delete,
}

/// One committed mutation observed on the order store's change feed.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChangeEvent {
    pub order_id: Option<String>,
    pub kind: ChangeEventKind,
    pub new_snapshot: Option<OrderRecord>,
}

// ============================================================================
// Batch Reporting
// ============================================================================

/// How a single item of a batch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// The item produced its effect (write committed, call accepted, message published).
    Succeeded,
    /// The item was valid but its effect had already happened.
    Unchanged,
    /// The item was irrelevant or malformed and was dropped.
    Skipped,
    /// A dependency failed while handling the item.
    Failed,
}

/// Partial-success summary of one invocation.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchReport {
    pub fn record(&mut self, outcome: ItemOutcome) {
        self.attempted += 1;
        match outcome {
            ItemOutcome::Succeeded => self.succeeded += 1,
            ItemOutcome::Unchanged => self.unchanged += 1,
            ItemOutcome::Skipped => self.skipped += 1,
            ItemOutcome::Failed => self.failed += 1,
        }
    }
}

impl FromIterator<ItemOutcome> for BatchReport {
    fn from_iter<I: IntoIterator<Item = ItemOutcome>>(iter: I) -> Self {
        let mut report = BatchReport::default();
        for outcome in iter {
            report.record(outcome);
        }
        report
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
