use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use scylla::client::session::Session;
use scylla::client::session_builder::SessionBuilder;
use scylla::value::{CqlValue, Row};

use super::{ConditionalUpdate, OrderStore, UpdateOutcome};
use crate::config::StoreConfig;
use crate::errors::StoreError;
use crate::models::{OrderRecord, OrderStatus};

// ============================================================================
// ScyllaDB Order Store
// ============================================================================
//
// Orders live in a single text-typed table keyed by order_id. Status
// changes are lightweight transactions (`UPDATE ... IF status IN (...)`),
// which gives the conditional-write semantics every trigger relies on.
//
// The table is created with CDC and post-images enabled so the change
// notifier can read full snapshots from the log.
//
// ============================================================================

const COLUMNS: &str = "order_id, status, customer_name, customer_email, amount, \
                       created_at, shipped_at, shipment_reference";

type OrderRow = (
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
);

fn record_from_row(row: OrderRow) -> OrderRecord {
    let (order_id, status, customer_name, customer_email, amount, created_at, shipped_at, shipment_reference) = row;
    OrderRecord {
        order_id,
        status,
        customer_name,
        customer_email,
        amount,
        created_at,
        shipped_at,
        shipment_reference,
    }
}

/// Open a session against the configured cluster.
pub async fn connect(cfg: &StoreConfig) -> Result<Session, StoreError> {
    tracing::info!(nodes = ?cfg.nodes, keyspace = %cfg.keyspace, "Connecting to ScyllaDB...");

    let mut builder = SessionBuilder::new().known_nodes(&cfg.nodes);
    if let (Some(user), Some(password)) = (&cfg.username, &cfg.password) {
        builder = builder.user(user, password);
    }

    let session = tokio::time::timeout(cfg.call_timeout, builder.build())
        .await
        .map_err(|_| StoreError::Timeout(cfg.call_timeout))?
        .map_err(StoreError::unavailable)?;

    tracing::info!("✅ Connected to ScyllaDB");
    Ok(session)
}

pub struct ScyllaOrderStore {
    session: Arc<Session>,
    keyspace: String,
    table: String,
    call_timeout: Duration,
    select_by_id: String,
    select_by_status: String,
}

impl ScyllaOrderStore {
    pub fn new(session: Arc<Session>, cfg: &StoreConfig) -> Self {
        let table_ref = format!("{}.{}", cfg.keyspace, cfg.table);
        Self {
            session,
            keyspace: cfg.keyspace.clone(),
            table: cfg.table.clone(),
            call_timeout: cfg.call_timeout,
            select_by_id: format!("SELECT {COLUMNS} FROM {table_ref} WHERE order_id = ?"),
            select_by_status: format!("SELECT {COLUMNS} FROM {table_ref} WHERE status = ? ALLOW FILTERING"),
        }
    }

    fn table_ref(&self) -> String {
        format!("{}.{}", self.keyspace, self.table)
    }

    /// Create the keyspace and the CDC-enabled orders table if missing.
    pub async fn ensure_schema(&self, replication_factor: u32) -> Result<(), StoreError> {
        let keyspace = format!(
            "CREATE KEYSPACE IF NOT EXISTS {} WITH REPLICATION = \
             {{'class': 'SimpleStrategy', 'replication_factor': {}}}",
            self.keyspace, replication_factor
        );
        self.bounded(self.session.query_unpaged(keyspace, &[])).await?;

        let table = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                order_id text PRIMARY KEY,
                status text,
                customer_name text,
                customer_email text,
                amount text,
                created_at text,
                shipped_at text,
                shipment_reference text
            ) WITH cdc = {{'enabled': true, 'postimage': true}}",
            self.table_ref()
        );
        self.bounded(self.session.query_unpaged(table, &[])).await?;

        tracing::info!(table = %self.table_ref(), "Order table ready (CDC post-images enabled)");
        Ok(())
    }

    async fn bounded<F, T, E>(&self, operation: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        match tokio::time::timeout(self.call_timeout, operation).await {
            Ok(result) => result.map_err(StoreError::unavailable),
            Err(_) => Err(StoreError::Timeout(self.call_timeout)),
        }
    }
}

fn update_statement(table_ref: &str, update: &ConditionalUpdate) -> (String, Vec<String>) {
    let mut assignments = vec!["status = ?"];
    let mut values = vec![update.target.as_str().to_string()];

    if let Some(shipment) = &update.shipment {
        assignments.push("shipped_at = ?");
        assignments.push("shipment_reference = ?");
        values.push(shipment.shipped_at.to_rfc3339());
        values.push(shipment.shipment_reference.clone());
    }

    values.push(update.order_id.clone());

    let placeholders = vec!["?"; update.expected.len()].join(", ");
    values.extend(update.expected.iter().map(|s| s.as_str().to_string()));

    let cql = format!(
        "UPDATE {} SET {} WHERE order_id = ? IF status IN ({})",
        table_ref,
        assignments.join(", "),
        placeholders
    );
    (cql, values)
}

/// Interpret an LWT result row: `[applied]` first, then the current value of
/// the condition column when the write was not applied.
fn lwt_outcome(row: &Row) -> UpdateOutcome {
    let applied = matches!(row.columns.first(), Some(Some(CqlValue::Boolean(true))));
    if applied {
        return UpdateOutcome::Applied;
    }

    let current = row
        .columns
        .get(1)
        .and_then(|column| column.as_ref())
        .and_then(|value| value.as_text())
        .cloned();
    UpdateOutcome::Rejected { current }
}

#[async_trait]
impl OrderStore for ScyllaOrderStore {
    async fn get(&self, order_id: &str) -> Result<Option<OrderRecord>, StoreError> {
        let result = self
            .bounded(self.session.query_unpaged(self.select_by_id.as_str(), (order_id,)))
            .await?;

        let rows = result.into_rows_result().map_err(StoreError::decode)?;
        let row = rows.maybe_first_row::<OrderRow>().map_err(StoreError::decode)?;

        Ok(row.map(record_from_row))
    }

    async fn scan_by_status(&self, status: OrderStatus) -> Result<Vec<OrderRecord>, StoreError> {
        let scan = async {
            let pager = self
                .session
                .query_iter(self.select_by_status.as_str(), (status.as_str(),))
                .await
                .map_err(StoreError::unavailable)?;

            pager
                .rows_stream::<OrderRow>()
                .map_err(StoreError::decode)?
                .map_ok(record_from_row)
                .try_collect::<Vec<_>>()
                .await
                .map_err(StoreError::unavailable)
        };

        let records = tokio::time::timeout(self.call_timeout, scan)
            .await
            .map_err(|_| StoreError::Timeout(self.call_timeout))??;

        tracing::debug!(status = %status, count = records.len(), "Scanned orders by status");
        Ok(records)
    }

    async fn conditional_update(&self, update: &ConditionalUpdate) -> Result<UpdateOutcome, StoreError> {
        if update.expected.is_empty() {
            tracing::debug!(order_id = %update.order_id, target = %update.target, "No status can precede target");
            return Ok(UpdateOutcome::Rejected { current: None });
        }

        let (cql, values) = update_statement(&self.table_ref(), update);
        let result = self.bounded(self.session.query_unpaged(cql, values)).await?;

        let rows = result.into_rows_result().map_err(StoreError::decode)?;
        let row = rows
            .maybe_first_row::<Row>()
            .map_err(StoreError::decode)?
            .ok_or_else(|| StoreError::Decode("conditional update returned no result row".into()))?;

        let outcome = lwt_outcome(&row);
        tracing::debug!(
            order_id = %update.order_id,
            target = %update.target,
            outcome = ?outcome,
            "Conditional update executed"
        );
        Ok(outcome)
    }
}
