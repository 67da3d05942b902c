use crate::messaging::Notification;
use crate::models::{OrderRecord, OrderStatus};

const NOT_AVAILABLE: &str = "not available";

fn field(value: Option<&str>) -> &str {
    value.map(str::trim).filter(|v| !v.is_empty()).unwrap_or(NOT_AVAILABLE)
}

pub fn subject(status: OrderStatus) -> String {
    format!("Order update: {status}")
}

/// Render the customer message for an order that just reached `status`.
/// Pure: no I/O, never fails; absent fields render as "not available".
pub fn render(status: OrderStatus, order: &OrderRecord) -> Notification {
    let name = field(order.customer_name.as_deref());
    let order_id = field(Some(order.order_id.as_str()));
    let amount = field(order.amount.as_deref());

    let body = match status {
        OrderStatus::Received => format!(
            "===== ORDER RECEIVED =====\n\
             \n\
             Hello, {name}!\n\
             \n\
             Your order has been RECEIVED.\n\
             \n\
             Order ID: {order_id}\n\
             Amount: {amount}\n\
             Placed at: {placed}\n\
             \n\
             It will move into preparation shortly.\n\
             \n\
             Thank you for your order!\n",
            placed = field(order.created_at.as_deref()),
        ),
        OrderStatus::InPreparation => format!(
            "===== ORDER IN PREPARATION =====\n\
             \n\
             Hello, {name}!\n\
             \n\
             Your order is now IN PREPARATION.\n\
             \n\
             Order ID: {order_id}\n\
             Amount: {amount}\n\
             \n\
             It will be shipped soon.\n\
             \n\
             Thank you for your order!\n"
        ),
        OrderStatus::Shipped => format!(
            "===== ORDER SHIPPED =====\n\
             \n\
             Hello, {name}!\n\
             \n\
             Your order has been SHIPPED!\n\
             \n\
             Order ID: {order_id}\n\
             Amount: {amount}\n\
             Shipment reference: {reference}\n\
             Shipped at: {shipped_at}\n\
             \n\
             Thank you for shopping with us!\n",
            reference = field(order.shipment_reference.as_deref()),
            shipped_at = field(order.shipped_at.as_deref()),
        ),
    };

    Notification {
        order_id: order.order_id.clone(),
        recipient: order.customer_email().unwrap_or_default().to_string(),
        subject: subject(status),
        body,
    }
}
