use serde::{Deserialize, Serialize};

use crate::models::OrderStatus;

/// User-facing notification handed to the host context
///
/// `tag` keys replacement: a later notification with the same tag replaces
/// the earlier one instead of stacking. `data` carries whatever the host
/// needs for click-through routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl NotificationPayload {
    pub fn new(
        title: impl Into<String>,
        body: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            tag: tag.into(),
            data: None,
        }
    }

    /// Attach click-through data
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Notification for an order reaching a new status
    ///
    /// Tagged `order-<id>` so successive updates for the same order replace
    /// each other; `data.url` routes a click to the order detail view.
    pub fn order_status(order_id: &str, table_number: u32, status: OrderStatus) -> Self {
        let (title, body) = match status {
            OrderStatus::Pending => (
                "Order received",
                format!("The order for table {table_number} is waiting for confirmation"),
            ),
            OrderStatus::Confirmed => (
                "Order confirmed",
                format!("The kitchen has accepted the order for table {table_number}"),
            ),
            OrderStatus::Preparing => (
                "Order in the kitchen",
                format!("The order for table {table_number} is being prepared"),
            ),
            OrderStatus::Ready => (
                "Order ready",
                format!("The order for table {table_number} is ready to be served"),
            ),
            OrderStatus::Delivered => (
                "Order delivered",
                format!("Enjoy your meal, table {table_number}!"),
            ),
            OrderStatus::Cancelled => (
                "Order cancelled",
                format!("The order for table {table_number} was cancelled"),
            ),
        };

        Self::new(title, body, format!("order-{order_id}")).with_data(serde_json::json!({
            "orderId": order_id,
            "url": format!("/orders/{order_id}"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_status_tag_replaces_per_order() {
        let a = NotificationPayload::order_status("o1", 3, OrderStatus::Confirmed);
        let b = NotificationPayload::order_status("o1", 3, OrderStatus::Ready);
        assert_eq!(a.tag, b.tag);
        assert_ne!(a.title, b.title);
    }

    #[test]
    fn test_click_through_data() {
        let n = NotificationPayload::order_status("o7", 2, OrderStatus::Ready);
        let data = n.data.unwrap();
        assert_eq!(data["url"], "/orders/o7");
        assert_eq!(data["orderId"], "o7");
    }
}
