// Automation Events - Domain changes that trigger automation rules

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use super::value::EventData;

/// Event names emitted by the order-management services.
pub mod event_types {
    pub const ORDER_CREATED: &str = "order.created";
    pub const ORDER_UPDATED: &str = "order.updated";
    pub const ORDER_CONFIRMED: &str = "order.confirmed";
    pub const ORDER_SHIPPED: &str = "order.shipped";
    pub const ORDER_DELIVERED: &str = "order.delivered";
    pub const ORDER_CANCELLED: &str = "order.cancelled";
    pub const RETURN_CREATED: &str = "return.created";
    pub const SHIPMENT_CREATED: &str = "shipment.created";
    pub const INVOICE_CREATED: &str = "invoice.created";
    pub const PRODUCT_LOW_STOCK: &str = "product.low_stock";
}

/// A domain change, created at the moment of mutation and consumed once per
/// dispatch call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    pub tenant_id: Uuid,
    pub entity_type: String,
    pub entity_id: Uuid,
    #[serde(default)]
    pub data: EventData,
}

impl Event {
    pub fn new(
        event_type: &str,
        tenant_id: Uuid,
        entity_type: &str,
        entity_id: Uuid,
        data: EventData,
    ) -> Self {
        Self {
            event_type: event_type.to_string(),
            tenant_id,
            entity_type: entity_type.to_string(),
            entity_id,
            data,
        }
    }

    pub fn with_data(mut self, key: &str, value: Value) -> Self {
        self.data.insert(key.to_string(), value);
        self
    }

    pub fn order_created(
        tenant_id: Uuid,
        order_id: Uuid,
        order_number: &str,
        status: &str,
        total_amount: f64,
        channel: &str,
    ) -> Self {
        Self::new(
            event_types::ORDER_CREATED,
            tenant_id,
            "order",
            order_id,
            object(json!({
                "order_number": order_number,
                "status": status,
                "total_amount": total_amount,
                "channel": channel
            })),
        )
    }

    /// Status transitions map onto `order.<new_status>` event names.
    pub fn order_status_changed(
        tenant_id: Uuid,
        order_id: Uuid,
        old_status: &str,
        new_status: &str,
    ) -> Self {
        Self::new(
            &format!("order.{}", new_status),
            tenant_id,
            "order",
            order_id,
            object(json!({
                "old_status": old_status,
                "status": new_status
            })),
        )
    }

    pub fn order_shipped(
        tenant_id: Uuid,
        order_id: Uuid,
        carrier: &str,
        tracking_number: &str,
    ) -> Self {
        Self::new(
            event_types::ORDER_SHIPPED,
            tenant_id,
            "order",
            order_id,
            object(json!({
                "status": "shipped",
                "carrier": carrier,
                "tracking_number": tracking_number
            })),
        )
    }

    pub fn return_created(tenant_id: Uuid, return_id: Uuid, order_id: Uuid, reason: &str) -> Self {
        Self::new(
            event_types::RETURN_CREATED,
            tenant_id,
            "return",
            return_id,
            object(json!({
                "order_id": order_id,
                "reason": reason
            })),
        )
    }

    pub fn product_low_stock(
        tenant_id: Uuid,
        product_id: Uuid,
        sku: &str,
        quantity: i64,
        threshold: i64,
    ) -> Self {
        Self::new(
            event_types::PRODUCT_LOW_STOCK,
            tenant_id,
            "product",
            product_id,
            object(json!({
                "sku": sku,
                "quantity": quantity,
                "threshold": threshold
            })),
        )
    }
}

fn object(value: Value) -> EventData {
    match value {
        Value::Object(map) => map,
        _ => EventData::new(),
    }
}
