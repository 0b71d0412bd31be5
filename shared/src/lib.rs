use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tenant-authored automation rule. `conditions` and `actions` are stored as
/// raw JSON and parsed by the engine each time the rule is evaluated.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationRule {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub priority: i32,
    pub trigger_event: String, // order.shipped, return.created, ...
    pub conditions: serde_json::Value,
    pub actions: serde_json::Value,
    pub fire_count: i64,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl AutomationRule {
    /// A new enabled rule with zero priority and no firing history.
    pub fn new(
        tenant_id: Uuid,
        name: &str,
        trigger_event: &str,
        conditions: serde_json::Value,
        actions: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            name: name.to_string(),
            description: None,
            enabled: true,
            priority: 0,
            trigger_event: trigger_event.to_string(),
            conditions,
            actions,
            fire_count: 0,
            last_fired_at: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }
}

/// One row per (rule, event) evaluation, matched or not.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationRuleLog {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub rule_id: Uuid,
    pub trigger_event: String,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub conditions_met: bool,
    pub actions_executed: serde_json::Value, // array of action outcomes
    pub error_message: Option<String>,
    pub executed_at: DateTime<Utc>,
}

/// Terminal outcome of delivering one event to one webhook endpoint.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub url: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: String, // success, failed
    pub response_code: Option<i32>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Success,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl WebhookDelivery {
    pub fn delivery_status(&self) -> Option<DeliveryStatus> {
        match self.status.as_str() {
            "success" => Some(DeliveryStatus::Success),
            "failed" => Some(DeliveryStatus::Failed),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.delivery_status() == Some(DeliveryStatus::Success)
    }
}
