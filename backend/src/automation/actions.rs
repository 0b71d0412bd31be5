// Automation Actions - Side effects a rule performs when it fires

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Action types a rule may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Webhook,
    SetStatus,
    AddTag,
    SendEmail,
    CreateInvoice,
}

impl ActionKind {
    pub const ALL: [ActionKind; 5] = [
        Self::Webhook,
        Self::SetStatus,
        Self::AddTag,
        Self::SendEmail,
        Self::CreateInvoice,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Webhook => "webhook",
            Self::SetStatus => "set_status",
            Self::AddTag => "add_tag",
            Self::SendEmail => "send_email",
            Self::CreateInvoice => "create_invoice",
        }
    }
}

/// An action declared on a rule. `action_type` stays a plain string so that
/// rules carrying an unknown type still load and report a per-action error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Reserved. Parsed and stored but never honoured by the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_seconds: Option<i64>,
}

/// Result of executing one action, recorded in the rule log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    #[serde(rename = "type")]
    pub action_type: String,
    pub params: Map<String, Value>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: i64,
}

impl Action {
    pub fn new(kind: ActionKind, params: Value) -> Self {
        Self {
            action_type: kind.as_str().to_string(),
            params: params.as_object().cloned().unwrap_or_default(),
            delay_seconds: None,
        }
    }

    pub fn kind(&self) -> Option<ActionKind> {
        ActionKind::parse(&self.action_type)
    }

    pub fn param_str(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(Value::as_str)
    }

    pub fn with_delay(mut self, seconds: i64) -> Self {
        self.delay_seconds = Some(seconds);
        self
    }

    pub fn webhook(url: &str) -> Self {
        Self::new(ActionKind::Webhook, json!({ "url": url }))
    }

    pub fn set_status(status: &str) -> Self {
        Self::new(ActionKind::SetStatus, json!({ "status": status }))
    }

    pub fn add_tag(tag: &str) -> Self {
        Self::new(ActionKind::AddTag, json!({ "tag": tag }))
    }

    pub fn send_email(to: &str, template: &str) -> Self {
        Self::new(
            ActionKind::SendEmail,
            json!({
                "to": to,
                "template": template
            }),
        )
    }

    pub fn create_invoice() -> Self {
        Self::new(ActionKind::CreateInvoice, json!({}))
    }
}

impl ActionOutcome {
    pub fn success(action: &Action) -> Self {
        Self {
            action_type: action.action_type.clone(),
            params: action.params.clone(),
            success: true,
            error: None,
            duration_ms: 0,
        }
    }

    pub fn failure(action: &Action, error: &str) -> Self {
        Self {
            action_type: action.action_type.clone(),
            params: action.params.clone(),
            success: false,
            error: Some(error.to_string()),
            duration_ms: 0,
        }
    }

    pub fn with_duration(mut self, duration_ms: i64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}
