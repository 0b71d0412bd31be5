// Automation Executor - Dispatches rule actions to registered handlers

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::{Action, ActionKind, ActionOutcome, Event};

pub const AUTOMATION_USER_AGENT: &str = "OpenOMS-Automation/1.0";

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("unknown action type: {0}")]
    UnknownType(String),
    #[error("no handler registered for action type: {0}")]
    NoHandler(String),
    #[error("action '{action}' is missing required param '{param}'")]
    MissingParam { action: String, param: String },
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("webhook responded with status {0}")]
    UnexpectedStatus(u16),
    #[error("action cancelled")]
    Cancelled,
}

/// One implementation per action type. Deployments replace the default stubs
/// by registering their own handlers at startup.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn execute(
        &self,
        ctx: &CancellationToken,
        tenant_id: Uuid,
        action: &Action,
        event: &Event,
    ) -> Result<(), ActionError>;
}

/// Posts the triggering event to `params.url`.
pub struct WebhookActionHandler {
    client: reqwest::Client,
}

impl WebhookActionHandler {
    pub fn new(timeout: Duration) -> Result<Self, ActionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(AUTOMATION_USER_AGENT)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl ActionHandler for WebhookActionHandler {
    async fn execute(
        &self,
        ctx: &CancellationToken,
        tenant_id: Uuid,
        action: &Action,
        event: &Event,
    ) -> Result<(), ActionError> {
        let url = action.param_str("url").ok_or_else(|| ActionError::MissingParam {
            action: action.action_type.clone(),
            param: "url".to_string(),
        })?;

        let body = serde_json::json!({
            "event": event.event_type,
            "tenant_id": tenant_id,
            "entity_type": event.entity_type,
            "entity_id": event.entity_id,
            "data": event.data,
            "fired_at": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
        });

        let request = self.client.post(url).json(&body).send();
        let response = tokio::select! {
            _ = ctx.cancelled() => return Err(ActionError::Cancelled),
            response = request => response?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(ActionError::UnexpectedStatus(status.as_u16()));
        }

        Ok(())
    }
}

/// Stand-in for side effects that are wired per deployment.
pub struct LoggingActionHandler;

#[async_trait]
impl ActionHandler for LoggingActionHandler {
    async fn execute(
        &self,
        _ctx: &CancellationToken,
        tenant_id: Uuid,
        action: &Action,
        event: &Event,
    ) -> Result<(), ActionError> {
        info!(
            "Automation action '{}' (stub) for tenant {} on {} {}: params={}",
            action.action_type,
            tenant_id,
            event.entity_type,
            event.entity_id,
            serde_json::Value::Object(action.params.clone())
        );
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct ActionExecutor {
    handlers: HashMap<ActionKind, Arc<dyn ActionHandler>>,
}

impl ActionExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Real webhook delivery plus logging stubs for every other action type.
    pub fn with_defaults(webhook_timeout: Duration) -> Result<Self, ActionError> {
        let stub: Arc<dyn ActionHandler> = Arc::new(LoggingActionHandler);
        let executor = Self::new()
            .register(ActionKind::Webhook, Arc::new(WebhookActionHandler::new(webhook_timeout)?))
            .register(ActionKind::SetStatus, stub.clone())
            .register(ActionKind::AddTag, stub.clone())
            .register(ActionKind::SendEmail, stub.clone())
            .register(ActionKind::CreateInvoice, stub);
        Ok(executor)
    }

    pub fn register(mut self, kind: ActionKind, handler: Arc<dyn ActionHandler>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub fn handles(&self, kind: ActionKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    pub async fn execute_action(
        &self,
        ctx: &CancellationToken,
        tenant_id: Uuid,
        action: &Action,
        event: &Event,
    ) -> Result<(), ActionError> {
        let kind = action
            .kind()
            .ok_or_else(|| ActionError::UnknownType(action.action_type.clone()))?;
        let handler = self
            .handlers
            .get(&kind)
            .ok_or_else(|| ActionError::NoHandler(action.action_type.clone()))?;

        handler.execute(ctx, tenant_id, action, event).await
    }

    /// Execute and capture the result as data. Failures never propagate.
    pub async fn run(
        &self,
        ctx: &CancellationToken,
        tenant_id: Uuid,
        action: &Action,
        event: &Event,
    ) -> ActionOutcome {
        let start = Instant::now();
        let result = self.execute_action(ctx, tenant_id, action, event).await;
        let duration = start.elapsed().as_millis() as i64;

        match result {
            Ok(()) => ActionOutcome::success(action).with_duration(duration),
            Err(e) => {
                warn!(
                    "Automation action '{}' failed for tenant {} on {}: {}",
                    action.action_type, tenant_id, event.event_type, e
                );
                ActionOutcome::failure(action, &e.to_string()).with_duration(duration)
            }
        }
    }
}
