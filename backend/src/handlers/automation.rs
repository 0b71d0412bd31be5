use axum::{extract::State, response::Json, routing::post, Router};
use openoms_shared::AutomationRule;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::automation::{test_rule, EventData, RuleTestResult};
use crate::{ApiResult, AppState};

/// Rule definition as submitted from the rule editor, before it is saved.
#[derive(Debug, Deserialize)]
pub struct RuleDraft {
    pub id: Option<Uuid>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub trigger_event: String,
    #[serde(default)]
    pub conditions: serde_json::Value,
    #[serde(default)]
    pub actions: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct TestRuleRequest {
    pub rule: RuleDraft,
    #[serde(default)]
    pub data: EventData,
}

pub fn automation_routes() -> Router<Arc<AppState>> {
    Router::new().route("/rules/test", post(test_rule_handler))
}

async fn test_rule_handler(
    State(_state): State<Arc<AppState>>,
    Json(request): Json<TestRuleRequest>,
) -> ApiResult<Json<RuleTestResult>> {
    let draft = request.rule;
    let mut rule = AutomationRule::new(
        Uuid::nil(),
        &draft.name,
        &draft.trigger_event,
        draft.conditions,
        draft.actions,
    );
    if let Some(id) = draft.id {
        rule.id = id;
    }

    let result = test_rule(&rule, &request.data)?;
    Ok(Json(result))
}
