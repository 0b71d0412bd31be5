// Automation Engine - Evaluates tenant rules for an event and records every evaluation

use chrono::Utc;
use openoms_shared::{AutomationRule, AutomationRuleLog};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    evaluate_conditions, Action, ActionExecutor, ActionOutcome, Condition, ConditionResult, Event,
    EventData,
};
use crate::repository::{AutomationUnit, RepositoryError, UnitOfWork};
use crate::tasks::BackgroundTasks;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Rule {rule_id} is invalid: {reason}")]
    InvalidRule { rule_id: Uuid, reason: String },
}

/// Summary of one processed event, returned to callers that await the work.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventSummary {
    pub rules_evaluated: usize,
    pub rules_fired: usize,
    pub actions_failed: usize,
}

/// Dry-run result for a single rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleTestResult {
    pub rule_id: Uuid,
    pub conditions_met: bool,
    pub conditions: Vec<ConditionResult>,
    pub actions_to_execute: Vec<Action>,
}

pub fn parse_conditions(raw: &serde_json::Value) -> Result<Vec<Condition>, serde_json::Error> {
    if raw.is_null() {
        return Ok(Vec::new());
    }
    serde_json::from_value(raw.clone())
}

pub fn parse_actions(raw: &serde_json::Value) -> Result<Vec<Action>, serde_json::Error> {
    if raw.is_null() {
        return Ok(Vec::new());
    }
    serde_json::from_value(raw.clone())
}

/// Evaluate a stored rule against caller-supplied data without persisting
/// anything or executing any action.
pub fn test_rule(rule: &AutomationRule, data: &EventData) -> Result<RuleTestResult, EngineError> {
    let conditions = parse_conditions(&rule.conditions).map_err(|e| EngineError::InvalidRule {
        rule_id: rule.id,
        reason: format!("conditions: {}", e),
    })?;
    let actions = parse_actions(&rule.actions).map_err(|e| EngineError::InvalidRule {
        rule_id: rule.id,
        reason: format!("actions: {}", e),
    })?;

    let results: Vec<ConditionResult> = conditions.iter().map(|c| c.explain(data)).collect();
    let conditions_met = results.iter().all(|r| r.matched);

    Ok(RuleTestResult {
        rule_id: rule.id,
        conditions_met,
        conditions: results,
        actions_to_execute: if conditions_met { actions } else { Vec::new() },
    })
}

#[derive(Clone)]
pub struct AutomationEngine {
    unit_of_work: Arc<dyn UnitOfWork>,
    executor: Arc<ActionExecutor>,
    tasks: BackgroundTasks,
}

impl AutomationEngine {
    pub fn new(
        unit_of_work: Arc<dyn UnitOfWork>,
        executor: Arc<ActionExecutor>,
        tasks: BackgroundTasks,
    ) -> Self {
        Self {
            unit_of_work,
            executor,
            tasks,
        }
    }

    /// Fire-and-forget: schedules the event on the background pool and
    /// returns immediately. Failures are logged, never surfaced.
    pub fn process_event(&self, event: Event) {
        let engine = self.clone();
        let ctx = self.tasks.context();

        self.tasks.spawn(async move {
            if let Err(e) = engine.run_event(&ctx, &event).await {
                error!(
                    "Automation batch for {} (tenant {}, {} {}) aborted: {}",
                    event.event_type, event.tenant_id, event.entity_type, event.entity_id, e
                );
            }
        });
    }

    /// Process one event inside a single tenant transaction. Repository
    /// errors roll the whole batch back; action failures are recorded as data.
    pub async fn run_event(&self, ctx: &CancellationToken, event: &Event) -> Result<EventSummary, EngineError> {
        let mut unit = self.unit_of_work.begin(event.tenant_id).await?;

        let result = self.evaluate_rules(ctx, unit.as_mut(), event).await;
        match result {
            Ok(summary) => {
                unit.commit().await?;
                if summary.rules_fired > 0 {
                    info!(
                        "Processed {} for tenant {}: {}/{} rules fired",
                        event.event_type, event.tenant_id, summary.rules_fired, summary.rules_evaluated
                    );
                }
                Ok(summary)
            }
            Err(e) => {
                if let Err(rollback_err) = unit.rollback().await {
                    warn!("Rollback failed for tenant {}: {}", event.tenant_id, rollback_err);
                }
                Err(e)
            }
        }
    }

    async fn evaluate_rules(
        &self,
        ctx: &CancellationToken,
        unit: &mut dyn AutomationUnit,
        event: &Event,
    ) -> Result<EventSummary, EngineError> {
        let rules = unit
            .list_enabled_rules(event.tenant_id, &event.event_type)
            .await?;
        let mut summary = EventSummary::default();

        for rule in &rules {
            let log = self.evaluate_rule(ctx, rule, event).await?;
            summary.rules_evaluated += 1;

            if log.conditions_met {
                unit.increment_fire_count(event.tenant_id, rule.id).await?;
                summary.rules_fired += 1;
            }
            summary.actions_failed += failed_actions(&log);

            unit.append_rule_log(&log).await?;
        }

        Ok(summary)
    }

    async fn evaluate_rule(
        &self,
        ctx: &CancellationToken,
        rule: &AutomationRule,
        event: &Event,
    ) -> Result<AutomationRuleLog, EngineError> {
        let mut log = AutomationRuleLog {
            id: Uuid::new_v4(),
            tenant_id: event.tenant_id,
            rule_id: rule.id,
            trigger_event: event.event_type.clone(),
            entity_type: event.entity_type.clone(),
            entity_id: event.entity_id,
            conditions_met: false,
            actions_executed: serde_json::Value::Array(Vec::new()),
            error_message: None,
            executed_at: Utc::now(),
        };

        let parsed = parse_conditions(&rule.conditions)
            .map_err(|e| format!("invalid conditions: {}", e))
            .and_then(|conditions| {
                parse_actions(&rule.actions)
                    .map(|actions| (conditions, actions))
                    .map_err(|e| format!("invalid actions: {}", e))
            });
        let (conditions, actions) = match parsed {
            Ok(parsed) => parsed,
            Err(reason) => {
                warn!("Skipping automation rule '{}' ({}): {}", rule.name, rule.id, reason);
                log.error_message = Some(reason);
                return Ok(log);
            }
        };

        if !evaluate_conditions(&conditions, &event.data) {
            debug!("Rule '{}' did not match {}", rule.name, event.event_type);
            return Ok(log);
        }

        log.conditions_met = true;
        info!("Automation rule '{}' fired on {} {}", rule.name, event.entity_type, event.entity_id);

        let mut outcomes: Vec<ActionOutcome> = Vec::with_capacity(actions.len());
        for action in &actions {
            if let Some(delay) = action.delay_seconds {
                debug!("Ignoring delay_seconds={} on '{}' action", delay, action.action_type);
            }

            let outcome = self.executor.run(ctx, event.tenant_id, action, event).await;
            if let Some(error) = &outcome.error {
                log.error_message = Some(error.clone());
            }
            outcomes.push(outcome);
        }

        log.actions_executed = serde_json::to_value(&outcomes)?;
        Ok(log)
    }

    pub fn tasks(&self) -> &BackgroundTasks {
        &self.tasks
    }

    pub async fn drain(&self) {
        self.tasks.drain().await;
    }

    pub fn shutdown(&self) {
        self.tasks.shutdown();
    }
}

fn failed_actions(log: &AutomationRuleLog) -> usize {
    log.actions_executed
        .as_array()
        .map(|outcomes| {
            outcomes
                .iter()
                .filter(|o| o.get("success") == Some(&serde_json::Value::Bool(false)))
                .count()
        })
        .unwrap_or(0)
}
