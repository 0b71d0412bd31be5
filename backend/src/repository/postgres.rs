use async_trait::async_trait;
use openoms_shared::{AutomationRule, AutomationRuleLog, WebhookDelivery};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{
    AutomationUnit, DeliveryLogRepository, RepositoryResult, RuleLogRepository, RuleRepository,
    TenantSettingsReader, UnitOfWork,
};

/// Open a transaction with the row-level-security tenant bound for its
/// lifetime only.
async fn begin_tenant_tx(pool: &PgPool, tenant_id: Uuid) -> RepositoryResult<Transaction<'static, Postgres>> {
    let mut tx = pool.begin().await?;

    sqlx::query("SELECT set_config('app.current_tenant', $1, true)")
        .bind(tenant_id.to_string())
        .execute(&mut *tx)
        .await?;

    Ok(tx)
}

#[derive(Clone)]
pub struct PgUnitOfWork {
    db_pool: PgPool,
}

impl PgUnitOfWork {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn begin(&self, tenant_id: Uuid) -> RepositoryResult<Box<dyn AutomationUnit>> {
        let tx = begin_tenant_tx(&self.db_pool, tenant_id).await?;
        Ok(Box::new(PgAutomationUnit { tx }))
    }
}

pub struct PgAutomationUnit {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl RuleRepository for PgAutomationUnit {
    async fn list_enabled_rules(
        &mut self,
        tenant_id: Uuid,
        trigger_event: &str,
    ) -> RepositoryResult<Vec<AutomationRule>> {
        let rules = sqlx::query_as::<_, AutomationRule>(
            r#"
            SELECT
                id, tenant_id, name, description, enabled, priority, trigger_event,
                conditions, actions, fire_count, last_fired_at, created_at, updated_at
            FROM automation_rules
            WHERE tenant_id = $1 AND trigger_event = $2 AND enabled = true
            ORDER BY priority DESC, created_at ASC
            "#,
        )
        .bind(tenant_id)
        .bind(trigger_event)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rules)
    }

    async fn increment_fire_count(&mut self, tenant_id: Uuid, rule_id: Uuid) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            UPDATE automation_rules
            SET fire_count = fire_count + 1, last_fired_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(rule_id)
        .bind(tenant_id)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl RuleLogRepository for PgAutomationUnit {
    async fn append_rule_log(&mut self, log: &AutomationRuleLog) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO automation_rule_logs
            (id, tenant_id, rule_id, trigger_event, entity_type, entity_id,
             conditions_met, actions_executed, error_message, executed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(log.id)
        .bind(log.tenant_id)
        .bind(log.rule_id)
        .bind(&log.trigger_event)
        .bind(&log.entity_type)
        .bind(log.entity_id)
        .bind(log.conditions_met)
        .bind(&log.actions_executed)
        .bind(&log.error_message)
        .bind(log.executed_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl AutomationUnit for PgAutomationUnit {
    async fn commit(self: Box<Self>) -> RepositoryResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> RepositoryResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgTenantSettings {
    db_pool: PgPool,
}

impl PgTenantSettings {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl TenantSettingsReader for PgTenantSettings {
    async fn tenant_settings(&self, tenant_id: Uuid) -> RepositoryResult<Option<serde_json::Value>> {
        let mut tx = begin_tenant_tx(&self.db_pool, tenant_id).await?;

        let settings: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT settings FROM tenants WHERE id = $1")
                .bind(tenant_id)
                .fetch_optional(&mut *tx)
                .await?;

        tx.commit().await?;
        Ok(settings.map(|(doc,)| doc))
    }
}

#[derive(Clone)]
pub struct PgDeliveryLog {
    db_pool: PgPool,
}

impl PgDeliveryLog {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl DeliveryLogRepository for PgDeliveryLog {
    async fn append_delivery(&self, delivery: &WebhookDelivery) -> RepositoryResult<()> {
        let mut tx = begin_tenant_tx(&self.db_pool, delivery.tenant_id).await?;

        sqlx::query(
            r#"
            INSERT INTO webhook_deliveries
            (id, tenant_id, url, event_type, payload, status, response_code, error, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(delivery.id)
        .bind(delivery.tenant_id)
        .bind(&delivery.url)
        .bind(&delivery.event_type)
        .bind(&delivery.payload)
        .bind(&delivery.status)
        .bind(delivery.response_code)
        .bind(&delivery.error)
        .bind(delivery.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
