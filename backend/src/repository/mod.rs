// Repositories - Persistence seams consumed by the automation and webhook pipelines

use async_trait::async_trait;
use openoms_shared::{AutomationRule, AutomationRuleLog, WebhookDelivery};
use uuid::Uuid;

pub mod postgres;

pub use postgres::{PgDeliveryLog, PgTenantSettings, PgUnitOfWork};

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Repository unavailable: {0}")]
    Unavailable(String),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[async_trait]
pub trait RuleRepository: Send {
    /// Enabled rules for the tenant bound to `trigger_event`, in storage order.
    async fn list_enabled_rules(
        &mut self,
        tenant_id: Uuid,
        trigger_event: &str,
    ) -> RepositoryResult<Vec<AutomationRule>>;

    /// Atomically bump `fire_count` and stamp `last_fired_at`.
    async fn increment_fire_count(&mut self, tenant_id: Uuid, rule_id: Uuid) -> RepositoryResult<()>;
}

#[async_trait]
pub trait RuleLogRepository: Send {
    async fn append_rule_log(&mut self, log: &AutomationRuleLog) -> RepositoryResult<()>;
}

/// One tenant-scoped transaction. Everything written through it lands on
/// `commit` or not at all.
#[async_trait]
pub trait AutomationUnit: RuleRepository + RuleLogRepository {
    async fn commit(self: Box<Self>) -> RepositoryResult<()>;
    async fn rollback(self: Box<Self>) -> RepositoryResult<()>;
}

#[async_trait]
pub trait UnitOfWork: Send + Sync {
    async fn begin(&self, tenant_id: Uuid) -> RepositoryResult<Box<dyn AutomationUnit>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TenantSettingsReader: Send + Sync {
    /// Raw tenant settings document; webhook endpoints live under `"webhooks"`.
    async fn tenant_settings(&self, tenant_id: Uuid) -> RepositoryResult<Option<serde_json::Value>>;
}

#[async_trait]
pub trait DeliveryLogRepository: Send + Sync {
    async fn append_delivery(&self, delivery: &WebhookDelivery) -> RepositoryResult<()>;
}
