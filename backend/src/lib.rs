// OpenOMS automation backend: rule engine and webhook notification pipeline

use std::sync::Arc;

pub mod automation;
pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod realtime;
pub mod repository;
pub mod tasks;
pub mod webhooks;

pub use error::{ApiError, ApiResult, AppError};

use automation::{ActionExecutor, AutomationEngine};
use config::Config;
use realtime::RealtimeHub;
use repository::{PgDeliveryLog, PgTenantSettings, PgUnitOfWork};
use tasks::BackgroundTasks;
use tokio_util::sync::CancellationToken;
use webhooks::WebhookDispatcher;


pub struct AppState {
    pub db_pool: sqlx::PgPool,
    pub automation: AutomationEngine,
    pub webhooks: WebhookDispatcher,
    pub realtime: RealtimeHub,
}

impl AppState {
    /// Wire both pipelines against Postgres. One shutdown token covers every
    /// background task so a single cancel stops retries and in-flight calls.
    pub fn from_config(db_pool: sqlx::PgPool, config: &Config, shutdown: CancellationToken) -> anyhow::Result<Self> {
        let realtime = RealtimeHub::default();

        let executor = ActionExecutor::with_defaults(config.automation.action_timeout)?;
        let automation = AutomationEngine::new(
            Arc::new(PgUnitOfWork::new(db_pool.clone())),
            Arc::new(executor),
            BackgroundTasks::with_shutdown("automation", config.automation.max_concurrency, shutdown.clone()),
        );

        let webhooks = WebhookDispatcher::new(
            Arc::new(PgTenantSettings::new(db_pool.clone())),
            Arc::new(PgDeliveryLog::new(db_pool.clone())),
            config.webhooks.dispatcher_config(),
            BackgroundTasks::with_shutdown("webhooks", config.webhooks.max_concurrency, shutdown),
        )?
        .with_broadcaster(Arc::new(realtime.clone()));

        Ok(Self {
            db_pool,
            automation,
            webhooks,
            realtime,
        })
    }

    /// Wait for queued and running background work.
    pub async fn drain(&self) {
        tokio::join!(self.automation.drain(), self.webhooks.drain());
    }
}
