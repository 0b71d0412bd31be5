use sqlx::{migrate::MigrateDatabase, postgres::PgPoolOptions, PgPool, Postgres};
use std::time::Duration;

use crate::config::parse_var;

/// Connection pool shared by the automation unit-of-work, the tenant settings
/// reader and the delivery log. Every background job borrows one connection
/// for the length of its transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 20,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

impl PoolConfig {
    /// Defaults overridden by `DB_MAX_CONNECTIONS`, `DB_MIN_CONNECTIONS`,
    /// `DB_ACQUIRE_TIMEOUT`, `DB_IDLE_TIMEOUT` and `DB_MAX_LIFETIME` (seconds).
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_connections: parse_var("DB_MAX_CONNECTIONS", defaults.max_connections),
            min_connections: parse_var("DB_MIN_CONNECTIONS", defaults.min_connections),
            acquire_timeout: Duration::from_secs(parse_var("DB_ACQUIRE_TIMEOUT", defaults.acquire_timeout.as_secs())),
            idle_timeout: Duration::from_secs(parse_var("DB_IDLE_TIMEOUT", defaults.idle_timeout.as_secs())),
            max_lifetime: Duration::from_secs(parse_var("DB_MAX_LIFETIME", defaults.max_lifetime.as_secs())),
        }
    }
}

/// Connect to Postgres, creating the database on first run.
pub async fn create_pool(database_url: &str, config: &PoolConfig) -> anyhow::Result<PgPool> {
    if !Postgres::database_exists(database_url).await? {
        Postgres::create_database(database_url).await?;
        tracing::info!("Created database");
    }

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .max_lifetime(config.max_lifetime)
        .test_before_acquire(true)
        .connect(database_url)
        .await?;

    tracing::info!(
        "Database pool ready: max={}, min={}",
        config.max_connections,
        config.min_connections
    );

    Ok(pool)
}

pub async fn migrate(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations completed");
    Ok(())
}

pub async fn health_check(pool: &PgPool) -> bool {
    sqlx::query("SELECT 1").execute(pool).await.is_ok()
}

#[derive(Debug, serde::Serialize)]
pub struct PoolStats {
    pub size: u32,
    pub idle: u32,
}

pub fn pool_stats(pool: &PgPool) -> PoolStats {
    PoolStats {
        size: pool.size(),
        idle: pool.num_idle() as u32,
    }
}
