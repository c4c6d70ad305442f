use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db;
use crate::domain::settings::BillingSettings;
use crate::error::{AppError, AppResult};

/// Shared application state. Cheap to clone; every field is either `Arc`ed or
/// internally reference-counted (PgPool, reqwest::Client, moka caches).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db_pool: Option<PgPool>,
    pub http_client: reqwest::Client,
    /// (organization_id, user_id) -> role. Short TTL so revocations land fast.
    pub membership_cache: Cache<(Uuid, Uuid), String>,
    /// organization_id -> effective billing settings. Short TTL plus explicit
    /// invalidation on writes, so there is no process-lifetime staleness.
    pub settings_cache: Cache<Uuid, BillingSettings>,
}

impl AppState {
    pub fn build(config: AppConfig) -> Result<Self, reqwest::Error> {
        let db_pool = db::build_pool(&config);
        if db_pool.is_none() {
            tracing::warn!("DATABASE_URL is not set — data routes will return 502");
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(format!("{}/{}", config.app_name, env!("CARGO_PKG_VERSION")))
            .build()?;

        let membership_cache = Cache::builder()
            .max_capacity(config.org_membership_cache_max_entries)
            .time_to_live(Duration::from_secs(config.org_membership_cache_ttl_seconds))
            .build();

        let settings_cache = Cache::builder()
            .max_capacity(config.billing_settings_cache_max_entries)
            .time_to_live(Duration::from_secs(config.billing_settings_cache_ttl_seconds))
            .build();

        Ok(Self {
            config: Arc::new(config),
            db_pool,
            http_client,
            membership_cache,
            settings_cache,
        })
    }
}

/// Resolve the Postgres pool or fail the request with a dependency error.
pub fn db_pool(state: &AppState) -> AppResult<&PgPool> {
    state
        .db_pool
        .as_ref()
        .ok_or_else(|| AppError::Dependency("database is not configured".into()))
}
