use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::settings::BillingSettings;
use crate::error::AppResult;

/// Fetch the organization's billing settings, seeding the defaults row on
/// first read. The insert-or-ignore keeps concurrent first reads safe.
pub async fn fetch_or_seed(pool: &PgPool, organization_id: Uuid) -> AppResult<BillingSettings> {
    sqlx::query("INSERT INTO billing_settings (organization_id) VALUES ($1) ON CONFLICT DO NOTHING")
        .bind(organization_id)
        .execute(pool)
        .await?;

    let settings = sqlx::query_as::<_, BillingSettings>(
        "SELECT * FROM billing_settings WHERE organization_id = $1",
    )
    .bind(organization_id)
    .fetch_one(pool)
    .await?;
    Ok(settings)
}

pub struct SettingsUpdate {
    pub auto_verify_enabled: bool,
    pub auto_verify_frequency_seconds: i32,
    pub max_retries: i16,
    pub query_timeout_seconds: i32,
}

/// Full-row upsert of the tunable knobs. Bounds are validated upstream at the
/// request boundary.
pub async fn upsert(
    pool: &PgPool,
    organization_id: Uuid,
    update: &SettingsUpdate,
) -> AppResult<BillingSettings> {
    let settings = sqlx::query_as::<_, BillingSettings>(
        "INSERT INTO billing_settings
             (organization_id, auto_verify_enabled, auto_verify_frequency_seconds,
              max_retries, query_timeout_seconds, updated_at)
         VALUES ($1, $2, $3, $4, $5, now())
         ON CONFLICT (organization_id) DO UPDATE
         SET auto_verify_enabled = EXCLUDED.auto_verify_enabled,
             auto_verify_frequency_seconds = EXCLUDED.auto_verify_frequency_seconds,
             max_retries = EXCLUDED.max_retries,
             query_timeout_seconds = EXCLUDED.query_timeout_seconds,
             updated_at = now()
         RETURNING *",
    )
    .bind(organization_id)
    .bind(update.auto_verify_enabled)
    .bind(update.auto_verify_frequency_seconds)
    .bind(update.max_retries)
    .bind(update.query_timeout_seconds)
    .fetch_one(pool)
    .await?;
    Ok(settings)
}

/// Record the outcome of a gateway connectivity probe. Never fails the probe
/// path; operability bookkeeping must not block reconciliation.
pub async fn record_test_result(
    pool: &PgPool,
    organization_id: Uuid,
    status: &str,
) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO billing_settings (organization_id, last_tested_at, last_test_status)
         VALUES ($1, now(), $2)
         ON CONFLICT (organization_id) DO UPDATE
         SET last_tested_at = now(), last_test_status = EXCLUDED.last_test_status",
    )
    .bind(organization_id)
    .bind(status)
    .execute(pool)
    .await?;
    Ok(())
}
