use uuid::Uuid;

use crate::domain::settings::BillingSettings;
use crate::error::AppResult;
use crate::repository::settings;
use crate::services::mpesa;
use crate::state::{db_pool, AppState};

/// Effective billing settings for an org, seeded with defaults on first
/// touch. Served through a short-TTL cache so a settings edit takes effect
/// within seconds on every instance without a restart.
pub async fn effective_settings(
    state: &AppState,
    organization_id: Uuid,
) -> AppResult<BillingSettings> {
    if let Some(cached) = state.settings_cache.get(&organization_id).await {
        return Ok(cached);
    }
    let pool = db_pool(state)?;
    let fetched = settings::fetch_or_seed(pool, organization_id).await?;
    state
        .settings_cache
        .insert(organization_id, fetched.clone())
        .await;
    Ok(fetched)
}

/// Persist a full settings update and refresh the cache in place, so the
/// writer's own instance reflects the change immediately.
pub async fn update_settings(
    state: &AppState,
    organization_id: Uuid,
    update: &settings::SettingsUpdate,
) -> AppResult<BillingSettings> {
    let pool = db_pool(state)?;
    let saved = settings::upsert(pool, organization_id, update).await?;
    state
        .settings_cache
        .insert(organization_id, saved.clone())
        .await;
    Ok(saved)
}

/// Probe gateway connectivity and record the outcome on the org's settings
/// row. The probe result is bookkeeping; it never blocks billing runs.
pub async fn run_connectivity_test(
    state: &AppState,
    organization_id: Uuid,
) -> AppResult<BillingSettings> {
    let pool = db_pool(state)?;
    let status = match mpesa::connectivity_check(&state.http_client, &state.config).await {
        Ok(()) => "ok".to_string(),
        Err(error) => {
            tracing::warn!(org_id = %organization_id, error = %error, "Gateway connectivity test failed");
            let mut detail = format!("failed: {error}");
            detail.truncate(200);
            detail
        }
    };
    settings::record_test_result(pool, organization_id, &status).await?;
    state.settings_cache.invalidate(&organization_id).await;
    effective_settings(state, organization_id).await
}
