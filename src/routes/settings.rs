use axum::{extract::State, http::HeaderMap, Json};
use serde_json::{json, Value};

use crate::auth::require_caller;
use crate::error::AppResult;
use crate::repository::settings::SettingsUpdate;
use crate::schemas::{validate_input, UpdateBillingSettingsInput};
use crate::services::billing_settings;
use crate::state::AppState;
use crate::tenancy::{assert_org_member, assert_org_role};

const SETTINGS_EDIT_ROLES: &[&str] = &["owner_admin", "operator"];
const SETTINGS_EDIT_ACTION: &str = "settings:write";

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/billing-settings",
            axum::routing::get(get_settings).put(put_settings),
        )
        .route("/billing-settings/test", axum::routing::post(test_settings))
}

async fn get_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let caller = require_caller(&state, &headers)?;
    assert_org_member(&state, caller.user_id, caller.organization_id).await?;

    let settings = billing_settings::effective_settings(&state, caller.organization_id).await?;
    Ok(Json(json!({ "success": true, "data": settings })))
}

async fn put_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<UpdateBillingSettingsInput>,
) -> AppResult<Json<Value>> {
    let caller = require_caller(&state, &headers)?;
    caller.require_action(SETTINGS_EDIT_ACTION)?;
    assert_org_role(
        &state,
        caller.user_id,
        caller.organization_id,
        SETTINGS_EDIT_ROLES,
    )
    .await?;
    validate_input(&payload)?;

    let update = SettingsUpdate {
        auto_verify_enabled: payload.auto_verify_enabled,
        auto_verify_frequency_seconds: payload.auto_verify_frequency_seconds,
        max_retries: payload.max_retries,
        query_timeout_seconds: payload.query_timeout_seconds,
    };
    let settings =
        billing_settings::update_settings(&state, caller.organization_id, &update).await?;

    tracing::info!(
        org_id = %caller.organization_id,
        auto_verify = settings.auto_verify_enabled,
        frequency_seconds = settings.auto_verify_frequency_seconds,
        "Billing settings updated"
    );
    Ok(Json(json!({ "success": true, "data": settings })))
}

/// Probe gateway connectivity on demand and surface the recorded outcome.
async fn test_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let caller = require_caller(&state, &headers)?;
    caller.require_action(SETTINGS_EDIT_ACTION)?;
    assert_org_role(
        &state,
        caller.user_id,
        caller.organization_id,
        SETTINGS_EDIT_ROLES,
    )
    .await?;

    let settings = billing_settings::run_connectivity_test(&state, caller.organization_id).await?;
    Ok(Json(json!({ "success": true, "data": settings })))
}
