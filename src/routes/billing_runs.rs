use axum::{extract::State, http::HeaderMap, Json};
use chrono::{NaiveDate, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::{require_caller, require_internal_key};
use crate::error::AppResult;
use crate::schemas::BillingRunInput;
use crate::services::{invoice_generator, overdue, reconciler, reminder_scheduler};
use crate::state::{db_pool, AppState};
use crate::tenancy::{self, assert_org_role};

const BILLING_RUN_ROLES: &[&str] = &["owner_admin", "operator", "accountant"];
const BILLING_RUN_ACTION: &str = "billing:run";

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/billing/run-invoices", axum::routing::post(run_invoices))
        .route("/billing/mark-overdue", axum::routing::post(run_overdue))
        .route("/billing/run-reminders", axum::routing::post(run_reminders))
        .route("/billing/reconcile", axum::routing::post(run_reconcile))
}

/// Manual triggers for the jobs the scheduler runs on its own. Platform
/// cron/scripts authenticate with the internal key and run unscoped; staff
/// callers run scoped to their own organization.
async fn run_scope(state: &AppState, headers: &HeaderMap) -> AppResult<Option<Uuid>> {
    if headers.contains_key("x-internal-api-key") {
        require_internal_key(state, headers)?;
        return Ok(None);
    }
    let caller = require_caller(state, headers)?;
    caller.require_action(BILLING_RUN_ACTION)?;
    assert_org_role(
        state,
        caller.user_id,
        caller.organization_id,
        BILLING_RUN_ROLES,
    )
    .await?;
    Ok(Some(caller.organization_id))
}

/// The billing day a run operates on: the caller's explicit `as_of`, or
/// "today" in the scoped organization's timezone (the deployment default for
/// unscoped runs).
async fn effective_day(
    state: &AppState,
    org_scope: Option<Uuid>,
    as_of: Option<NaiveDate>,
) -> NaiveDate {
    if let Some(day) = as_of {
        return day;
    }
    let timezone = match org_scope {
        Some(org_id) => tenancy::org_timezone(state, org_id).await,
        None => state.config.default_org_timezone(),
    };
    Utc::now().with_timezone(&timezone).date_naive()
}

async fn run_invoices(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<BillingRunInput>,
) -> AppResult<Json<Value>> {
    let org_scope = run_scope(&state, &headers).await?;
    let pool = db_pool(&state)?;
    let as_of = effective_day(&state, org_scope, payload.as_of).await;
    let result = invoice_generator::generate_invoices(pool, org_scope, as_of).await;
    Ok(Json(json!({ "success": true, "data": result })))
}

async fn run_overdue(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<BillingRunInput>,
) -> AppResult<Json<Value>> {
    let org_scope = run_scope(&state, &headers).await?;
    let pool = db_pool(&state)?;
    let as_of = effective_day(&state, org_scope, payload.as_of).await;
    let result = overdue::mark_overdue(pool, org_scope, as_of).await;
    Ok(Json(json!({ "success": true, "data": result })))
}

async fn run_reminders(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<BillingRunInput>,
) -> AppResult<Json<Value>> {
    let org_scope = run_scope(&state, &headers).await?;
    db_pool(&state)?;
    let as_of = effective_day(&state, org_scope, payload.as_of).await;
    let result = reminder_scheduler::send_reminders_for_day(&state, org_scope, as_of).await;
    Ok(Json(json!({ "success": true, "data": result })))
}

async fn run_reconcile(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let org_scope = run_scope(&state, &headers).await?;
    let result = reconciler::run_reconciliation_sweep(&state, org_scope).await?;
    Ok(Json(json!({ "success": true, "data": result })))
}
