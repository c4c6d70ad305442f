use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};

use crate::auth::require_caller;
use crate::error::{AppError, AppResult};
use crate::repository::invoices;
use crate::repository::leases;
use crate::repository::payments::{self, NewPayment, PaymentFilter};
use crate::schemas::{
    clamp_limit_in_range, validate_input, CreatePaymentInput, PaymentIdPath, PaymentsQuery,
    RejectPaymentInput, VerifyPaymentInput,
};
use crate::services::{allocation, verification};
use crate::state::{db_pool, AppState};
use crate::tenancy::{self, assert_org_member, assert_org_role};

const PAYMENT_VERIFY_ROLES: &[&str] = &["owner_admin", "operator", "accountant"];
const PAYMENT_VERIFY_ACTION: &str = "payment:verify";

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/payments",
            axum::routing::get(list_payments).post(create_payment),
        )
        .route(
            "/payments/{payment_id}/verify",
            axum::routing::post(verify_payment),
        )
        .route(
            "/payments/{payment_id}/reject",
            axum::routing::post(reject_payment),
        )
}

async fn list_payments(
    State(state): State<AppState>,
    Query(query): Query<PaymentsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let caller = require_caller(&state, &headers)?;
    assert_org_member(&state, caller.user_id, caller.organization_id).await?;
    let pool = db_pool(&state)?;

    let filter = PaymentFilter {
        status: query.status,
        lease_id: query.lease_id,
        needs_review: query.needs_review,
        limit: clamp_limit_in_range(query.limit, 1, 500),
        offset: query.offset,
    };
    let rows = payments::list_for_org(pool, caller.organization_id, &filter).await?;
    Ok(Json(json!({ "success": true, "data": rows })))
}

/// Record a pending payment. Rent payments reference a lease and may cover
/// several months; other charges reference their invoice directly. Nothing
/// is settled here: settlement happens on verification.
async fn create_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreatePaymentInput>,
) -> AppResult<impl IntoResponse> {
    let caller = require_caller(&state, &headers)?;
    let role = assert_org_member(&state, caller.user_id, caller.organization_id).await?;
    let pool = db_pool(&state)?;
    validate_input(&payload)?;

    if payload.lease_id.is_none() && payload.invoice_id.is_none() {
        return Err(AppError::BadRequest(
            "Either lease_id or invoice_id is required.".to_string(),
        ));
    }

    // The allocator re-checks at settlement time; failing here just gives
    // the payer the error while they can still fix the amount.
    if let Some(lease_id) = payload.lease_id {
        let lease = leases::lease_by_id(pool, caller.organization_id, lease_id).await?;
        if !allocation::lump_sum_matches(payload.amount_paid, lease.monthly_rent, payload.months_paid)
        {
            return Err(AppError::BadRequest(format!(
                "amount_paid {:.2} does not match {} month(s) of rent at {:.2}",
                payload.amount_paid, payload.months_paid, lease.monthly_rent
            )));
        }
    } else if let Some(invoice_id) = payload.invoice_id {
        invoices::invoice_by_id(pool, caller.organization_id, invoice_id).await?;
    }

    let new_payment = NewPayment {
        invoice_id: payload.invoice_id,
        lease_id: payload.lease_id,
        organization_id: caller.organization_id,
        tenant_user_id: (role == "tenant").then_some(caller.user_id),
        amount_paid: payload.amount_paid,
        payment_method: payload.payment_method,
        months_paid: payload.months_paid,
        gateway_request_id: non_empty_opt(payload.gateway_request_id.as_deref()),
        notes: non_empty_opt(payload.notes.as_deref()),
    };
    let payment = payments::insert(pool, &new_payment).await?;

    tracing::info!(
        payment_id = %payment.id,
        org_id = %caller.organization_id,
        method = payment.payment_method.as_str(),
        "Payment recorded"
    );
    Ok((
        axum::http::StatusCode::CREATED,
        Json(json!({ "success": true, "data": payment })),
    ))
}

async fn verify_payment(
    State(state): State<AppState>,
    Path(path): Path<PaymentIdPath>,
    headers: HeaderMap,
    Json(payload): Json<VerifyPaymentInput>,
) -> AppResult<Json<Value>> {
    let caller = require_caller(&state, &headers)?;
    caller.require_action(PAYMENT_VERIFY_ACTION)?;
    assert_org_role(
        &state,
        caller.user_id,
        caller.organization_id,
        PAYMENT_VERIFY_ROLES,
    )
    .await?;
    let pool = db_pool(&state)?;

    let today = Utc::now()
        .with_timezone(&tenancy::org_timezone(&state, caller.organization_id).await)
        .date_naive();
    let payment = verification::approve_payment(
        pool,
        caller.organization_id,
        path.payment_id,
        None,
        Some(caller.user_id),
        payload.notes.as_deref(),
        today,
    )
    .await?;
    Ok(Json(json!({ "success": true, "data": payment })))
}

async fn reject_payment(
    State(state): State<AppState>,
    Path(path): Path<PaymentIdPath>,
    headers: HeaderMap,
    Json(payload): Json<RejectPaymentInput>,
) -> AppResult<Json<Value>> {
    let caller = require_caller(&state, &headers)?;
    caller.require_action(PAYMENT_VERIFY_ACTION)?;
    assert_org_role(
        &state,
        caller.user_id,
        caller.organization_id,
        PAYMENT_VERIFY_ROLES,
    )
    .await?;
    let pool = db_pool(&state)?;
    validate_input(&payload)?;

    let payment = verification::reject_payment(
        pool,
        caller.organization_id,
        path.payment_id,
        payload.reason.trim(),
        Some(caller.user_id),
    )
    .await?;
    Ok(Json(json!({ "success": true, "data": payment })))
}

fn non_empty_opt(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
}
