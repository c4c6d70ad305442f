use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use serde_json::{json, Value};

use crate::auth::require_caller;
use crate::error::AppResult;
use crate::repository::invoices::{self, InvoiceFilter};
use crate::schemas::{clamp_limit_in_range, InvoicesQuery};
use crate::state::{db_pool, AppState};
use crate::tenancy::assert_org_member;

pub fn router() -> axum::Router<AppState> {
    axum::Router::new().route("/invoices", axum::routing::get(list_invoices))
}

async fn list_invoices(
    State(state): State<AppState>,
    Query(query): Query<InvoicesQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let caller = require_caller(&state, &headers)?;
    assert_org_member(&state, caller.user_id, caller.organization_id).await?;
    let pool = db_pool(&state)?;

    let filter = InvoiceFilter {
        lease_id: query.lease_id,
        is_paid: query.is_paid,
        overdue_only: query.overdue,
        limit: clamp_limit_in_range(query.limit, 1, 500),
        offset: query.offset,
    };
    let rows = invoices::list_for_org(pool, caller.organization_id, &filter).await?;
    Ok(Json(json!({ "success": true, "data": rows })))
}
