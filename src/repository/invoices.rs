use chrono::NaiveDate;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::domain::invoice::{Invoice, InvoiceType};
use crate::error::{AppError, AppResult};

pub struct NewInvoice {
    pub lease_id: Uuid,
    pub organization_id: Uuid,
    pub invoice_type: InvoiceType,
    pub period_start: NaiveDate,
    pub due_date: NaiveDate,
    pub amount: f64,
    pub months_covered: i32,
    pub description: String,
}

/// Insert-or-ignore on the (lease, type, period) uniqueness key. Returns
/// whether a row was actually written; under concurrent runs the loser of the
/// race simply sees `false`.
pub async fn insert_if_absent<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    invoice: &NewInvoice,
) -> AppResult<bool> {
    let result = sqlx::query(
        "INSERT INTO invoices
             (lease_id, organization_id, invoice_type, period_start, due_date,
              amount, months_covered, description)
         VALUES ($1, $2, $3::invoice_type, $4, $5, $6, $7, $8)
         ON CONFLICT (lease_id, invoice_type, period_start) DO NOTHING",
    )
    .bind(invoice.lease_id)
    .bind(invoice.organization_id)
    .bind(invoice.invoice_type)
    .bind(invoice.period_start)
    .bind(invoice.due_date)
    .bind(invoice.amount)
    .bind(invoice.months_covered)
    .bind(&invoice.description)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Row-locked fetch by the idempotency key, used by settlement so overlapping
/// allocations serialize per invoice.
pub async fn lock_by_period(
    conn: &mut PgConnection,
    lease_id: Uuid,
    invoice_type: InvoiceType,
    period_start: NaiveDate,
) -> AppResult<Invoice> {
    sqlx::query_as::<_, Invoice>(
        "SELECT * FROM invoices
         WHERE lease_id = $1 AND invoice_type = $2::invoice_type AND period_start = $3
         FOR UPDATE",
    )
    .bind(lease_id)
    .bind(invoice_type)
    .bind(period_start)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound("invoice not found for billing period".into()))
}

pub async fn lock_by_id(conn: &mut PgConnection, invoice_id: Uuid) -> AppResult<Invoice> {
    sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE id = $1 FOR UPDATE")
        .bind(invoice_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound("invoice not found".into()))
}

pub async fn invoice_by_id(
    pool: &PgPool,
    organization_id: Uuid,
    invoice_id: Uuid,
) -> AppResult<Invoice> {
    sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE id = $1 AND organization_id = $2")
        .bind(invoice_id)
        .bind(organization_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("invoice not found".into()))
}

/// Flip an unpaid invoice to paid. Returns `false` when the invoice was
/// already settled, which callers treat as an idempotent skip.
pub async fn settle(conn: &mut PgConnection, invoice_id: Uuid) -> AppResult<bool> {
    let result = sqlx::query(
        "UPDATE invoices
         SET is_paid = TRUE, is_overdue = FALSE, paid_at = now(), updated_at = now()
         WHERE id = $1 AND NOT is_paid",
    )
    .bind(invoice_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Sweep unpaid invoices past their due date into the overdue bucket.
/// The `NOT is_overdue` guard makes re-runs no-ops.
pub async fn mark_overdue_before(
    pool: &PgPool,
    cutoff: NaiveDate,
    org_scope: Option<Uuid>,
) -> AppResult<u64> {
    let result = sqlx::query(
        "UPDATE invoices
         SET is_overdue = TRUE, updated_at = now()
         WHERE NOT is_paid AND NOT is_overdue AND due_date < $1
           AND ($2::uuid IS NULL OR organization_id = $2)",
    )
    .bind(cutoff)
    .bind(org_scope)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

#[derive(Debug, Default)]
pub struct InvoiceFilter {
    pub lease_id: Option<Uuid>,
    pub is_paid: Option<bool>,
    pub overdue_only: bool,
    pub limit: i64,
    pub offset: i64,
}

pub async fn list_for_org(
    pool: &PgPool,
    organization_id: Uuid,
    filter: &InvoiceFilter,
) -> AppResult<Vec<Invoice>> {
    let invoices = sqlx::query_as::<_, Invoice>(
        "SELECT * FROM invoices
         WHERE organization_id = $1
           AND ($2::uuid IS NULL OR lease_id = $2)
           AND ($3::boolean IS NULL OR is_paid = $3)
           AND (NOT $4 OR is_overdue)
         ORDER BY period_start DESC, created_at DESC
         LIMIT $5 OFFSET $6",
    )
    .bind(organization_id)
    .bind(filter.lease_id)
    .bind(filter.is_paid)
    .bind(filter.overdue_only)
    .bind(filter.limit.clamp(1, 500))
    .bind(filter.offset.max(0))
    .fetch_all(pool)
    .await?;
    Ok(invoices)
}
