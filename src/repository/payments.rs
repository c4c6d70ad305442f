use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::domain::payment::{Payment, PaymentMethod, PaymentStatus};
use crate::error::{AppError, AppResult};

pub struct NewPayment {
    pub invoice_id: Option<Uuid>,
    pub lease_id: Option<Uuid>,
    pub organization_id: Uuid,
    pub tenant_user_id: Option<Uuid>,
    pub amount_paid: f64,
    pub payment_method: PaymentMethod,
    pub months_paid: i32,
    pub gateway_request_id: Option<String>,
    pub notes: Option<String>,
}

pub async fn insert(pool: &PgPool, new: &NewPayment) -> AppResult<Payment> {
    let payment = sqlx::query_as::<_, Payment>(
        "INSERT INTO payments
             (invoice_id, lease_id, organization_id, tenant_user_id, amount_paid,
              payment_method, months_paid, gateway_request_id, notes)
         VALUES ($1, $2, $3, $4, $5, $6::payment_method, $7, $8, $9)
         RETURNING *",
    )
    .bind(new.invoice_id)
    .bind(new.lease_id)
    .bind(new.organization_id)
    .bind(new.tenant_user_id)
    .bind(new.amount_paid)
    .bind(new.payment_method)
    .bind(new.months_paid)
    .bind(&new.gateway_request_id)
    .bind(&new.notes)
    .fetch_one(pool)
    .await?;
    Ok(payment)
}

pub async fn payment_by_id(
    pool: &PgPool,
    organization_id: Uuid,
    payment_id: Uuid,
) -> AppResult<Payment> {
    sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1 AND organization_id = $2")
        .bind(payment_id)
        .bind(organization_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("payment not found".into()))
}

/// Correlate a gateway callback with the payment that started it. Request
/// ids are gateway-issued, so a lookup without org scoping is safe.
pub async fn payment_by_gateway_request_id(
    pool: &PgPool,
    gateway_request_id: &str,
) -> AppResult<Option<Payment>> {
    let payment = sqlx::query_as::<_, Payment>(
        "SELECT * FROM payments
         WHERE gateway_request_id = $1
         ORDER BY created_at DESC
         LIMIT 1",
    )
    .bind(gateway_request_id)
    .fetch_optional(pool)
    .await?;
    Ok(payment)
}

/// Row-locked fetch inside a verification transaction. The caller must
/// re-check `status` after acquiring the lock; that re-check is what stops
/// two overlapping reconcile cycles (or a manual verify racing the poller)
/// from settling the same payment twice.
pub async fn lock_payment(conn: &mut PgConnection, payment_id: Uuid) -> AppResult<Payment> {
    sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1 FOR UPDATE")
        .bind(payment_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound("payment not found".into()))
}

pub async fn mark_verified(
    conn: &mut PgConnection,
    payment_id: Uuid,
    receipt: Option<&str>,
    verified_by: Option<Uuid>,
    notes: Option<&str>,
) -> AppResult<()> {
    sqlx::query(
        "UPDATE payments
         SET status = 'verified',
             external_reference = COALESCE($2, external_reference),
             verified_by = $3,
             verified_at = now(),
             needs_review = FALSE,
             notes = COALESCE($4, notes),
             updated_at = now()
         WHERE id = $1 AND status = 'pending'",
    )
    .bind(payment_id)
    .bind(receipt)
    .bind(verified_by)
    .bind(notes)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn mark_failed(
    conn: &mut PgConnection,
    payment_id: Uuid,
    reason: &str,
    verified_by: Option<Uuid>,
) -> AppResult<()> {
    sqlx::query(
        "UPDATE payments
         SET status = 'failed',
             failure_reason = $2,
             verified_by = $3,
             verified_at = now(),
             needs_review = FALSE,
             updated_at = now()
         WHERE id = $1 AND status = 'pending'",
    )
    .bind(payment_id)
    .bind(reason)
    .bind(verified_by)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Record the outcome of an inconclusive reconcile attempt: bump the attempt
/// counter and, once the budget is spent, park the payment for manual review.
pub async fn record_verify_attempt(
    pool: &PgPool,
    payment_id: Uuid,
    verify_attempts: i16,
    needs_review: bool,
) -> AppResult<()> {
    sqlx::query(
        "UPDATE payments
         SET verify_attempts = $2, needs_review = $3, updated_at = now()
         WHERE id = $1 AND status = 'pending'",
    )
    .bind(payment_id)
    .bind(verify_attempts)
    .bind(needs_review)
    .execute(pool)
    .await?;
    Ok(())
}

/// Payments the reconciler should look at this cycle: pending mobile-money
/// payments with a gateway id, not yet parked for review, older than the
/// minimum age (so the gateway has had time to register the transaction).
pub async fn due_for_reconciliation(
    pool: &PgPool,
    organization_id: Uuid,
    created_before: DateTime<Utc>,
    limit: i64,
) -> AppResult<Vec<Payment>> {
    let payments = sqlx::query_as::<_, Payment>(
        "SELECT * FROM payments
         WHERE organization_id = $1
           AND status = 'pending'
           AND payment_method = 'mpesa'
           AND gateway_request_id IS NOT NULL
           AND NOT needs_review
           AND created_at < $2
         ORDER BY created_at
         LIMIT $3",
    )
    .bind(organization_id)
    .bind(created_before)
    .bind(limit.clamp(1, 500))
    .fetch_all(pool)
    .await?;
    Ok(payments)
}

/// Organizations that currently have anything for the poller to do.
pub async fn orgs_with_reconcilable_payments(pool: &PgPool) -> AppResult<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        "SELECT DISTINCT organization_id FROM payments
         WHERE status = 'pending'
           AND payment_method = 'mpesa'
           AND gateway_request_id IS NOT NULL
           AND NOT needs_review",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

#[derive(Debug, Default)]
pub struct PaymentFilter {
    pub status: Option<PaymentStatus>,
    pub lease_id: Option<Uuid>,
    pub needs_review: Option<bool>,
    pub limit: i64,
    pub offset: i64,
}

pub async fn list_for_org(
    pool: &PgPool,
    organization_id: Uuid,
    filter: &PaymentFilter,
) -> AppResult<Vec<Payment>> {
    let payments = sqlx::query_as::<_, Payment>(
        "SELECT * FROM payments
         WHERE organization_id = $1
           AND ($2::payment_status IS NULL OR status = $2)
           AND ($3::uuid IS NULL OR lease_id = $3)
           AND ($4::boolean IS NULL OR needs_review = $4)
         ORDER BY created_at DESC
         LIMIT $5 OFFSET $6",
    )
    .bind(organization_id)
    .bind(filter.status)
    .bind(filter.lease_id)
    .bind(filter.needs_review)
    .bind(filter.limit.clamp(1, 500))
    .bind(filter.offset.max(0))
    .fetch_all(pool)
    .await?;
    Ok(payments)
}
