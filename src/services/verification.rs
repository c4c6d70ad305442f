use chrono::NaiveDate;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::payment::{Payment, PaymentStatus};
use crate::error::{AppError, AppResult};
use crate::repository::payments;
use crate::services::{allocation, settlement};

/// Verify a pending payment and settle whatever it funds, atomically.
///
/// Used by both the manual approve endpoint and the reconciler when the
/// gateway confirms a transaction. Rent payments (those carrying a lease) go
/// through the lump-sum allocator, which also enforces the amount check;
/// payments tied to a single non-rent invoice settle just that invoice. The
/// row lock plus the status re-check make a double verify a `Conflict`, not
/// a double settlement.
pub async fn approve_payment(
    pool: &PgPool,
    organization_id: Uuid,
    payment_id: Uuid,
    receipt: Option<&str>,
    verified_by: Option<Uuid>,
    notes: Option<&str>,
    today: NaiveDate,
) -> AppResult<Payment> {
    let mut tx = pool.begin().await?;
    let payment = payments::lock_payment(&mut tx, payment_id).await?;
    if payment.organization_id != organization_id {
        return Err(AppError::NotFound("payment not found".into()));
    }
    payment.status.ensure_can_become(PaymentStatus::Verified)?;

    if let Some(lease_id) = payment.lease_id {
        allocation::allocate_on(
            &mut tx,
            lease_id,
            payment.amount_paid,
            payment.months_paid,
            today,
        )
        .await?;
    } else if let Some(invoice_id) = payment.invoice_id {
        settlement::settle_single_invoice(&mut tx, invoice_id).await?;
    }

    payments::mark_verified(&mut tx, payment_id, receipt, verified_by, notes).await?;
    tx.commit().await?;

    tracing::info!(
        payment_id = %payment_id,
        org_id = %organization_id,
        manual = verified_by.is_some(),
        "Payment verified"
    );
    payments::payment_by_id(pool, organization_id, payment_id).await
}

/// Mark a pending payment failed with a reason. Never touches invoices: a
/// rejected payment leaves whatever it claimed to fund unpaid.
pub async fn reject_payment(
    pool: &PgPool,
    organization_id: Uuid,
    payment_id: Uuid,
    reason: &str,
    verified_by: Option<Uuid>,
) -> AppResult<Payment> {
    let mut tx = pool.begin().await?;
    let payment = payments::lock_payment(&mut tx, payment_id).await?;
    if payment.organization_id != organization_id {
        return Err(AppError::NotFound("payment not found".into()));
    }
    payment.status.ensure_can_become(PaymentStatus::Failed)?;
    payments::mark_failed(&mut tx, payment_id, reason, verified_by).await?;
    tx.commit().await?;

    tracing::info!(
        payment_id = %payment_id,
        org_id = %organization_id,
        reason,
        "Payment rejected"
    );
    payments::payment_by_id(pool, organization_id, payment_id).await
}
