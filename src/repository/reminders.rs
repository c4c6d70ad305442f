use chrono::NaiveDate;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::reminder::{ReminderRecord, ReminderStage};
use crate::error::AppResult;

/// An unpaid rent invoice that a reminder stage should fire for, joined with
/// the lease fields the message template needs. The lease's paid-through
/// cursor rides along so the run can skip periods settled by a prepayment
/// after the invoice was cut.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReminderCandidate {
    pub invoice_id: Uuid,
    pub lease_id: Uuid,
    pub organization_id: Uuid,
    pub period_start: NaiveDate,
    pub due_date: NaiveDate,
    pub amount: f64,
    pub currency: String,
    pub tenant_name: String,
    pub tenant_phone_e164: Option<String>,
    pub tenant_user_id: Option<Uuid>,
    pub rent_paid_until: Option<NaiveDate>,
}

/// Invoices matching a stage's trigger on the given due date, excluding any
/// invoice that already has a live reminder at this stage.
pub async fn candidates_for_stage(
    pool: &PgPool,
    stage: ReminderStage,
    target_due: NaiveDate,
    org_scope: Option<Uuid>,
) -> AppResult<Vec<ReminderCandidate>> {
    let candidates = sqlx::query_as::<_, ReminderCandidate>(
        "SELECT i.id AS invoice_id, i.lease_id, i.organization_id, i.period_start,
                i.due_date, i.amount, l.currency, l.tenant_name, l.tenant_phone_e164,
                l.tenant_user_id, l.rent_paid_until
         FROM invoices i
         JOIN leases l ON l.id = i.lease_id
         WHERE i.invoice_type = 'rent'
           AND NOT i.is_paid
           AND i.due_date = $1
           AND (NOT $2 OR i.is_overdue)
           AND l.status = 'active'
           AND ($3::uuid IS NULL OR i.organization_id = $3)
           AND NOT EXISTS (
               SELECT 1 FROM reminder_records r
               WHERE r.invoice_id = i.id
                 AND r.stage = $4
                 AND r.delivery_status IN ('pending', 'sent')
           )
         ORDER BY i.organization_id, i.lease_id",
    )
    .bind(target_due)
    .bind(stage.requires_overdue())
    .bind(org_scope)
    .bind(stage.number())
    .fetch_all(pool)
    .await?;
    Ok(candidates)
}

pub struct NewReminder {
    pub organization_id: Uuid,
    pub invoice_id: Uuid,
    pub lease_id: Uuid,
    pub reminder_type: String,
    pub stage: i16,
    pub scheduled_for: NaiveDate,
    pub recipient: String,
}

/// Insert-or-ignore against the partial unique index on (invoice, stage) for
/// live reminders. Returns `None` when another run already holds the slot.
pub async fn insert_pending(
    pool: &PgPool,
    reminder: &NewReminder,
) -> AppResult<Option<ReminderRecord>> {
    let record = sqlx::query_as::<_, ReminderRecord>(
        "INSERT INTO reminder_records
             (organization_id, invoice_id, lease_id, reminder_type, stage,
              scheduled_for, recipient)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         ON CONFLICT (invoice_id, stage) WHERE delivery_status IN ('pending', 'sent')
         DO NOTHING
         RETURNING *",
    )
    .bind(reminder.organization_id)
    .bind(reminder.invoice_id)
    .bind(reminder.lease_id)
    .bind(&reminder.reminder_type)
    .bind(reminder.stage)
    .bind(reminder.scheduled_for)
    .bind(&reminder.recipient)
    .fetch_optional(pool)
    .await?;
    Ok(record)
}

pub async fn mark_sent(pool: &PgPool, reminder_id: Uuid) -> AppResult<()> {
    sqlx::query(
        "UPDATE reminder_records
         SET delivery_status = 'sent', sent_at = now()
         WHERE id = $1",
    )
    .bind(reminder_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// A failed handoff releases the (invoice, stage) slot so a later run can
/// retry the reminder.
pub async fn mark_failed(pool: &PgPool, reminder_id: Uuid, error: &str) -> AppResult<()> {
    sqlx::query(
        "UPDATE reminder_records
         SET delivery_status = 'failed', last_error = $2
         WHERE id = $1",
    )
    .bind(reminder_id)
    .bind(error)
    .execute(pool)
    .await?;
    Ok(())
}
