use chrono::NaiveDate;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::domain::lease::Lease;
use crate::error::{AppError, AppResult};

/// Active leases, optionally scoped to one organization. The billing runs
/// iterate these; `None` means a platform-wide sweep (scheduler path).
pub async fn active_leases(pool: &PgPool, org_scope: Option<Uuid>) -> AppResult<Vec<Lease>> {
    let leases = sqlx::query_as::<_, Lease>(
        "SELECT * FROM leases
         WHERE status = 'active'
           AND ($1::uuid IS NULL OR organization_id = $1)
         ORDER BY created_at",
    )
    .bind(org_scope)
    .fetch_all(pool)
    .await?;
    Ok(leases)
}

pub async fn lease_by_id(pool: &PgPool, organization_id: Uuid, lease_id: Uuid) -> AppResult<Lease> {
    sqlx::query_as::<_, Lease>("SELECT * FROM leases WHERE id = $1 AND organization_id = $2")
        .bind(lease_id)
        .bind(organization_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("lease not found".into()))
}

/// Row-locked fetch used inside the allocation transaction so two concurrent
/// allocations for the same lease serialize on the cursor.
pub async fn lock_lease(conn: &mut PgConnection, lease_id: Uuid) -> AppResult<Lease> {
    sqlx::query_as::<_, Lease>("SELECT * FROM leases WHERE id = $1 FOR UPDATE")
        .bind(lease_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound("lease not found".into()))
}

/// Advance the paid-through cursor, never backwards. GREATEST keeps the
/// update monotonic even if an older allocation lands after a newer one.
pub async fn advance_rent_paid_until(
    conn: &mut PgConnection,
    lease_id: Uuid,
    paid_through: NaiveDate,
) -> AppResult<()> {
    sqlx::query(
        "UPDATE leases
         SET rent_paid_until = GREATEST(COALESCE(rent_paid_until, $2::date), $2::date),
             updated_at = now()
         WHERE id = $1",
    )
    .bind(lease_id)
    .bind(paid_through)
    .execute(&mut *conn)
    .await?;
    Ok(())
}
