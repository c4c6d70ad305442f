use chrono::NaiveDate;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::domain::period;
use crate::error::{AppError, AppResult};
use crate::repository::leases;
use crate::services::settlement::{self, SettlementOutcome};

/// Lump sums may drift from the exact multiple by rounding at the payer's
/// bank; anything beyond a cent is a real mismatch.
pub const AMOUNT_TOLERANCE: f64 = 0.01;

pub fn lump_sum_matches(amount_paid: f64, monthly_rent: f64, months: i32) -> bool {
    (amount_paid - monthly_rent * f64::from(months)).abs() <= AMOUNT_TOLERANCE
}

/// Allocate a multi-month rent lump sum across consecutive billing periods.
///
/// Validates the amount against the lease's rent, picks the first period the
/// prepayment cursor does not cover, then settles `months` periods through
/// the shared settlement path. Must run on an open transaction; the lease row
/// lock taken here serializes concurrent allocations for the same lease.
pub async fn allocate_on(
    conn: &mut PgConnection,
    lease_id: Uuid,
    amount_paid: f64,
    months: i32,
    today: NaiveDate,
) -> AppResult<SettlementOutcome> {
    if months < 1 {
        return Err(AppError::BadRequest(
            "months_paid must be at least 1".to_string(),
        ));
    }

    let lease = leases::lock_lease(conn, lease_id).await?;
    if !lump_sum_matches(amount_paid, lease.monthly_rent, months) {
        return Err(AppError::BadRequest(format!(
            "amount_paid {:.2} does not match {} month(s) of rent at {:.2}",
            amount_paid, months, lease.monthly_rent
        )));
    }

    let first_period = period::next_uncovered_period(today, lease.rent_paid_until);
    let outcome = settlement::settle_rent_periods(conn, &lease, first_period, months as u32).await?;

    tracing::info!(
        lease_id = %lease_id,
        months,
        paid_through = %outcome.paid_through,
        applied = outcome.applied_invoice_ids.len(),
        skipped_already_paid = outcome.skipped_already_paid.len(),
        "Allocated rent lump sum"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_multiple_matches() {
        assert!(lump_sum_matches(30_000.0, 10_000.0, 3));
        assert!(lump_sum_matches(10_000.0, 10_000.0, 1));
    }

    #[test]
    fn cent_level_drift_is_tolerated() {
        assert!(lump_sum_matches(30_000.005, 10_000.0, 3));
        assert!(lump_sum_matches(29_999.99, 10_000.0, 3));
    }

    #[test]
    fn real_mismatches_are_rejected() {
        assert!(!lump_sum_matches(25_000.0, 10_000.0, 3));
        assert!(!lump_sum_matches(30_000.02, 10_000.0, 3));
        assert!(!lump_sum_matches(10_000.0, 10_000.0, 2));
    }
}
