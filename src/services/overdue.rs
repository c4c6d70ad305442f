use chrono::NaiveDate;
use sqlx::PgPool;
use uuid::Uuid;

use crate::repository::invoices;

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct OverdueRunResult {
    pub overdue_count: u64,
    pub errors: u32,
}

/// Flag every unpaid invoice whose due date has passed. A single set-based
/// update, so reruns are free: already-flagged rows no longer match.
pub async fn mark_overdue(
    pool: &PgPool,
    org_scope: Option<Uuid>,
    today: NaiveDate,
) -> OverdueRunResult {
    let mut result = OverdueRunResult::default();
    match invoices::mark_overdue_before(pool, today, org_scope).await {
        Ok(count) => result.overdue_count = count,
        Err(error) => {
            tracing::warn!(error = %error, "Overdue sweep failed");
            result.errors += 1;
        }
    }
    tracing::info!(
        overdue_count = result.overdue_count,
        errors = result.errors,
        "Overdue sweep completed"
    );
    result
}
