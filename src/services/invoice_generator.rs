use chrono::NaiveDate;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::invoice::InvoiceType;
use crate::domain::period;
use crate::repository::{invoices, leases};

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct InvoiceRunResult {
    pub period_start: Option<NaiveDate>,
    pub leases_processed: u32,
    pub created: u32,
    pub skipped_prepaid: u32,
    pub skipped_ineligible: u32,
    pub skipped_existing: u32,
    pub errors: u32,
}

/// Create the month's rent invoice for every active lease that needs one.
///
/// Safe to run any number of times for the same month: the per-period
/// uniqueness key absorbs reruns, leases paid ahead are skipped via the
/// prepayment cursor, and leases that started after the 1st sit out until
/// their first full month. One lease failing never stops the sweep.
pub async fn generate_invoices(
    pool: &PgPool,
    org_scope: Option<Uuid>,
    as_of: NaiveDate,
) -> InvoiceRunResult {
    let period_start = period::month_start(as_of);
    let mut result = InvoiceRunResult {
        period_start: Some(period_start),
        ..Default::default()
    };

    let leases = match leases::active_leases(pool, org_scope).await {
        Ok(rows) => rows,
        Err(error) => {
            tracing::warn!(error = %error, "Invoice generation could not load leases");
            result.errors += 1;
            return result;
        }
    };

    for lease in leases {
        result.leases_processed += 1;
        if period::first_eligible_period(lease.start_date) > period_start {
            result.skipped_ineligible += 1;
            continue;
        }
        if period::cursor_covers(lease.rent_paid_until, period_start) {
            result.skipped_prepaid += 1;
            continue;
        }

        let new_invoice = invoices::NewInvoice {
            lease_id: lease.id,
            organization_id: lease.organization_id,
            invoice_type: InvoiceType::Rent,
            period_start,
            due_date: period::due_date(period_start),
            amount: lease.monthly_rent,
            months_covered: 1,
            description: format!("Rent for {}", period_start.format("%B %Y")),
        };
        match invoices::insert_if_absent(pool, &new_invoice).await {
            Ok(true) => result.created += 1,
            Ok(false) => result.skipped_existing += 1,
            Err(error) => {
                tracing::warn!(lease_id = %lease.id, error = %error, "Invoice creation failed for lease");
                result.errors += 1;
            }
        }
    }

    tracing::info!(
        period_start = %period_start,
        leases_processed = result.leases_processed,
        created = result.created,
        skipped_prepaid = result.skipped_prepaid,
        skipped_ineligible = result.skipped_ineligible,
        skipped_existing = result.skipped_existing,
        errors = result.errors,
        "Invoice generation completed"
    );
    result
}
