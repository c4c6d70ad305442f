use chrono::NaiveDate;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::domain::invoice::InvoiceType;
use crate::domain::lease::Lease;
use crate::domain::period;
use crate::error::AppResult;
use crate::repository::{invoices, leases};

#[derive(Debug, Clone)]
pub struct SettlementOutcome {
    pub applied_invoice_ids: Vec<Uuid>,
    pub skipped_already_paid: Vec<Uuid>,
    /// Last rent period covered, i.e. the new floor for `rent_paid_until`.
    pub paid_through: NaiveDate,
}

/// Settle `months` consecutive rent periods for a lease starting at
/// `first_period`, then advance the lease's prepayment cursor.
///
/// Runs entirely on the caller's open transaction; the caller must already
/// hold the lease row lock so concurrent settlements serialize. Invoices
/// missing for a period are created on the fly, and periods whose invoice is
/// already paid are reported rather than an error, so the caller can
/// reconcile a mismatched lump sum instead of losing it.
pub async fn settle_rent_periods(
    conn: &mut PgConnection,
    lease: &Lease,
    first_period: NaiveDate,
    months: u32,
) -> AppResult<SettlementOutcome> {
    let mut applied_invoice_ids = Vec::new();
    let mut skipped_already_paid = Vec::new();
    let mut period_start = period::month_start(first_period);
    let mut paid_through = period_start;

    for _ in 0..months {
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
        invoices::insert_if_absent(&mut *conn, &new_invoice).await?;

        let invoice =
            invoices::lock_by_period(conn, lease.id, InvoiceType::Rent, period_start).await?;
        if invoice.is_paid {
            skipped_already_paid.push(invoice.id);
        } else {
            invoices::settle(conn, invoice.id).await?;
            applied_invoice_ids.push(invoice.id);
        }

        paid_through = period_start;
        period_start = period::add_months(period_start, 1);
    }

    leases::advance_rent_paid_until(conn, lease.id, paid_through).await?;

    Ok(SettlementOutcome {
        applied_invoice_ids,
        skipped_already_paid,
        paid_through,
    })
}

/// Settle a single invoice of any type. Rent invoices also pull the lease's
/// prepayment cursor forward to their period. Returns false when the invoice
/// was already paid.
pub async fn settle_single_invoice(conn: &mut PgConnection, invoice_id: Uuid) -> AppResult<bool> {
    let invoice = invoices::lock_by_id(conn, invoice_id).await?;
    if invoice.is_paid {
        return Ok(false);
    }
    invoices::settle(conn, invoice.id).await?;
    if invoice.invoice_type == InvoiceType::Rent {
        leases::advance_rent_paid_until(conn, invoice.lease_id, invoice.period_start).await?;
    }
    Ok(true)
}
