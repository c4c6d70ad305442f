use chrono::NaiveDate;
use uuid::Uuid;

use crate::domain::period;
use crate::domain::reminder::ReminderStage;
use crate::repository::reminders::{self, NewReminder, ReminderCandidate};
use crate::services::dispatch::{self, DispatchRequest};
use crate::state::AppState;

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ReminderRunResult {
    pub reminders_sent: u32,
    pub skipped_settled: u32,
    pub skipped_existing: u32,
    pub skipped_no_contact: u32,
    pub failed_dispatch: u32,
    pub errors: u32,
}

/// Fire every reminder stage whose offset lands on `as_of`.
///
/// Invoices whose period the lease's paid-through cursor already covers are
/// skipped without a record; nobody gets chased for settled rent. A reminder
/// row is claimed before the dispatch call, so two overlapping runs cannot
/// both message the same tenant for the same stage. The handoff is
/// at-least-once: if the process dies between dispatch and `mark_sent`, the
/// slot stays pending and the row is simply not re-claimed. A failed handoff
/// frees the slot, but each stage selects invoices by exact due-date offset,
/// so only a rerun for the same `as_of` retries it; the next day's run
/// targets the next cohort.
pub async fn send_reminders_for_day(
    state: &AppState,
    org_scope: Option<Uuid>,
    as_of: NaiveDate,
) -> ReminderRunResult {
    let mut result = ReminderRunResult::default();
    let Some(pool) = state.db_pool.as_ref() else {
        tracing::warn!("Reminder run skipped: database is not configured");
        result.errors += 1;
        return result;
    };

    for stage in ReminderStage::ALL {
        let target_due = stage.target_due_date(as_of);
        let candidates =
            match reminders::candidates_for_stage(pool, stage, target_due, org_scope).await {
                Ok(rows) => rows,
                Err(error) => {
                    tracing::warn!(
                        stage = stage.number(),
                        error = %error,
                        "Could not load reminder candidates"
                    );
                    result.errors += 1;
                    continue;
                }
            };

        for candidate in candidates {
            // A prepayment landing after the invoice was cut settles the
            // period even if the paid flag has not caught up yet.
            if period::cursor_covers(candidate.rent_paid_until, candidate.period_start) {
                result.skipped_settled += 1;
                continue;
            }
            let Some(phone) = candidate.tenant_phone_e164.clone() else {
                result.skipped_no_contact += 1;
                continue;
            };

            let new_reminder = NewReminder {
                organization_id: candidate.organization_id,
                invoice_id: candidate.invoice_id,
                lease_id: candidate.lease_id,
                reminder_type: stage.template_key().to_string(),
                stage: stage.number(),
                scheduled_for: as_of,
                recipient: phone.clone(),
            };
            let record = match reminders::insert_pending(pool, &new_reminder).await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    result.skipped_existing += 1;
                    continue;
                }
                Err(error) => {
                    tracing::warn!(
                        invoice_id = %candidate.invoice_id,
                        stage = stage.number(),
                        error = %error,
                        "Could not claim reminder slot"
                    );
                    result.errors += 1;
                    continue;
                }
            };

            let message = render_message(stage, &candidate, &state.config.app_public_url);
            let related_entity = format!("reminder:{}", record.id);
            let request = DispatchRequest {
                recipient: &phone,
                template_key: stage.template_key(),
                message: &message,
                related_entity: &related_entity,
            };
            match dispatch::send(&state.http_client, &state.config, &request).await {
                Ok(()) => match reminders::mark_sent(pool, record.id).await {
                    Ok(()) => result.reminders_sent += 1,
                    Err(error) => {
                        tracing::warn!(
                            reminder_id = %record.id,
                            error = %error,
                            "Reminder dispatched but could not be marked sent"
                        );
                        result.errors += 1;
                    }
                },
                Err(reason) => {
                    if let Err(error) = reminders::mark_failed(pool, record.id, &reason).await {
                        tracing::warn!(
                            reminder_id = %record.id,
                            error = %error,
                            "Could not record reminder failure"
                        );
                    }
                    result.failed_dispatch += 1;
                }
            }
        }
    }

    tracing::info!(
        as_of = %as_of,
        reminders_sent = result.reminders_sent,
        skipped_settled = result.skipped_settled,
        skipped_existing = result.skipped_existing,
        skipped_no_contact = result.skipped_no_contact,
        failed_dispatch = result.failed_dispatch,
        errors = result.errors,
        "Reminder run completed"
    );
    result
}

fn render_message(stage: ReminderStage, candidate: &ReminderCandidate, app_url: &str) -> String {
    let name = &candidate.tenant_name;
    let amount = format_amount(candidate.amount, &candidate.currency);
    let due = candidate.due_date.format("%d %b %Y");
    let pay_url = format!("{app_url}/tenant/payments");
    match stage {
        ReminderStage::PreDue => format!(
            "👋 Hello {name}! A friendly reminder that your rent of {amount} is due on {due}. You can pay any time at {pay_url}"
        ),
        ReminderStage::DueDay => format!(
            "📅 Hello {name}, your rent of {amount} is due today ({due}). Please complete your payment at {pay_url}"
        ),
        ReminderStage::Overdue5 => format!(
            "⚠️ Hello {name}, your rent of {amount} was due on {due} and is now 5 days overdue. Please settle it at {pay_url} to avoid penalties."
        ),
        ReminderStage::Overdue7 => format!(
            "🔴 Hello {name}, your rent of {amount} is now 7 days overdue (due {due}). Please pay at {pay_url} or contact your property manager."
        ),
        ReminderStage::Overdue30 => format!(
            "🚨 FINAL NOTICE: Hello {name}, your rent of {amount} has been outstanding for 30 days (due {due}). Please contact your property manager immediately."
        ),
    }
}

fn format_amount(amount: f64, currency: &str) -> String {
    if currency.eq_ignore_ascii_case("KES") {
        format!("KES {}", format_number_with_commas(amount.round() as i64))
    } else {
        format!("{amount:.2} {currency}")
    }
}

fn format_number_with_commas(value: i64) -> String {
    let digits = value.abs().to_string();
    let mut out = String::new();
    for (index, ch) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    if value < 0 {
        format!("-{out}")
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn candidate() -> ReminderCandidate {
        ReminderCandidate {
            invoice_id: Uuid::new_v4(),
            lease_id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            period_start: NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
            due_date: NaiveDate::from_ymd_opt(2025, 7, 5).unwrap(),
            amount: 45_000.0,
            currency: "KES".to_string(),
            tenant_name: "Amina".to_string(),
            tenant_phone_e164: Some("+254700000001".to_string()),
            tenant_user_id: None,
            rent_paid_until: None,
        }
    }

    #[test]
    fn prepaid_periods_are_recognized_as_settled() {
        let mut settled = candidate();
        settled.rent_paid_until = Some(NaiveDate::from_ymd_opt(2025, 7, 1).unwrap());
        assert!(period::cursor_covers(
            settled.rent_paid_until,
            settled.period_start
        ));
        assert!(!period::cursor_covers(
            candidate().rent_paid_until,
            candidate().period_start
        ));
    }

    #[test]
    fn kenyan_amounts_render_with_commas() {
        assert_eq!(format_amount(45_000.0, "KES"), "KES 45,000");
        assert_eq!(format_amount(1_234_567.0, "kes"), "KES 1,234,567");
        assert_eq!(format_amount(950.0, "KES"), "KES 950");
    }

    #[test]
    fn other_currencies_render_with_decimals() {
        assert_eq!(format_amount(120.5, "USD"), "120.50 USD");
    }

    #[test]
    fn pre_due_message_mentions_amount_and_date() {
        let message = render_message(ReminderStage::PreDue, &candidate(), "https://app.test");
        assert!(message.contains("KES 45,000"));
        assert!(message.contains("05 Jul 2025"));
        assert!(message.contains("https://app.test/tenant/payments"));
    }

    #[test]
    fn final_notice_escalates_wording() {
        let message = render_message(ReminderStage::Overdue30, &candidate(), "https://app.test");
        assert!(message.contains("FINAL NOTICE"));
        assert!(message.contains("30 days"));
    }
}
