use chrono::Utc;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::repository::{payments, settings};
use crate::services::billing_settings;
use crate::services::dispatch::{self, DispatchRequest};
use crate::services::mpesa::{self, GatewayError, TransactionStatus};
use crate::services::verification;
use crate::state::{db_pool, AppState};
use crate::tenancy;

/// What one gateway probe told us about a pending payment.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Completed { receipt: String },
    Failed { reason: String },
    /// Still processing, or the gateway was unreachable. Either way the
    /// payment stays pending and the probe counts against the retry budget.
    Inconclusive { detail: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileAction {
    Approve { receipt: String },
    Reject { reason: String },
    RetryLater { attempts: i16 },
    FlagForReview { attempts: i16 },
}

/// Decision core of the poller. A payment is only ever moved to a terminal
/// state on an explicit gateway verdict; running out of retries parks it for
/// manual review instead of guessing.
pub fn decide(outcome: ProbeOutcome, prior_attempts: i16, retry_budget: i16) -> ReconcileAction {
    match outcome {
        ProbeOutcome::Completed { receipt } => ReconcileAction::Approve { receipt },
        ProbeOutcome::Failed { reason } => ReconcileAction::Reject { reason },
        ProbeOutcome::Inconclusive { .. } => {
            let attempts = prior_attempts.saturating_add(1);
            if attempts >= retry_budget {
                ReconcileAction::FlagForReview { attempts }
            } else {
                ReconcileAction::RetryLater { attempts }
            }
        }
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ReconcileRunResult {
    pub orgs_checked: u32,
    pub payments_checked: u32,
    pub verified: u32,
    pub failed: u32,
    pub still_pending: u32,
    pub flagged_for_review: u32,
    pub errors: u32,
}

/// One reconciliation sweep: probe the gateway for every pending mobile-money
/// payment that is due a check and act on each verdict independently.
///
/// Refuses to run at all when gateway credentials are missing; silently
/// skipping would let pending payments rot without anyone noticing.
pub async fn run_reconciliation_sweep(
    state: &AppState,
    org_scope: Option<Uuid>,
) -> AppResult<ReconcileRunResult> {
    let pool = db_pool(state)?;
    if !state.config.daraja_configured() {
        return Err(AppError::Configuration(
            "M-Pesa verification requires DARAJA_CONSUMER_KEY, DARAJA_CONSUMER_SECRET, \
             DARAJA_SHORT_CODE and DARAJA_PASSKEY"
                .to_string(),
        ));
    }

    let mut result = ReconcileRunResult::default();
    let orgs = match org_scope {
        Some(org) => vec![org],
        None => payments::orgs_with_reconcilable_payments(pool).await?,
    };

    for organization_id in orgs {
        result.orgs_checked += 1;
        if let Err(error) = reconcile_org(state, organization_id, &mut result).await {
            tracing::warn!(
                org_id = %organization_id,
                error = %error,
                "Reconcile cycle failed for organization"
            );
            result.errors += 1;
        }
    }

    tracing::info!(
        orgs_checked = result.orgs_checked,
        payments_checked = result.payments_checked,
        verified = result.verified,
        failed = result.failed,
        still_pending = result.still_pending,
        flagged_for_review = result.flagged_for_review,
        errors = result.errors,
        "Reconciliation sweep completed"
    );
    Ok(result)
}

async fn reconcile_org(
    state: &AppState,
    organization_id: Uuid,
    result: &mut ReconcileRunResult,
) -> AppResult<()> {
    let pool = db_pool(state)?;
    let org_settings = billing_settings::effective_settings(state, organization_id).await?;
    let cutoff = Utc::now() - chrono::Duration::seconds(state.config.reconcile_min_age_seconds);
    let batch = payments::due_for_reconciliation(pool, organization_id, cutoff, 100).await?;
    if batch.is_empty() {
        return Ok(());
    }

    let today = Utc::now()
        .with_timezone(&tenancy::org_timezone(state, organization_id).await)
        .date_naive();
    let mut transport_failures = 0u32;

    for payment in batch {
        result.payments_checked += 1;
        let Some(request_id) = payment.gateway_request_id.as_deref() else {
            continue;
        };

        let probe = match mpesa::query_transaction_status(
            &state.http_client,
            &state.config,
            request_id,
            org_settings.query_timeout(),
        )
        .await
        {
            Ok(TransactionStatus::Completed { receipt }) => ProbeOutcome::Completed { receipt },
            Ok(TransactionStatus::Failed { reason }) => ProbeOutcome::Failed { reason },
            Ok(TransactionStatus::StillProcessing) => ProbeOutcome::Inconclusive {
                detail: "transaction still processing".to_string(),
            },
            Err(GatewayError::NotConfigured(detail)) => {
                return Err(AppError::Configuration(detail));
            }
            Err(GatewayError::Transient(detail)) => {
                transport_failures += 1;
                ProbeOutcome::Inconclusive { detail }
            }
        };

        match decide(probe, payment.verify_attempts, org_settings.retry_budget()) {
            ReconcileAction::Approve { receipt } => {
                match verification::approve_payment(
                    pool,
                    organization_id,
                    payment.id,
                    Some(&receipt),
                    None,
                    None,
                    today,
                )
                .await
                {
                    Ok(_) => result.verified += 1,
                    Err(AppError::Conflict(_)) => {
                        tracing::debug!(payment_id = %payment.id, "Payment already settled by another actor");
                    }
                    Err(AppError::BadRequest(detail)) => {
                        // Gateway says paid but the amount no longer lines up
                        // with the lease. Retrying cannot fix that.
                        tracing::warn!(
                            payment_id = %payment.id,
                            error = %detail,
                            "Confirmed payment could not be allocated; parking for review"
                        );
                        if let Err(error) = payments::record_verify_attempt(
                            pool,
                            payment.id,
                            payment.verify_attempts,
                            true,
                        )
                        .await
                        {
                            tracing::warn!(payment_id = %payment.id, error = %error, "Could not park payment for review");
                            result.errors += 1;
                        } else {
                            alert_parked_payment(state, organization_id, payment.id).await;
                            result.flagged_for_review += 1;
                        }
                    }
                    Err(error) => {
                        tracing::warn!(
                            payment_id = %payment.id,
                            error = %error,
                            "Gateway confirmed payment but settlement failed"
                        );
                        result.errors += 1;
                    }
                }
            }
            ReconcileAction::Reject { reason } => {
                match verification::reject_payment(pool, organization_id, payment.id, &reason, None)
                    .await
                {
                    Ok(_) => result.failed += 1,
                    Err(AppError::Conflict(_)) => {
                        tracing::debug!(payment_id = %payment.id, "Payment already settled by another actor");
                    }
                    Err(error) => {
                        tracing::warn!(
                            payment_id = %payment.id,
                            error = %error,
                            "Could not record gateway failure"
                        );
                        result.errors += 1;
                    }
                }
            }
            ReconcileAction::RetryLater { attempts } => {
                if let Err(error) =
                    payments::record_verify_attempt(pool, payment.id, attempts, false).await
                {
                    tracing::warn!(payment_id = %payment.id, error = %error, "Could not record verify attempt");
                    result.errors += 1;
                } else {
                    result.still_pending += 1;
                }
            }
            ReconcileAction::FlagForReview { attempts } => {
                if let Err(error) =
                    payments::record_verify_attempt(pool, payment.id, attempts, true).await
                {
                    tracing::warn!(payment_id = %payment.id, error = %error, "Could not park payment for review");
                    result.errors += 1;
                } else {
                    tracing::warn!(
                        payment_id = %payment.id,
                        attempts,
                        "Verification budget exhausted; payment needs manual review"
                    );
                    alert_parked_payment(state, organization_id, payment.id).await;
                    result.flagged_for_review += 1;
                }
            }
        }
    }

    // Operability note on the settings row; best effort only.
    if transport_failures > 0 {
        if let Err(error) = settings::record_test_result(pool, organization_id, "failed").await {
            tracing::debug!(org_id = %organization_id, error = %error, "Could not record gateway health");
        }
    }
    Ok(())
}

/// Best-effort heads-up to the organization's admin that a payment is stuck
/// in review. Delivery problems are logged and swallowed; the review queue
/// itself is the durable signal.
async fn alert_parked_payment(state: &AppState, organization_id: Uuid, payment_id: Uuid) {
    let phone = match tenancy::primary_admin_phone(state, organization_id).await {
        Ok(Some(phone)) => phone,
        Ok(None) => return,
        Err(error) => {
            tracing::debug!(org_id = %organization_id, error = %error, "Could not look up admin contact");
            return;
        }
    };

    let message = format!(
        "A tenant payment could not be verified automatically and needs your review. \
         Payment ref: {payment_id}."
    );
    let related_entity = format!("payment:{payment_id}");
    let request = DispatchRequest {
        recipient: &phone,
        template_key: "payment_needs_review",
        message: &message,
        related_entity: &related_entity,
    };
    if let Err(reason) = dispatch::send(&state.http_client, &state.config, &request).await {
        tracing::debug!(payment_id = %payment_id, reason, "Could not alert admin about parked payment");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inconclusive() -> ProbeOutcome {
        ProbeOutcome::Inconclusive {
            detail: "timeout".to_string(),
        }
    }

    #[test]
    fn completed_probe_approves_with_receipt() {
        let action = decide(
            ProbeOutcome::Completed {
                receipt: "SGR7TKIQM0".to_string(),
            },
            0,
            3,
        );
        assert_eq!(
            action,
            ReconcileAction::Approve {
                receipt: "SGR7TKIQM0".to_string()
            }
        );
    }

    #[test]
    fn failed_probe_rejects_with_reason() {
        let action = decide(
            ProbeOutcome::Failed {
                reason: "Request cancelled by user".to_string(),
            },
            5,
            3,
        );
        assert_eq!(
            action,
            ReconcileAction::Reject {
                reason: "Request cancelled by user".to_string()
            }
        );
    }

    #[test]
    fn inconclusive_probe_burns_one_attempt() {
        assert_eq!(
            decide(inconclusive(), 0, 3),
            ReconcileAction::RetryLater { attempts: 1 }
        );
        assert_eq!(
            decide(inconclusive(), 1, 3),
            ReconcileAction::RetryLater { attempts: 2 }
        );
    }

    #[test]
    fn budget_exhaustion_parks_for_review_not_failure() {
        assert_eq!(
            decide(inconclusive(), 2, 3),
            ReconcileAction::FlagForReview { attempts: 3 }
        );
    }

    #[test]
    fn payment_gets_exactly_the_budgeted_number_of_probes() {
        let budget = 3i16;
        let mut attempts = 0i16;
        let mut probes = 0;
        loop {
            probes += 1;
            match decide(inconclusive(), attempts, budget) {
                ReconcileAction::RetryLater { attempts: next } => attempts = next,
                ReconcileAction::FlagForReview { .. } => break,
                other => panic!("unexpected action {other:?}"),
            }
        }
        assert_eq!(probes, 3);
    }

    #[test]
    fn attempt_counter_saturates() {
        assert_eq!(
            decide(inconclusive(), i16::MAX, 6),
            ReconcileAction::FlagForReview { attempts: i16::MAX }
        );
    }
}
