use std::collections::HashMap;

use chrono::{Datelike, Timelike, Utc};
use tokio::time::{sleep, Duration, Instant};
use uuid::Uuid;

use crate::repository::payments;
use crate::services::{
    billing_settings, invoice_generator, overdue, reconciler, reminder_scheduler,
};
use crate::state::AppState;

const TICK_SECONDS: u64 = 15;

/// Long-running billing loop. Every tick it runs whichever per-org reconcile
/// cycles are due by that org's configured frequency, and once per day (at or
/// after the configured hour) it runs the invoice chain: generate, sweep
/// overdue, send reminders, in that order so each step sees the previous
/// one's writes.
pub async fn run_background_scheduler(state: AppState) {
    let Some(pool) = state.db_pool.clone() else {
        tracing::warn!("Background scheduler disabled: database is not configured");
        return;
    };
    tracing::info!("Background scheduler started");

    let mut last_reconcile_runs: HashMap<Uuid, Instant> = HashMap::new();
    let mut last_daily_run: Option<u32> = None;

    loop {
        sleep(Duration::from_secs(TICK_SECONDS)).await;

        // Awaited, not spawned: the next cycle for an org can only start
        // after the previous sweep has finished.
        run_due_reconciliations(&state, &mut last_reconcile_runs).await;

        let now_utc = Utc::now();
        let today = now_utc
            .with_timezone(&state.config.default_org_timezone())
            .date_naive();
        if last_daily_run == Some(today.ordinal()) {
            continue;
        }
        if now_utc.hour() < state.config.billing_run_hour_utc {
            continue;
        }
        last_daily_run = Some(today.ordinal());

        tracing::info!(day = %today, "Scheduler: running daily billing chain");
        let invoices = invoice_generator::generate_invoices(&pool, None, today).await;
        let overdue_sweep = overdue::mark_overdue(&pool, None, today).await;
        let reminders = reminder_scheduler::send_reminders_for_day(&state, None, today).await;
        tracing::info!(
            created = invoices.created,
            overdue_count = overdue_sweep.overdue_count,
            reminders_sent = reminders.reminders_sent,
            "Scheduler: daily billing chain completed"
        );
    }
}

async fn run_due_reconciliations(state: &AppState, last_runs: &mut HashMap<Uuid, Instant>) {
    let Some(pool) = state.db_pool.as_ref() else {
        return;
    };
    let orgs = match payments::orgs_with_reconcilable_payments(pool).await {
        Ok(orgs) => orgs,
        Err(error) => {
            tracing::warn!(error = %error, "Scheduler: could not list organizations for reconciliation");
            return;
        }
    };
    // Orgs with nothing left to reconcile fall out of the pacing map so it
    // cannot grow without bound.
    prune_departed_orgs(last_runs, &orgs);
    if orgs.is_empty() {
        return;
    }
    if !state.config.daraja_configured() {
        tracing::warn!(
            "Scheduler: pending M-Pesa payments exist but gateway credentials are not configured"
        );
        return;
    }

    for organization_id in orgs {
        let org_settings = match billing_settings::effective_settings(state, organization_id).await
        {
            Ok(loaded) => loaded,
            Err(error) => {
                tracing::warn!(org_id = %organization_id, error = %error, "Scheduler: could not load billing settings");
                continue;
            }
        };
        if !org_settings.auto_verify_enabled {
            continue;
        }
        let recently_ran = last_runs
            .get(&organization_id)
            .is_some_and(|started| started.elapsed() < org_settings.verify_interval());
        if recently_ran {
            continue;
        }
        last_runs.insert(organization_id, Instant::now());

        match reconciler::run_reconciliation_sweep(state, Some(organization_id)).await {
            Ok(result) if result.payments_checked > 0 => {
                tracing::info!(
                    org_id = %organization_id,
                    verified = result.verified,
                    failed = result.failed,
                    still_pending = result.still_pending,
                    flagged_for_review = result.flagged_for_review,
                    "Scheduler: reconcile cycle finished"
                );
            }
            Ok(_) => {}
            Err(error) => {
                tracing::warn!(org_id = %organization_id, error = %error, "Scheduler: reconcile cycle failed");
            }
        }
    }
}

fn prune_departed_orgs(last_runs: &mut HashMap<Uuid, Instant>, current: &[Uuid]) {
    last_runs.retain(|org, _| current.contains(org));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pacing_map_forgets_orgs_with_nothing_left_to_reconcile() {
        let staying = Uuid::new_v4();
        let departed = Uuid::new_v4();
        let mut last_runs = HashMap::new();
        last_runs.insert(staying, Instant::now());
        last_runs.insert(departed, Instant::now());

        prune_departed_orgs(&mut last_runs, &[staying]);

        assert_eq!(last_runs.len(), 1);
        assert!(last_runs.contains_key(&staying));
    }

    #[test]
    fn an_empty_reconcilable_set_clears_the_pacing_map() {
        let mut last_runs = HashMap::new();
        last_runs.insert(Uuid::new_v4(), Instant::now());

        prune_departed_orgs(&mut last_runs, &[]);

        assert!(last_runs.is_empty());
    }
}
