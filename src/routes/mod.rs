use axum::{routing::get, Router};

use crate::state::AppState;

pub mod billing_runs;
pub mod health;
pub mod invoices;
pub mod payments;
pub mod settings;
pub mod webhooks;

pub fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .merge(billing_runs::router())
        .merge(invoices::router())
        .merge(payments::router())
        .merge(settings::router())
        .merge(webhooks::router())
}
