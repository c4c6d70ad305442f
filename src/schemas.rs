use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::domain::payment::{PaymentMethod, PaymentStatus};
use crate::error::AppError;

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

fn default_months_one() -> i32 {
    1
}
fn default_limit_100() -> i64 {
    100
}
fn default_true() -> bool {
    true
}

/// Optional override for the billing-run trigger endpoints. Absent means
/// "today" in the organization's timezone.
#[derive(Debug, Clone, Deserialize)]
pub struct BillingRunInput {
    pub as_of: Option<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreatePaymentInput {
    pub lease_id: Option<Uuid>,
    pub invoice_id: Option<Uuid>,
    #[validate(range(min = 0.01))]
    pub amount_paid: f64,
    pub payment_method: PaymentMethod,
    #[serde(default = "default_months_one")]
    #[validate(range(min = 1, max = 24))]
    pub months_paid: i32,
    /// Gateway transaction id (e.g. an M-Pesa checkout request id); required
    /// for payments the reconciler should chase.
    pub gateway_request_id: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyPaymentInput {
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RejectPaymentInput {
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
}

/// Bounds here mirror the constants in `domain::settings`; the poller clamps
/// again on read, but out-of-range writes are refused outright.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateBillingSettingsInput {
    #[serde(default = "default_true")]
    pub auto_verify_enabled: bool,
    #[validate(range(min = 15, max = 300))]
    pub auto_verify_frequency_seconds: i32,
    #[validate(range(min = 1, max = 6))]
    pub max_retries: i16,
    #[validate(range(min = 15, max = 120))]
    pub query_timeout_seconds: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoicesQuery {
    pub lease_id: Option<Uuid>,
    pub is_paid: Option<bool>,
    #[serde(default)]
    pub overdue: bool,
    #[serde(default = "default_limit_100")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentsQuery {
    pub status: Option<PaymentStatus>,
    pub lease_id: Option<Uuid>,
    pub needs_review: Option<bool>,
    #[serde(default = "default_limit_100")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIdPath {
    pub payment_id: Uuid,
}

pub fn clamp_limit_in_range(limit: i64, minimum: i64, maximum: i64) -> i64 {
    limit.clamp(minimum, maximum)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_input_rejects_out_of_range_frequency() {
        let input = UpdateBillingSettingsInput {
            auto_verify_enabled: true,
            auto_verify_frequency_seconds: 5,
            max_retries: 3,
            query_timeout_seconds: 30,
        };
        assert!(validate_input(&input).is_err());
    }

    #[test]
    fn settings_input_accepts_the_bounds_themselves() {
        for (frequency, retries, timeout) in [(15, 1, 15), (300, 6, 120)] {
            let input = UpdateBillingSettingsInput {
                auto_verify_enabled: false,
                auto_verify_frequency_seconds: frequency,
                max_retries: retries,
                query_timeout_seconds: timeout,
            };
            assert!(validate_input(&input).is_ok());
        }
    }

    #[test]
    fn payment_input_rejects_zero_amounts() {
        let input = CreatePaymentInput {
            lease_id: Some(Uuid::new_v4()),
            invoice_id: None,
            amount_paid: 0.0,
            payment_method: PaymentMethod::Mpesa,
            months_paid: 1,
            gateway_request_id: None,
            notes: None,
        };
        assert!(validate_input(&input).is_err());
    }

    #[test]
    fn reject_input_requires_a_reason() {
        let input = RejectPaymentInput {
            reason: String::new(),
        };
        assert!(validate_input(&input).is_err());
    }
}
