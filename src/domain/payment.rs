use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "payment_method", rename_all = "snake_case")]
pub enum PaymentMethod {
    Mpesa,
    Card,
    Bank,
    Cash,
    Internal,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::Mpesa => "mpesa",
            PaymentMethod::Card => "card",
            PaymentMethod::Bank => "bank",
            PaymentMethod::Cash => "cash",
            PaymentMethod::Internal => "internal",
        }
    }
}

/// Payment lifecycle. `Verified` and `Failed` are terminal; the only legal
/// moves are out of `Pending`, and every call site goes through
/// [`PaymentStatus::ensure_can_become`] rather than re-checking ad hoc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "payment_status", rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Verified,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Verified => "verified",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    pub fn can_become(self, next: PaymentStatus) -> bool {
        matches!(
            (self, next),
            (PaymentStatus::Pending, PaymentStatus::Verified)
                | (PaymentStatus::Pending, PaymentStatus::Failed)
        )
    }

    pub fn ensure_can_become(self, next: PaymentStatus) -> AppResult<()> {
        if self.can_become(next) {
            Ok(())
        } else {
            Err(AppError::Conflict(format!(
                "payment is {} and cannot become {}",
                self.as_str(),
                next.as_str()
            )))
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub invoice_id: Option<Uuid>,
    pub lease_id: Option<Uuid>,
    pub organization_id: Uuid,
    pub tenant_user_id: Option<Uuid>,
    pub amount_paid: f64,
    pub payment_method: PaymentMethod,
    pub status: PaymentStatus,
    pub months_paid: i32,
    pub gateway_request_id: Option<String>,
    pub external_reference: Option<String>,
    pub verify_attempts: i16,
    pub needs_review: bool,
    pub notes: Option<String>,
    pub failure_reason: Option<String>,
    pub verified_by: Option<Uuid>,
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_can_reach_both_terminals() {
        assert!(PaymentStatus::Pending.can_become(PaymentStatus::Verified));
        assert!(PaymentStatus::Pending.can_become(PaymentStatus::Failed));
    }

    #[test]
    fn terminal_states_are_sticky() {
        for terminal in [PaymentStatus::Verified, PaymentStatus::Failed] {
            assert!(terminal.is_terminal());
            for next in [
                PaymentStatus::Pending,
                PaymentStatus::Verified,
                PaymentStatus::Failed,
            ] {
                assert!(!terminal.can_become(next));
            }
        }
    }

    #[test]
    fn transition_refusal_is_a_conflict() {
        let err = PaymentStatus::Verified
            .ensure_can_become(PaymentStatus::Failed)
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }
}
