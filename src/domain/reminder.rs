use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "delivery_status", rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
    Cancelled,
}

/// The five-step escalation cadence around an invoice's due date. Stage
/// numbers are what gets persisted; the offsets are relative to the due date
/// (negative = before due).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReminderStage {
    PreDue,
    DueDay,
    Overdue5,
    Overdue7,
    Overdue30,
}

impl ReminderStage {
    pub const ALL: [ReminderStage; 5] = [
        ReminderStage::PreDue,
        ReminderStage::DueDay,
        ReminderStage::Overdue5,
        ReminderStage::Overdue7,
        ReminderStage::Overdue30,
    ];

    pub fn number(self) -> i16 {
        match self {
            ReminderStage::PreDue => 1,
            ReminderStage::DueDay => 2,
            ReminderStage::Overdue5 => 3,
            ReminderStage::Overdue7 => 4,
            ReminderStage::Overdue30 => 5,
        }
    }

    pub fn from_number(number: i16) -> Option<ReminderStage> {
        ReminderStage::ALL
            .into_iter()
            .find(|stage| stage.number() == number)
    }

    /// Days between the invoice's due date and the day this stage fires.
    pub fn offset_days(self) -> i64 {
        match self {
            ReminderStage::PreDue => -3,
            ReminderStage::DueDay => 0,
            ReminderStage::Overdue5 => 5,
            ReminderStage::Overdue7 => 7,
            ReminderStage::Overdue30 => 30,
        }
    }

    /// Stages past the due day only fire for invoices already swept into the
    /// overdue bucket.
    pub fn requires_overdue(self) -> bool {
        self.offset_days() > 0
    }

    /// Due date an invoice must carry for this stage to fire on `as_of`.
    pub fn target_due_date(self, as_of: NaiveDate) -> NaiveDate {
        as_of - Duration::days(self.offset_days())
    }

    pub fn template_key(self) -> &'static str {
        match self {
            ReminderStage::PreDue => "rent_due_soon",
            ReminderStage::DueDay => "rent_due_today",
            ReminderStage::Overdue5 => "rent_overdue_5d",
            ReminderStage::Overdue7 => "rent_overdue_7d",
            ReminderStage::Overdue30 => "rent_overdue_30d",
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ReminderRecord {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub invoice_id: Uuid,
    pub lease_id: Uuid,
    pub reminder_type: String,
    pub stage: i16,
    pub scheduled_for: NaiveDate,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivery_status: DeliveryStatus,
    pub recipient: String,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn stage_numbers_round_trip() {
        for stage in ReminderStage::ALL {
            assert_eq!(ReminderStage::from_number(stage.number()), Some(stage));
        }
        assert_eq!(ReminderStage::from_number(0), None);
        assert_eq!(ReminderStage::from_number(6), None);
    }

    #[test]
    fn pre_due_stage_targets_invoices_due_in_three_days() {
        // Running on July 2 targets invoices due July 5.
        assert_eq!(
            ReminderStage::PreDue.target_due_date(d(2025, 7, 2)),
            d(2025, 7, 5)
        );
    }

    #[test]
    fn overdue_30_crosses_month_boundaries() {
        // 30 days past a July 5 due date lands on August 4.
        assert_eq!(
            ReminderStage::Overdue30.target_due_date(d(2025, 8, 4)),
            d(2025, 7, 5)
        );
        // And past a February due date the rollover still lines up.
        assert_eq!(
            ReminderStage::Overdue30.target_due_date(d(2026, 3, 7)),
            d(2026, 2, 5)
        );
    }

    #[test]
    fn only_post_due_stages_require_the_overdue_bucket() {
        assert!(!ReminderStage::PreDue.requires_overdue());
        assert!(!ReminderStage::DueDay.requires_overdue());
        assert!(ReminderStage::Overdue5.requires_overdue());
        assert!(ReminderStage::Overdue7.requires_overdue());
        assert!(ReminderStage::Overdue30.requires_overdue());
    }

    #[test]
    fn each_run_day_targets_its_own_cohort() {
        // Consecutive run days never select the same due date for a stage,
        // so a cohort missed on its day is not revisited by later runs.
        for stage in ReminderStage::ALL {
            let first = stage.target_due_date(d(2025, 7, 10));
            let next = stage.target_due_date(d(2025, 7, 11));
            assert_eq!(next - first, Duration::days(1));
        }
    }
}
