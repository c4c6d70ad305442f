use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

pub const FREQUENCY_SECONDS_MIN: i32 = 15;
pub const FREQUENCY_SECONDS_MAX: i32 = 300;
pub const MAX_RETRIES_MIN: i16 = 1;
pub const MAX_RETRIES_MAX: i16 = 6;
pub const QUERY_TIMEOUT_SECONDS_MIN: i32 = 15;
pub const QUERY_TIMEOUT_SECONDS_MAX: i32 = 120;

pub const DEFAULT_FREQUENCY_SECONDS: i32 = 30;
pub const DEFAULT_MAX_RETRIES: i16 = 3;
pub const DEFAULT_QUERY_TIMEOUT_SECONDS: i32 = 30;

/// Per-organization reconciliation knobs. Bounds are enforced at the write
/// boundary; the accessors clamp anyway so a hand-edited row cannot drive the
/// poller into a hot loop or an unbounded gateway wait.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct BillingSettings {
    pub organization_id: Uuid,
    pub auto_verify_enabled: bool,
    pub auto_verify_frequency_seconds: i32,
    pub max_retries: i16,
    pub query_timeout_seconds: i32,
    pub last_tested_at: Option<DateTime<Utc>>,
    pub last_test_status: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl BillingSettings {
    pub fn defaults(organization_id: Uuid) -> Self {
        Self {
            organization_id,
            auto_verify_enabled: true,
            auto_verify_frequency_seconds: DEFAULT_FREQUENCY_SECONDS,
            max_retries: DEFAULT_MAX_RETRIES,
            query_timeout_seconds: DEFAULT_QUERY_TIMEOUT_SECONDS,
            last_tested_at: None,
            last_test_status: None,
            updated_at: Utc::now(),
        }
    }

    pub fn verify_interval(&self) -> Duration {
        let seconds = self
            .auto_verify_frequency_seconds
            .clamp(FREQUENCY_SECONDS_MIN, FREQUENCY_SECONDS_MAX);
        Duration::from_secs(seconds as u64)
    }

    pub fn retry_budget(&self) -> i16 {
        self.max_retries.clamp(MAX_RETRIES_MIN, MAX_RETRIES_MAX)
    }

    pub fn query_timeout(&self) -> Duration {
        let seconds = self
            .query_timeout_seconds
            .clamp(QUERY_TIMEOUT_SECONDS_MIN, QUERY_TIMEOUT_SECONDS_MAX);
        Duration::from_secs(seconds as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_sit_inside_the_bounds() {
        let settings = BillingSettings::defaults(Uuid::nil());
        assert!(settings.auto_verify_enabled);
        assert_eq!(settings.verify_interval(), Duration::from_secs(30));
        assert_eq!(settings.retry_budget(), 3);
        assert_eq!(settings.query_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn accessors_clamp_out_of_range_rows() {
        let mut settings = BillingSettings::defaults(Uuid::nil());
        settings.auto_verify_frequency_seconds = 1;
        settings.max_retries = 99;
        settings.query_timeout_seconds = 10_000;

        assert_eq!(settings.verify_interval(), Duration::from_secs(15));
        assert_eq!(settings.retry_budget(), 6);
        assert_eq!(settings.query_timeout(), Duration::from_secs(120));
    }
}
