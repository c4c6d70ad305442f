//! Billing-period arithmetic. A period is always a month-start date; the
//! paid-through cursor on a lease stores the month-start of the last period
//! that is fully settled.

use chrono::{Datelike, Duration, NaiveDate};

/// Days after the period start before rent falls due.
pub const RENT_GRACE_DAYS: i64 = 4;

pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Shift a billing period forward by whole months. The input is normalized to
/// its month start first, so this is total for any date the database can hold.
pub fn add_months(period: NaiveDate, months: u32) -> NaiveDate {
    let base = month_start(period);
    let total = base.year() * 12 + base.month0() as i32 + months as i32;
    NaiveDate::from_ymd_opt(total.div_euclid(12), total.rem_euclid(12) as u32 + 1, 1)
        .unwrap_or(base)
}

pub fn due_date(period_start: NaiveDate) -> NaiveDate {
    period_start + Duration::days(RENT_GRACE_DAYS)
}

/// First period a lease can be billed for. A lease that begins after the 1st
/// of its start month is billed from the following month.
pub fn first_eligible_period(lease_start: NaiveDate) -> NaiveDate {
    if lease_start.day() > 1 {
        add_months(lease_start, 1)
    } else {
        lease_start
    }
}

/// Whether the paid-through cursor already settles the given period.
pub fn cursor_covers(rent_paid_until: Option<NaiveDate>, period_start: NaiveDate) -> bool {
    rent_paid_until.is_some_and(|cursor| month_start(cursor) >= period_start)
}

/// First period a fresh allocation should cover: the current month, or the
/// month after the cursor when the lease is already paid ahead.
pub fn next_uncovered_period(today: NaiveDate, rent_paid_until: Option<NaiveDate>) -> NaiveDate {
    let current = month_start(today);
    match rent_paid_until {
        Some(cursor) => {
            let after_cursor = add_months(cursor, 1);
            if after_cursor > current {
                after_cursor
            } else {
                current
            }
        }
        None => current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn month_start_truncates_day() {
        assert_eq!(month_start(d(2025, 3, 17)), d(2025, 3, 1));
        assert_eq!(month_start(d(2025, 3, 1)), d(2025, 3, 1));
    }

    #[test]
    fn add_months_rolls_over_year() {
        assert_eq!(add_months(d(2025, 11, 1), 1), d(2025, 12, 1));
        assert_eq!(add_months(d(2025, 11, 1), 2), d(2026, 1, 1));
        assert_eq!(add_months(d(2025, 1, 31), 1), d(2025, 2, 1));
        assert_eq!(add_months(d(2025, 6, 1), 0), d(2025, 6, 1));
        assert_eq!(add_months(d(2024, 12, 15), 13), d(2026, 1, 1));
    }

    #[test]
    fn due_date_is_four_days_after_period_start() {
        assert_eq!(due_date(d(2025, 7, 1)), d(2025, 7, 5));
    }

    #[test]
    fn lease_starting_on_the_first_bills_its_start_month() {
        assert_eq!(first_eligible_period(d(2025, 5, 1)), d(2025, 5, 1));
    }

    #[test]
    fn lease_starting_mid_month_bills_from_next_month() {
        assert_eq!(first_eligible_period(d(2025, 5, 15)), d(2025, 6, 1));
        assert_eq!(first_eligible_period(d(2025, 12, 2)), d(2026, 1, 1));
    }

    #[test]
    fn cursor_coverage() {
        assert!(!cursor_covers(None, d(2025, 5, 1)));
        assert!(cursor_covers(Some(d(2025, 5, 1)), d(2025, 5, 1)));
        assert!(cursor_covers(Some(d(2025, 6, 1)), d(2025, 5, 1)));
        assert!(!cursor_covers(Some(d(2025, 4, 1)), d(2025, 5, 1)));
    }

    #[test]
    fn next_uncovered_period_starts_at_current_month_without_cursor() {
        assert_eq!(next_uncovered_period(d(2025, 5, 20), None), d(2025, 5, 1));
    }

    #[test]
    fn next_uncovered_period_skips_past_paid_ahead_cursor() {
        // Paid through July; next allocation starts in August even in May.
        assert_eq!(
            next_uncovered_period(d(2025, 5, 20), Some(d(2025, 7, 1))),
            d(2025, 8, 1)
        );
        // Stale cursor behind today never pulls the allocation backwards.
        assert_eq!(
            next_uncovered_period(d(2025, 5, 20), Some(d(2025, 1, 1))),
            d(2025, 5, 1)
        );
    }
}
