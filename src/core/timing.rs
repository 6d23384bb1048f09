//! Shared timing helpers.
//!
//! Every "is it time yet" decision in the pipeline goes through these functions so that
//! a simulated run date and the configured lead times are applied the same way by the
//! orchestrator, the approval service and the order processor.

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::Deserialize;

/// Per-invocation options accepted by every batch job.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RunOptions {
    /// Replaces the wall clock's date for every comparison in the run
    #[serde(default)]
    pub simulated_date: Option<NaiveDate>,
}

impl RunOptions {
    /// Options for a run pinned to `date`.
    #[must_use]
    pub const fn simulated(date: NaiveDate) -> Self {
        Self {
            simulated_date: Some(date),
        }
    }

    /// Whether this run replays a simulated date.
    #[must_use]
    pub const fn is_simulated(&self) -> bool {
        self.simulated_date.is_some()
    }

    /// The date the run treats as "today".
    #[must_use]
    pub fn today(&self) -> NaiveDate {
        self.simulated_date
            .unwrap_or_else(|| Utc::now().date_naive())
    }

    /// The instant the run treats as "now": the simulated date at the current time of day.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        let now = Utc::now();
        self.simulated_date
            .map_or(now, |date| date.and_time(now.time()).and_utc())
    }
}

/// Whole days from `today` until `date`; negative once `date` has passed.
#[must_use]
pub fn days_until(date: NaiveDate, today: NaiveDate) -> i64 {
    date.signed_duration_since(today).num_days()
}

/// The first day an action with `lead_days` lead time may run for `date`.
#[must_use]
pub fn ready_on(date: NaiveDate, lead_days: i64) -> NaiveDate {
    TimeDelta::try_days(lead_days)
        .and_then(|lead| date.checked_sub_signed(lead))
        .unwrap_or(NaiveDate::MIN)
}

/// Whether an action with `lead_days` lead time is due for `date` on `today`.
#[must_use]
pub fn is_ready(date: NaiveDate, lead_days: i64, today: NaiveDate) -> bool {
    ready_on(date, lead_days) <= today
}

/// Date before which a held order must not be submitted for shipping.
#[must_use]
pub fn hold_until(delivery: NaiveDate, shipping_buffer_days: i64) -> NaiveDate {
    ready_on(delivery, shipping_buffer_days)
}

/// Adds whole days, saturating at the calendar bounds.
#[must_use]
pub fn add_days(date: NaiveDate, days: i64) -> NaiveDate {
    TimeDelta::try_days(days)
        .and_then(|delta| date.checked_add_signed(delta))
        .unwrap_or(NaiveDate::MAX)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_days_until() {
        assert_eq!(days_until(date(2025, 3, 10), date(2025, 3, 3)), 7);
        assert_eq!(days_until(date(2025, 3, 10), date(2025, 3, 10)), 0);
        assert_eq!(days_until(date(2025, 3, 10), date(2025, 3, 12)), -2);
    }

    #[test]
    fn test_ready_window_edges() {
        let delivery = date(2025, 3, 10);
        assert!(!is_ready(delivery, 4, date(2025, 3, 5)));
        assert!(is_ready(delivery, 4, date(2025, 3, 6)));
        assert!(is_ready(delivery, 4, date(2025, 3, 9)));
        assert_eq!(hold_until(delivery, 3), date(2025, 3, 7));
    }

    #[test]
    fn test_run_options_simulated_date() {
        let options: RunOptions = serde_json::from_str(r#"{"simulatedDate":"2025-03-03"}"#).unwrap();
        assert!(options.is_simulated());
        assert_eq!(options.today(), date(2025, 3, 3));
        assert_eq!(options.now().date_naive(), date(2025, 3, 3));

        let empty: RunOptions = serde_json::from_str("{}").unwrap();
        assert!(!empty.is_simulated());
    }

    #[test]
    fn test_add_days() {
        assert_eq!(add_days(date(2025, 2, 27), 2), date(2025, 3, 1));
        assert_eq!(add_days(date(2025, 3, 1), -1), date(2025, 2, 28));
    }
}
