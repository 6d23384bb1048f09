//! Event date resolution.
//!
//! Turns a recurring-event descriptor (a birthday, a named holiday or a custom date) into
//! the next concrete occurrence on or after a reference day. Everything here is pure:
//! no clock, no database, and malformed input yields `None` instead of an error.

use chrono::{Datelike, NaiveDate, Weekday};
use std::str::FromStr;

/// Kind of recurring event a gifting rule is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateType {
    /// Yearly anniversary of a date of birth
    Birthday,
    /// Named fixed or floating holiday
    Holiday,
    /// User supplied date, yearly (`MM-DD`) or one-off (`YYYY-MM-DD`)
    Custom,
}

impl DateType {
    /// Database representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Birthday => "birthday",
            Self::Holiday => "holiday",
            Self::Custom => "custom",
        }
    }
}

impl FromStr for DateType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "birthday" => Ok(Self::Birthday),
            "holiday" => Ok(Self::Holiday),
            "custom" => Ok(Self::Custom),
            other => Err(format!("unknown date type '{other}'")),
        }
    }
}

/// How a holiday's date is computed for a given year.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HolidayRule {
    /// Same month and day every year
    Fixed {
        /// Month (1-12)
        month: u32,
        /// Day of month
        day: u32,
    },
    /// The `nth` occurrence of `weekday` in `month`, e.g. 2nd Sunday of May
    NthWeekday {
        /// Month (1-12)
        month: u32,
        /// Weekday to count
        weekday: Weekday,
        /// Occurrence, starting at 1
        nth: u8,
    },
    /// The last occurrence of `weekday` in `month`
    LastWeekday {
        /// Month (1-12)
        month: u32,
        /// Weekday to find
        weekday: Weekday,
    },
}

const HOLIDAYS: &[(&str, HolidayRule)] = &[
    ("new_years_day", HolidayRule::Fixed { month: 1, day: 1 }),
    ("valentines_day", HolidayRule::Fixed { month: 2, day: 14 }),
    ("st_patricks_day", HolidayRule::Fixed { month: 3, day: 17 }),
    ("independence_day", HolidayRule::Fixed { month: 7, day: 4 }),
    ("halloween", HolidayRule::Fixed { month: 10, day: 31 }),
    ("christmas_eve", HolidayRule::Fixed { month: 12, day: 24 }),
    ("christmas", HolidayRule::Fixed { month: 12, day: 25 }),
    ("new_years_eve", HolidayRule::Fixed { month: 12, day: 31 }),
    (
        "mothers_day",
        HolidayRule::NthWeekday {
            month: 5,
            weekday: Weekday::Sun,
            nth: 2,
        },
    ),
    (
        "fathers_day",
        HolidayRule::NthWeekday {
            month: 6,
            weekday: Weekday::Sun,
            nth: 3,
        },
    ),
    (
        "thanksgiving",
        HolidayRule::NthWeekday {
            month: 11,
            weekday: Weekday::Thu,
            nth: 4,
        },
    ),
    (
        "labor_day",
        HolidayRule::NthWeekday {
            month: 9,
            weekday: Weekday::Mon,
            nth: 1,
        },
    ),
    (
        "memorial_day",
        HolidayRule::LastWeekday {
            month: 5,
            weekday: Weekday::Mon,
        },
    ),
];

/// Normalizes a holiday name: `"Mother's Day"` and `"mothers-day"` both become `mothers_day`.
fn normalize_key(key: &str) -> String {
    key.trim()
        .to_ascii_lowercase()
        .chars()
        .filter(|c| *c != '\'')
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}

/// Looks up the rule for a holiday key.
#[must_use]
pub fn holiday_rule(key: &str) -> Option<HolidayRule> {
    let normalized = normalize_key(key);
    HOLIDAYS
        .iter()
        .find(|(name, _)| *name == normalized)
        .map(|(_, rule)| *rule)
}

/// Computes a holiday's date in a specific year.
#[must_use]
pub fn holiday_in_year(rule: HolidayRule, year: i32) -> Option<NaiveDate> {
    match rule {
        HolidayRule::Fixed { month, day } => NaiveDate::from_ymd_opt(year, month, day),
        HolidayRule::NthWeekday {
            month,
            weekday,
            nth,
        } => NaiveDate::from_weekday_of_month_opt(year, month, weekday, nth),
        HolidayRule::LastWeekday { month, weekday } => {
            NaiveDate::from_weekday_of_month_opt(year, month, weekday, 5)
                .or_else(|| NaiveDate::from_weekday_of_month_opt(year, month, weekday, 4))
        }
    }
}

/// Parses `MM-DD` or `YYYY-MM-DD` into a month and day.
#[must_use]
pub fn parse_month_day(raw: &str) -> Option<(u32, u32)> {
    let trimmed = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some((date.month(), date.day()));
    }

    let (month, day) = trimmed.split_once('-')?;
    let month: u32 = month.parse().ok()?;
    let day: u32 = day.parse().ok()?;
    // 2000 is a leap year, so Feb 29 is accepted here
    NaiveDate::from_ymd_opt(2000, month, day)?;
    Some((month, day))
}

/// Date of an anniversary in `year`; Feb 29 falls back to Feb 28 outside leap years.
fn anniversary_in(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day).or_else(|| {
        if month == 2 && day == 29 {
            NaiveDate::from_ymd_opt(year, 2, 28)
        } else {
            None
        }
    })
}

/// Next anniversary of `dob` on or after `reference`.
///
/// Returns this year's date when it has not passed yet, otherwise next year's.
#[must_use]
pub fn resolve_birthday(dob: &str, reference: NaiveDate) -> Option<NaiveDate> {
    let (month, day) = parse_month_day(dob)?;
    let this_year = anniversary_in(reference.year(), month, day)?;
    if this_year >= reference {
        Some(this_year)
    } else {
        anniversary_in(reference.year().checked_add(1)?, month, day)
    }
}

/// Next occurrence of the holiday named `key` on or after `reference`.
#[must_use]
pub fn resolve_holiday(key: &str, reference: NaiveDate) -> Option<NaiveDate> {
    let rule = holiday_rule(key)?;
    next_holiday_from(rule, reference.year(), reference, 1)
}

fn next_holiday_from(
    rule: HolidayRule,
    year: i32,
    reference: NaiveDate,
    remaining: u8,
) -> Option<NaiveDate> {
    let candidate = holiday_in_year(rule, year)?;
    if candidate >= reference {
        return Some(candidate);
    }
    if remaining == 0 {
        return None;
    }
    next_holiday_from(rule, year.checked_add(1)?, reference, remaining - 1)
}

/// Next occurrence of a custom date. `MM-DD` recurs yearly; a full `YYYY-MM-DD`
/// date is a one-off and resolves to `None` once it has passed.
#[must_use]
pub fn resolve_custom(date: &str, reference: NaiveDate) -> Option<NaiveDate> {
    match NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d") {
        Ok(one_off) => (one_off >= reference).then_some(one_off),
        Err(_) => resolve_birthday(date, reference),
    }
}

/// Resolves any event descriptor.
///
/// `event_date` is used for birthdays and custom dates, `holiday_key` for holidays.
#[must_use]
pub fn resolve_event(
    date_type: DateType,
    event_date: Option<&str>,
    holiday_key: Option<&str>,
    reference: NaiveDate,
) -> Option<NaiveDate> {
    match date_type {
        DateType::Birthday => resolve_birthday(event_date?, reference),
        DateType::Holiday => resolve_holiday(holiday_key?, reference),
        DateType::Custom => resolve_custom(event_date?, reference),
    }
}
