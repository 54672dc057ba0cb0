//! Calendar components used as retention bucket keys.
//!
//! All components are computed in UTC.

use chrono::{DateTime, Datelike, NaiveDate, Utc};

/// Returns the ISO-8601 `(week-year, week)` of a date.
///
/// The week-year differs from the calendar year around New Year:
/// 2021-01-03 belongs to week 53 of 2020.
pub fn iso_week(date: NaiveDate) -> (i32, u32) {
    let week = date.iso_week();
    (week.year(), week.week())
}

/// Calendar annotation of one snapshot timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calendar {
    /// The original timestamp.
    pub at: DateTime<Utc>,
    /// UTC calendar date.
    pub date: NaiveDate,
    /// ISO week-year.
    pub week_year: i32,
    /// ISO week number (1..=53).
    pub week: u32,
    /// Calendar year.
    pub year: i32,
    /// Calendar month (1..=12).
    pub month: u32,
}

impl Calendar {
    pub fn of(at: DateTime<Utc>) -> Self {
        let date = at.date_naive();
        let (week_year, week) = iso_week(date);
        Self {
            at,
            date,
            week_year,
            week,
            year: date.year(),
            month: date.month(),
        }
    }

    /// Day bucket key.
    pub fn day_key(&self) -> NaiveDate {
        self.date
    }

    /// ISO week bucket key.
    pub fn week_key(&self) -> (i32, u32) {
        (self.week_year, self.week)
    }

    /// Month bucket key.
    pub fn month_key(&self) -> (i32, u32) {
        (self.year, self.month)
    }

    /// Year bucket key.
    pub fn year_key(&self) -> i32 {
        self.year
    }

    /// Day of month (1..=31).
    pub fn day_of_month(&self) -> u32 {
        self.date.day()
    }
}
