//! Reporting periods.
//!
//! Ranges are half-open `[start, end)` so that consecutive periods tile without
//! overlap and templates can filter with `>= {start_date} AND < {end_date}`.

use std::fmt;
use std::str::FromStr;

use chrono::{Days, NaiveDate};
use serde::Serialize;

use crate::types::{ParameterSet, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DateRange {
    pub start: NaiveDate,
    /// Exclusive.
    pub end: NaiveDate,
}

impl DateRange {
    /// `None` when `end` precedes `start`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// The last `n` days up to and including `today`: `[today - n, today + 1)`.
    pub fn last_n_days(today: NaiveDate, n: u32) -> Self {
        Self {
            start: today
                .checked_sub_days(Days::new(u64::from(n)))
                .unwrap_or(NaiveDate::MIN),
            end: today.succ_opt().unwrap_or(NaiveDate::MAX),
        }
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    /// The window of equal length ending where this one starts.
    pub fn previous(&self) -> Self {
        let len = u64::try_from(self.days()).unwrap_or(0);
        Self {
            start: self
                .start
                .checked_sub_days(Days::new(len))
                .unwrap_or(NaiveDate::MIN),
            end: self.start,
        }
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day < self.end
    }

    /// Set `start_date` / `end_date`.
    pub fn apply(&self, params: &mut ParameterSet) {
        params.insert("start_date", Value::Date(self.start));
        params.insert("end_date", Value::Date(self.end));
    }

    /// Set the current range plus `prev_start_date` / `prev_end_date` for
    /// templates that compare both periods in one statement.
    pub fn apply_with_previous(&self, params: &mut ParameterSet) {
        self.apply(params);
        let prev = self.previous();
        params.insert("prev_start_date", Value::Date(prev.start));
        params.insert("prev_end_date", Value::Date(prev.end));
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}..{}",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }
}

/// Canned look-back windows offered by the dashboard filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DateRangePreset {
    Last7Days,
    Last30Days,
    Last90Days,
    Last180Days,
    Last270Days,
    Last365Days,
}

impl DateRangePreset {
    pub const ALL: [DateRangePreset; 6] = [
        Self::Last7Days,
        Self::Last30Days,
        Self::Last90Days,
        Self::Last180Days,
        Self::Last270Days,
        Self::Last365Days,
    ];

    pub fn days(self) -> u32 {
        match self {
            Self::Last7Days => 7,
            Self::Last30Days => 30,
            Self::Last90Days => 90,
            Self::Last180Days => 180,
            Self::Last270Days => 270,
            Self::Last365Days => 365,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Last7Days => "Last 7 Days",
            Self::Last30Days => "Last 30 Days",
            Self::Last90Days => "Last 90 Days",
            Self::Last180Days => "Last 180 Days",
            Self::Last270Days => "Last 270 Days",
            Self::Last365Days => "Last 365 Days",
        }
    }

    pub fn range(self, today: NaiveDate) -> DateRange {
        DateRange::last_n_days(today, self.days())
    }
}

impl fmt::Display for DateRangePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}d", self.days())
    }
}

/// Accepts `30`, `30d`, or the label (`Last 30 Days`, any case).
impl FromStr for DateRangePreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let days = trimmed
            .strip_suffix(['d', 'D'])
            .unwrap_or(trimmed)
            .parse::<u32>()
            .ok();
        Self::ALL
            .into_iter()
            .find(|p| days == Some(p.days()) || p.label().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| {
                format!(
                    "unknown range '{s}'; expected one of {}",
                    Self::ALL.map(|p| p.to_string()).join(", ")
                )
            })
    }
}
