//! Relative time periods ("last week", "this month") used by search and
//! reports, resolved to concrete UTC bounds.

use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::keywords::Tokens;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelativePeriod {
    Today,
    Yesterday,
    ThisWeek,
    LastWeek,
    ThisMonth,
    LastMonth,
}

/// Phrases detected in free text, checked in order (longest first where
/// one phrase contains another).
const PERIOD_PHRASES: &[(&str, RelativePeriod)] = &[
    ("last week", RelativePeriod::LastWeek),
    ("past week", RelativePeriod::LastWeek),
    ("semana passada", RelativePeriod::LastWeek),
    ("this week", RelativePeriod::ThisWeek),
    ("esta semana", RelativePeriod::ThisWeek),
    ("essa semana", RelativePeriod::ThisWeek),
    ("last month", RelativePeriod::LastMonth),
    ("past month", RelativePeriod::LastMonth),
    ("mês passado", RelativePeriod::LastMonth),
    ("this month", RelativePeriod::ThisMonth),
    ("este mês", RelativePeriod::ThisMonth),
    ("esse mês", RelativePeriod::ThisMonth),
    ("yesterday", RelativePeriod::Yesterday),
    ("ontem", RelativePeriod::Yesterday),
    ("today", RelativePeriod::Today),
    ("hoje", RelativePeriod::Today),
];

impl RelativePeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelativePeriod::Today => "today",
            RelativePeriod::Yesterday => "yesterday",
            RelativePeriod::ThisWeek => "this_week",
            RelativePeriod::LastWeek => "last_week",
            RelativePeriod::ThisMonth => "this_month",
            RelativePeriod::LastMonth => "last_month",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace(' ', "_").as_str() {
            "today" => Some(RelativePeriod::Today),
            "yesterday" => Some(RelativePeriod::Yesterday),
            "this_week" => Some(RelativePeriod::ThisWeek),
            "last_week" => Some(RelativePeriod::LastWeek),
            "this_month" => Some(RelativePeriod::ThisMonth),
            "last_month" => Some(RelativePeriod::LastMonth),
            _ => None,
        }
    }

    /// First period phrase mentioned in `message`.
    pub fn detect(message: &str) -> Option<Self> {
        let tokens = Tokens::new(message);
        PERIOD_PHRASES
            .iter()
            .find(|(phrase, _)| tokens.has(phrase))
            .map(|(_, period)| *period)
    }

    /// Inclusive date range. Weeks start on Monday.
    pub fn resolve(&self, today: NaiveDate) -> DateRange {
        let back = |days: u64| today.checked_sub_days(Days::new(days)).unwrap_or(today);
        let weekday = u64::from(today.weekday().num_days_from_monday());
        let month_start = today.with_day(1).unwrap_or(today);
        let (start, end) = match self {
            RelativePeriod::Today => (today, today),
            RelativePeriod::Yesterday => (back(1), back(1)),
            RelativePeriod::ThisWeek => (back(weekday), today),
            RelativePeriod::LastWeek => (back(weekday + 7), back(weekday + 1)),
            RelativePeriod::ThisMonth => (month_start, today),
            RelativePeriod::LastMonth => {
                let last_end = month_start.pred_opt().unwrap_or(month_start);
                (last_end.with_day(1).unwrap_or(last_end), last_end)
            }
        };
        DateRange { start, end }
    }
}

/// Inclusive calendar-date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// The `days` days ending today.
    pub fn last_days(today: NaiveDate, days: u64) -> Self {
        Self {
            start: today
                .checked_sub_days(Days::new(days.saturating_sub(1)))
                .unwrap_or(today),
            end: today,
        }
    }

    /// Start of the first day through the end of the last day, in UTC.
    pub fn utc_bounds(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let from = Utc.from_utc_datetime(&self.start.and_time(NaiveTime::MIN));
        let to_time = NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or(NaiveTime::MIN);
        let to = Utc.from_utc_datetime(&self.end.and_time(to_time));
        (from, to)
    }

    pub fn label(&self) -> String {
        if self.start == self.end {
            self.start.format("%Y-%m-%d").to_string()
        } else {
            format!(
                "{} to {}",
                self.start.format("%Y-%m-%d"),
                self.end.format("%Y-%m-%d")
            )
        }
    }
}
