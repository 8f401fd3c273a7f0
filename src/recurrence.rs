//! Recurrence rules for repeating todos.
//!
//! A rule is stored as a colon-delimited descriptor, `frequency[:interval]`,
//! for example `daily`, `weekly:2` or `monthly:3`.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use time::macros::format_description;
use time::{Date, Duration, Month};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecurrenceError {
    #[error("unknown recurrence frequency: {0}")]
    UnknownFrequency(String),

    #[error("invalid recurrence interval: {0}")]
    InvalidInterval(String),

    #[error("invalid date {0:?}, expected YYYY-MM-DD")]
    InvalidDate(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Frequency {
    pub fn as_str(self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
            Frequency::Yearly => "yearly",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    pub interval: u32,
}

impl RecurrenceRule {
    /// The first occurrence strictly after `date`.
    pub fn next_after(&self, date: Date) -> Date {
        let n = i64::from(self.interval);
        match self.frequency {
            Frequency::Daily => date.saturating_add(Duration::days(n)),
            Frequency::Weekly => date.saturating_add(Duration::weeks(n)),
            Frequency::Monthly => add_months(date, self.interval),
            Frequency::Yearly => add_months(date, self.interval.saturating_mul(12)),
        }
    }
}

impl FromStr for RecurrenceRule {
    type Err = RecurrenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split(':');

        let frequency = match parts.next().unwrap_or_default().to_ascii_lowercase().as_str() {
            "daily" => Frequency::Daily,
            "weekly" => Frequency::Weekly,
            "monthly" => Frequency::Monthly,
            "yearly" => Frequency::Yearly,
            other => return Err(RecurrenceError::UnknownFrequency(other.to_string())),
        };

        let interval = match parts.next() {
            None => 1,
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|n| *n >= 1)
                .ok_or_else(|| RecurrenceError::InvalidInterval(raw.to_string()))?,
        };

        if let Some(extra) = parts.next() {
            return Err(RecurrenceError::InvalidInterval(format!("unexpected segment {extra:?}")));
        }

        Ok(RecurrenceRule {
            frequency,
            interval,
        })
    }
}

impl fmt::Display for RecurrenceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.interval == 1 {
            f.write_str(self.frequency.as_str())
        } else {
            write!(f, "{}:{}", self.frequency.as_str(), self.interval)
        }
    }
}

pub fn parse_date(s: &str) -> Result<Date, RecurrenceError> {
    Date::parse(s.trim(), format_description!("[year]-[month]-[day]"))
        .map_err(|_| RecurrenceError::InvalidDate(s.to_string()))
}

pub fn format_date(date: Date) -> String {
    date.format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_default()
}

// Clamps to the last day of the target month (Jan 31 + 1 month = Feb 28/29).
fn add_months(date: Date, months: u32) -> Date {
    let index = date.year() * 12 + (date.month() as i32 - 1) + months as i32;
    let year = index.div_euclid(12);
    let month = Month::January.nth_next(index.rem_euclid(12) as u8);
    let day = date.day().min(month.length(year));
    Date::from_calendar_date(year, month, day).unwrap_or(date)
}
