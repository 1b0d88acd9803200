//! Time quantum: how time-scoped writes are bucketed into views.
//!
//! A bit set with a timestamp is written to the standard view plus one view per
//! unit of the frame's quantum (`standard_2017`, `standard_201703`, ...). A
//! `Range()` query unions the smallest set of views that exactly covers the
//! requested window.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Days, Months, NaiveDateTime, TimeDelta, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Name of the view holding every bit regardless of time.
pub const STANDARD_VIEW: &str = "standard";

/// Time granularity of a frame's time views.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeQuantum {
    #[default]
    None,
    Year,
    YearMonth,
    YearMonthDay,
    YearMonthDayHour,
}

impl TimeQuantum {
    /// Wire code.
    pub fn code(self) -> u32 {
        match self {
            TimeQuantum::None => 0,
            TimeQuantum::Year => 1,
            TimeQuantum::YearMonth => 2,
            TimeQuantum::YearMonthDay => 3,
            TimeQuantum::YearMonthDayHour => 4,
        }
    }

    pub fn from_code(code: u32) -> Result<Self> {
        Ok(match code {
            0 => TimeQuantum::None,
            1 => TimeQuantum::Year,
            2 => TimeQuantum::YearMonth,
            3 => TimeQuantum::YearMonthDay,
            4 => TimeQuantum::YearMonthDayHour,
            other => return Err(Error::Protocol(format!("invalid time quantum code {other}"))),
        })
    }

    pub fn has_year(self) -> bool {
        self != TimeQuantum::None
    }

    pub fn has_month(self) -> bool {
        matches!(
            self,
            TimeQuantum::YearMonth | TimeQuantum::YearMonthDay | TimeQuantum::YearMonthDayHour
        )
    }

    pub fn has_day(self) -> bool {
        matches!(self, TimeQuantum::YearMonthDay | TimeQuantum::YearMonthDayHour)
    }

    pub fn has_hour(self) -> bool {
        self == TimeQuantum::YearMonthDayHour
    }

    fn units(self) -> &'static [Unit] {
        match self {
            TimeQuantum::None => &[],
            TimeQuantum::Year => &[Unit::Year],
            TimeQuantum::YearMonth => &[Unit::Year, Unit::Month],
            TimeQuantum::YearMonthDay => &[Unit::Year, Unit::Month, Unit::Day],
            TimeQuantum::YearMonthDayHour => &[Unit::Year, Unit::Month, Unit::Day, Unit::Hour],
        }
    }
}

impl fmt::Display for TimeQuantum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TimeQuantum::None => "",
            TimeQuantum::Year => "Y",
            TimeQuantum::YearMonth => "YM",
            TimeQuantum::YearMonthDay => "YMD",
            TimeQuantum::YearMonthDayHour => "YMDH",
        };
        f.write_str(s)
    }
}

impl FromStr for TimeQuantum {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "" => Ok(TimeQuantum::None),
            "Y" => Ok(TimeQuantum::Year),
            "YM" => Ok(TimeQuantum::YearMonth),
            "YMD" => Ok(TimeQuantum::YearMonthDay),
            "YMDH" => Ok(TimeQuantum::YearMonthDayHour),
            other => Err(Error::ConfigError(format!("invalid time quantum {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Year,
    Month,
    Day,
    Hour,
}

fn view_by_unit(name: &str, t: &NaiveDateTime, unit: Unit) -> String {
    match unit {
        Unit::Year => format!("{name}_{:04}", t.year()),
        Unit::Month => format!("{name}_{:04}{:02}", t.year(), t.month()),
        Unit::Day => format!("{name}_{:04}{:02}{:02}", t.year(), t.month(), t.day()),
        Unit::Hour => format!(
            "{name}_{:04}{:02}{:02}{:02}",
            t.year(),
            t.month(),
            t.day(),
            t.hour()
        ),
    }
}

/// Views a bit written at `t` lands in, one per unit of `q`.
pub fn views_by_time(name: &str, t: DateTime<Utc>, q: TimeQuantum) -> Vec<String> {
    let t = t.naive_utc();
    q.units().iter().map(|u| view_by_unit(name, &t, *u)).collect()
}

/// Minimal set of views covering `[start, end)` at the granularity of `q`.
///
/// Walks up from the start using the finest units until it reaches a boundary
/// of a coarser unit, then walks down using the coarsest unit that still fits
/// before `end`.
pub fn views_by_time_range(
    name: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    q: TimeQuantum,
) -> Vec<String> {
    let end = end.naive_utc();
    let mut t = truncate_to_hour(start.naive_utc());
    let mut results = Vec::new();

    if q.has_hour() || q.has_day() || q.has_month() {
        while t < end {
            if q.has_hour() {
                if !next_day_gte(&t, &end) {
                    break;
                } else if t.hour() != 0 {
                    results.push(view_by_unit(name, &t, Unit::Hour));
                    t += TimeDelta::hours(1);
                    continue;
                }
            }
            if q.has_day() {
                if !next_month_gte(&t, &end) {
                    break;
                } else if t.day() != 1 {
                    results.push(view_by_unit(name, &t, Unit::Day));
                    let Some(next) = t.checked_add_days(Days::new(1)) else { break };
                    t = next;
                    continue;
                }
            }
            if q.has_month() {
                if !next_year_gte(&t, &end) {
                    break;
                } else if t.month() != 1 {
                    results.push(view_by_unit(name, &t, Unit::Month));
                    let Some(next) = t.checked_add_months(Months::new(1)) else { break };
                    t = next;
                    continue;
                }
            }
            // Remaining units are aligned; no more progress upward.
            break;
        }
    }

    while t < end {
        let (unit, next) = if q.has_year() && next_year_gte(&t, &end) {
            (Unit::Year, t.checked_add_months(Months::new(12)))
        } else if q.has_month() && next_month_gte(&t, &end) {
            (Unit::Month, t.checked_add_months(Months::new(1)))
        } else if q.has_day() && next_day_gte(&t, &end) {
            (Unit::Day, t.checked_add_days(Days::new(1)))
        } else if q.has_hour() {
            (Unit::Hour, t.checked_add_signed(TimeDelta::hours(1)))
        } else {
            break;
        };
        results.push(view_by_unit(name, &t, unit));
        match next {
            Some(next) => t = next,
            None => break,
        }
    }

    results
}

fn truncate_to_hour(t: NaiveDateTime) -> NaiveDateTime {
    t.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(t)
}

fn next_year_gte(t: &NaiveDateTime, end: &NaiveDateTime) -> bool {
    match t.checked_add_months(Months::new(12)) {
        Some(next) => next.year() == end.year() || *end > next,
        None => false,
    }
}

fn next_month_gte(t: &NaiveDateTime, end: &NaiveDateTime) -> bool {
    match t.checked_add_months(Months::new(1)) {
        Some(next) => (next.year() == end.year() && next.month() == end.month()) || *end > next,
        None => false,
    }
}

fn next_day_gte(t: &NaiveDateTime, end: &NaiveDateTime) -> bool {
    match t.checked_add_days(Days::new(1)) {
        Some(next) => next.date() == end.date() || *end > next,
        None => false,
    }
}
