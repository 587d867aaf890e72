use chrono::{Datelike, NaiveDate, NaiveTime, Timelike, Weekday};

use crate::limits::*;
use crate::model::Window;

use super::EngineError;

const MINUTES_PER_DAY: i64 = 24 * 60;

/// Expand `[start, end]` into every calendar date it covers, in order.
/// A missing `end` means the single day `start`.
pub fn expand_range(start: NaiveDate, end: Option<NaiveDate>) -> Result<Vec<NaiveDate>, EngineError> {
    let end = end.unwrap_or(start);
    if end < start {
        return Err(EngineError::InvalidRange { start, end });
    }
    if (end - start).num_days() + 1 > MAX_RANGE_DAYS {
        return Err(EngineError::LimitExceeded("date range too long"));
    }
    Ok(start.iter_days().take_while(|d| *d <= end).collect())
}

/// Validate a query window and return its length in days.
pub fn window_days(window: &Window) -> Result<i64, EngineError> {
    if window.to < window.from {
        return Err(EngineError::InvalidRange {
            start: window.from,
            end: window.to,
        });
    }
    let days = (window.to - window.from).num_days() + 1;
    if days > MAX_QUERY_WINDOW_DAYS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(days)
}

/// Hours from `start` to `end`, wrapping past midnight, rounded to two decimals.
/// `22:00 → 06:00` is 8h; equal times are 0h.
pub fn time_diff(start: NaiveTime, end: NaiveTime) -> f64 {
    let minutes = |t: NaiveTime| i64::from(t.hour()) * 60 + i64::from(t.minute());
    let mut diff = minutes(end) - minutes(start);
    if diff < 0 {
        diff += MINUTES_PER_DAY;
    }
    round2(diff as f64 / 60.0)
}

pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

pub fn is_weekday(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Monday–Friday dates inside the window (inclusive).
pub fn weekdays_in(window: &Window) -> u32 {
    window
        .from
        .iter_days()
        .take_while(|d| *d <= window.to)
        .filter(|d| is_weekday(*d))
        .count() as u32
}
