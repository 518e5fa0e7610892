//! Conversions between wall-clock strings and day-relative minute offsets.
//! Pure functions, minute resolution only.

use chrono::NaiveDate;

use crate::engine::EngineError;
use crate::limits::MINUTES_PER_DAY;
use crate::model::Minute;

/// Parse a 24-hour `HH:MM` string into minutes since midnight.
/// Accepts a one- or two-digit hour; minutes must be two digits.
pub fn to_minutes(time: &str) -> Result<Minute, EngineError> {
    let invalid = || EngineError::InvalidTime(time.to_string());
    let (h, m) = time.split_once(':').ok_or_else(invalid)?;
    if h.is_empty() || h.len() > 2 || m.len() != 2 {
        return Err(invalid());
    }
    if !h.bytes().all(|b| b.is_ascii_digit()) || !m.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let hours: Minute = h.parse().map_err(|_| invalid())?;
    let minutes: Minute = m.parse().map_err(|_| invalid())?;
    if hours >= 24 || minutes >= 60 {
        return Err(invalid());
    }
    Ok(hours * 60 + minutes)
}

/// Render minutes since midnight as `HH:MM`.
pub fn from_minutes(minute: Minute) -> String {
    debug_assert!((0..MINUTES_PER_DAY).contains(&minute));
    format!("{:02}:{:02}", minute / 60, minute % 60)
}

/// Parse a `YYYY-MM-DD` civil date.
pub fn parse_date(date: &str) -> Result<NaiveDate, EngineError> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| EngineError::InvalidDate(date.to_string()))
}
