use chrono::NaiveDate;

use super::EngineError;
use crate::limits::{MAX_DURATION_MINUTES, MINUTES_PER_DAY};
use crate::model::{Minute, ProfessionalState, TimeSpan};

/// Validate duration and day bounds, returning the appointment span.
pub(super) fn appointment_span(start: Minute, duration: Minute) -> Result<TimeSpan, EngineError> {
    if duration <= 0 || duration > MAX_DURATION_MINUTES {
        return Err(EngineError::InvalidDuration(duration));
    }
    if start < 0 || start + duration > MINUTES_PER_DAY {
        return Err(EngineError::OutOfDay(TimeSpan {
            start,
            end: start + duration,
        }));
    }
    Ok(TimeSpan::new(start, start + duration))
}

/// Validate a schedule span (window or break): non-empty, inside the day.
pub(super) fn validate_day_span(span: &TimeSpan) -> Result<(), EngineError> {
    if span.start < 0 || span.end > MINUTES_PER_DAY || span.start >= span.end {
        return Err(EngineError::OutOfDay(*span));
    }
    Ok(())
}

/// Spans of the appointments that still block time on `date`.
/// Cancelled, completed and no-show appointments release their span.
pub fn active_spans(ps: &ProfessionalState, date: NaiveDate) -> Vec<TimeSpan> {
    ps.appointments_on(date)
        .iter()
        .filter(|a| a.status.is_blocking())
        .map(|a| a.span)
        .collect()
}

/// Reject `span` if it overlaps any blocking appointment on `date`.
/// Must run under the professional's write lock so the answer stays true
/// until the booking is persisted.
pub(super) fn check_no_conflict(
    ps: &ProfessionalState,
    date: NaiveDate,
    span: TimeSpan,
) -> Result<(), EngineError> {
    for a in ps.appointments_on(date) {
        if a.status.is_blocking() && a.span.overlaps(&span) {
            return Err(EngineError::Conflict(a.id));
        }
    }
    Ok(())
}
