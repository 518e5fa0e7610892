use chrono::NaiveDate;

use crate::model::{ProfessionalState, TimeSpan, Weekday};

/// Resolve the working windows that apply on a given civil date.
///
/// A day off overrides everything: the professional has no working hours that
/// date regardless of the weekly schedule. Otherwise the windows whose weekday
/// matches the date are returned verbatim, in insertion order — overlapping
/// windows are not merged and gaps are not filled.
pub fn resolve_windows(ps: &ProfessionalState, date: NaiveDate) -> Vec<TimeSpan> {
    if ps.is_day_off(date) {
        return Vec::new();
    }
    ps.windows_for(Weekday::from_date(date))
}
