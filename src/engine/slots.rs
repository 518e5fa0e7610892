use crate::model::{Minute, TimeSpan};

/// Enumerate candidate start times for an appointment of `duration` minutes.
///
/// Starts are generated per window at `step`-minute increments from the
/// window's opening, keeping a start only while the full appointment fits
/// inside that same window (`start + duration <= window.end`). A candidate
/// overlapping any break is dropped. Windows are processed independently:
/// slots never span from one window into another, and overlapping windows may
/// yield duplicate starts.
pub fn generate_slots(
    windows: &[TimeSpan],
    breaks: &[TimeSpan],
    duration: Minute,
    step: Minute,
) -> Vec<Minute> {
    let mut slots = Vec::new();
    for window in windows {
        let mut start = window.start;
        while start + duration <= window.end {
            let candidate = TimeSpan::new(start, start + duration);
            if !breaks.iter().any(|b| b.overlaps(&candidate)) {
                slots.push(start);
            }
            start += step;
        }
    }
    slots
}

/// Drop candidate starts whose span overlaps any busy span.
pub fn filter_available(candidates: &[Minute], duration: Minute, busy: &[TimeSpan]) -> Vec<Minute> {
    candidates
        .iter()
        .copied()
        .filter(|&start| {
            let span = TimeSpan::new(start, start + duration);
            !busy.iter().any(|b| b.overlaps(&span))
        })
        .collect()
}
