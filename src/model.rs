use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Minutes since local midnight — the only time-of-day type.
/// Valid values are `[0, 1440)`; minute resolution, no seconds.
pub type Minute = i64;

/// Half-open interval `[start, end)` in minutes-of-day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSpan {
    pub start: Minute,
    pub end: Minute,
}

impl TimeSpan {
    pub fn new(start: Minute, end: Minute) -> Self {
        debug_assert!(start < end, "TimeSpan start must be before end");
        Self { start, end }
    }

    pub fn duration_min(&self) -> Minute {
        self.end - self.start
    }

    /// The overlap test used uniformly for breaks, appointments, and windows.
    pub fn overlaps(&self, other: &TimeSpan) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    #[allow(dead_code)]
    pub fn contains_span(&self, other: &TimeSpan) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Day of week, Monday-first. A weekday with no configured windows simply
/// means the professional does not work that day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Weekday {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl Weekday {
    pub fn from_date(date: NaiveDate) -> Self {
        match date.weekday().num_days_from_monday() {
            0 => Weekday::Mon,
            1 => Weekday::Tue,
            2 => Weekday::Wed,
            3 => Weekday::Thu,
            4 => Weekday::Fri,
            5 => Weekday::Sat,
            _ => Weekday::Sun,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "mon" | "monday" => Some(Weekday::Mon),
            "tue" | "tuesday" => Some(Weekday::Tue),
            "wed" | "wednesday" => Some(Weekday::Wed),
            "thu" | "thursday" => Some(Weekday::Thu),
            "fri" | "friday" => Some(Weekday::Fri),
            "sat" | "saturday" => Some(Weekday::Sat),
            "sun" | "sunday" => Some(Weekday::Sun),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Weekday::Mon => "mon",
            Weekday::Tue => "tue",
            Weekday::Wed => "wed",
            Weekday::Thu => "thu",
            Weekday::Fri => "fri",
            Weekday::Sat => "sat",
            Weekday::Sun => "sun",
        }
    }
}

/// Appointment lifecycle. Only blocking statuses occupy calendar time;
/// the rest never count toward conflict checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub fn is_blocking(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Scheduled
                | AppointmentStatus::Confirmed
                | AppointmentStatus::InProgress
        )
    }

    /// Allowed lifecycle transitions. Booking creates Scheduled; everything
    /// after that comes in from the caller via status updates.
    pub fn can_transition_to(&self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        matches!(
            (self, next),
            (Scheduled, Confirmed)
                | (Scheduled, Cancelled)
                | (Scheduled, NoShow)
                | (Confirmed, InProgress)
                | (Confirmed, Completed)
                | (Confirmed, Cancelled)
                | (Confirmed, NoShow)
                | (InProgress, Completed)
        )
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "scheduled" => Some(AppointmentStatus::Scheduled),
            "confirmed" => Some(AppointmentStatus::Confirmed),
            "in_progress" => Some(AppointmentStatus::InProgress),
            "completed" => Some(AppointmentStatus::Completed),
            "cancelled" => Some(AppointmentStatus::Cancelled),
            "no_show" => Some(AppointmentStatus::NoShow),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::InProgress => "in_progress",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no_show",
        }
    }
}

/// One configured work window on one weekday. The windows for a weekday,
/// in insertion order, form that weekday's schedule entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleWindow {
    pub id: Ulid,
    pub weekday: Weekday,
    pub span: TimeSpan,
}

/// A recurring break. Flat list — applies to every work day uniformly,
/// not per-weekday (compatibility with the source data model).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakRule {
    pub id: Ulid,
    pub span: TimeSpan,
}

/// A calendar date on which the professional is fully unavailable,
/// regardless of the weekly schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayOff {
    pub id: Ulid,
    pub date: NaiveDate,
}

/// A booked appointment. Never deleted — only status-transitioned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub date: NaiveDate,
    pub span: TimeSpan,
    pub status: AppointmentStatus,
    pub customer: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProfessionalState {
    pub id: Ulid,
    pub name: Option<String>,
    /// Weekly work windows, insertion order. Not deduped or merged.
    pub windows: Vec<ScheduleWindow>,
    /// Flat break list, applied to every work day.
    pub breaks: Vec<BreakRule>,
    pub days_off: Vec<DayOff>,
    /// All appointments, sorted by `(date, span.start)`.
    pub appointments: Vec<Appointment>,
}

impl ProfessionalState {
    pub fn new(id: Ulid, name: Option<String>) -> Self {
        Self {
            id,
            name,
            windows: Vec::new(),
            breaks: Vec::new(),
            days_off: Vec::new(),
            appointments: Vec::new(),
        }
    }

    /// Work windows configured for a weekday, in the order supplied.
    pub fn windows_for(&self, weekday: Weekday) -> Vec<TimeSpan> {
        self.windows
            .iter()
            .filter(|w| w.weekday == weekday)
            .map(|w| w.span)
            .collect()
    }

    pub fn is_day_off(&self, date: NaiveDate) -> bool {
        self.days_off.iter().any(|d| d.date == date)
    }

    /// Insert an appointment maintaining sort order by (date, start).
    pub fn insert_appointment(&mut self, appt: Appointment) {
        let key = (appt.date, appt.span.start);
        let pos = self
            .appointments
            .binary_search_by_key(&key, |a| (a.date, a.span.start))
            .unwrap_or_else(|e| e);
        self.appointments.insert(pos, appt);
    }

    pub fn appointment_mut(&mut self, id: Ulid) -> Option<&mut Appointment> {
        self.appointments.iter_mut().find(|a| a.id == id)
    }

    /// Appointments on a single date. Binary search skips the rest of the
    /// calendar — the vector is sorted by date first.
    pub fn appointments_on(&self, date: NaiveDate) -> &[Appointment] {
        let lo = self.appointments.partition_point(|a| a.date < date);
        let hi = self.appointments.partition_point(|a| a.date <= date);
        &self.appointments[lo..hi]
    }

    pub fn remove_window(&mut self, id: Ulid) -> Option<ScheduleWindow> {
        let pos = self.windows.iter().position(|w| w.id == id)?;
        Some(self.windows.remove(pos))
    }

    pub fn remove_break(&mut self, id: Ulid) -> Option<BreakRule> {
        let pos = self.breaks.iter().position(|b| b.id == id)?;
        Some(self.breaks.remove(pos))
    }

    pub fn remove_day_off(&mut self, id: Ulid) -> Option<DayOff> {
        let pos = self.days_off.iter().position(|d| d.id == id)?;
        Some(self.days_off.remove(pos))
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ProfessionalCreated {
        id: Ulid,
        name: Option<String>,
    },
    ProfessionalRenamed {
        id: Ulid,
        name: Option<String>,
    },
    ProfessionalDeleted {
        id: Ulid,
    },
    WindowAdded {
        id: Ulid,
        professional_id: Ulid,
        weekday: Weekday,
        span: TimeSpan,
    },
    WindowRemoved {
        id: Ulid,
        professional_id: Ulid,
    },
    BreakAdded {
        id: Ulid,
        professional_id: Ulid,
        span: TimeSpan,
    },
    BreakRemoved {
        id: Ulid,
        professional_id: Ulid,
    },
    DayOffAdded {
        id: Ulid,
        professional_id: Ulid,
        date: NaiveDate,
    },
    DayOffRemoved {
        id: Ulid,
        professional_id: Ulid,
    },
    AppointmentBooked {
        id: Ulid,
        professional_id: Ulid,
        date: NaiveDate,
        span: TimeSpan,
        customer: Option<String>,
    },
    AppointmentStatusChanged {
        id: Ulid,
        professional_id: Ulid,
        status: AppointmentStatus,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfessionalInfo {
    pub id: Ulid,
    pub name: Option<String>,
}
