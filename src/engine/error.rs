use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{AppointmentStatus, Minute, TimeSpan};

#[derive(Debug)]
pub enum EngineError {
    InvalidTime(String),
    InvalidDate(String),
    InvalidDuration(Minute),
    OutOfDay(TimeSpan),
    PastDate(NaiveDate),
    NotFound(Ulid),
    AlreadyExists(Ulid),
    Unavailable(NaiveDate),
    Conflict(Ulid),
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidTime(s) => write!(f, "invalid time: {s:?} (expected HH:MM)"),
            EngineError::InvalidDate(s) => write!(f, "invalid date: {s:?} (expected YYYY-MM-DD)"),
            EngineError::InvalidDuration(d) => write!(f, "invalid duration: {d} minutes"),
            EngineError::OutOfDay(span) => {
                write!(
                    f,
                    "appointment [{}, {}) does not fit within the day",
                    span.start, span.end
                )
            }
            EngineError::PastDate(date) => write!(f, "cannot book in the past: {date}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Unavailable(date) => {
                write!(f, "professional has no working hours on {date}")
            }
            EngineError::Conflict(id) => write!(f, "conflict with appointment: {id}"),
            EngineError::InvalidTransition { from, to } => {
                write!(
                    f,
                    "invalid status transition: {} -> {}",
                    from.as_str(),
                    to.as_str()
                )
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
