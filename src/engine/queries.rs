use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::SLOT_STEP_MINUTES;
use crate::model::*;

use super::calendar::resolve_windows;
use super::conflict::{active_spans, appointment_span};
use super::slots::{filter_available, generate_slots};
use super::{Engine, EngineError, SharedProfessionalState};

impl Engine {
    /// Start times on `date` where an appointment of `duration` minutes could
    /// be booked right now. Read-only: concurrent bookings may invalidate any
    /// returned slot by the time the caller acts on it.
    pub async fn available_slots(
        &self,
        professional_id: Ulid,
        date: NaiveDate,
        duration: Minute,
    ) -> Result<Vec<Minute>, EngineError> {
        appointment_span(0, duration)?;
        let ps = match self.get_professional(&professional_id) {
            Some(ps) => ps,
            None => return Ok(vec![]),
        };
        let guard = ps.read().await;

        let windows = resolve_windows(&guard, date);
        if windows.is_empty() {
            return Ok(vec![]);
        }
        let breaks: Vec<TimeSpan> = guard.breaks.iter().map(|b| b.span).collect();
        let candidates = generate_slots(&windows, &breaks, duration, SLOT_STEP_MINUTES);
        Ok(filter_available(&candidates, duration, &active_spans(&guard, date)))
    }

    pub async fn list_professionals(&self) -> Vec<ProfessionalInfo> {
        // Clone the handles out of the map first; awaiting a read lock while
        // holding a DashMap shard guard could deadlock against a writer.
        let entries: Vec<SharedProfessionalState> =
            self.state.iter().map(|entry| entry.value().clone()).collect();
        let mut out = Vec::with_capacity(entries.len());
        for ps in entries {
            let guard = ps.read().await;
            out.push(ProfessionalInfo {
                id: guard.id,
                name: guard.name.clone(),
            });
        }
        out
    }

    pub async fn get_windows(&self, professional_id: Ulid) -> Vec<ScheduleWindow> {
        match self.get_professional(&professional_id) {
            Some(ps) => ps.read().await.windows.clone(),
            None => vec![],
        }
    }

    pub async fn get_breaks(&self, professional_id: Ulid) -> Vec<BreakRule> {
        match self.get_professional(&professional_id) {
            Some(ps) => ps.read().await.breaks.clone(),
            None => vec![],
        }
    }

    pub async fn get_days_off(&self, professional_id: Ulid) -> Vec<DayOff> {
        match self.get_professional(&professional_id) {
            Some(ps) => ps.read().await.days_off.clone(),
            None => vec![],
        }
    }

    /// Appointments for a professional, optionally restricted to one date.
    /// Kept in (date, start) order by construction.
    pub async fn get_appointments(
        &self,
        professional_id: Ulid,
        date: Option<NaiveDate>,
    ) -> Vec<Appointment> {
        let ps = match self.get_professional(&professional_id) {
            Some(ps) => ps,
            None => return vec![],
        };
        let guard = ps.read().await;
        match date {
            Some(d) => guard.appointments_on(d).to_vec(),
            None => guard.appointments.clone(),
        }
    }
}
