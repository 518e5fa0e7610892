use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::{RwLock, oneshot};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::calendar::resolve_windows;
use super::conflict::{appointment_span, check_no_conflict, validate_day_span};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    pub async fn create_professional(
        &self,
        id: Ulid,
        name: Option<String>,
    ) -> Result<(), EngineError> {
        if self.state.len() >= MAX_PROFESSIONALS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many professionals"));
        }
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("professional name too long"));
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::ProfessionalCreated { id, name: name.clone() };
        self.wal_append(&event).await?;
        let ps = ProfessionalState::new(id, name);
        self.state.insert(id, Arc::new(RwLock::new(ps)));
        self.notify.send(id, &event);
        Ok(())
    }

    pub async fn rename_professional(
        &self,
        id: Ulid,
        name: Option<String>,
    ) -> Result<(), EngineError> {
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("professional name too long"));
        }
        let ps = self.get_professional(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = ps.write().await;

        let event = Event::ProfessionalRenamed { id, name };
        self.persist_and_apply(id, &mut guard, &event).await
    }

    pub async fn delete_professional(&self, id: Ulid) -> Result<(), EngineError> {
        let ps = self.get_professional(&id).ok_or(EngineError::NotFound(id))?;

        let event = Event::ProfessionalDeleted { id };
        self.wal_append(&event).await?;
        let guard = ps.read().await;
        for a in &guard.appointments {
            self.entity_to_professional.remove(&a.id);
        }
        for w in &guard.windows {
            self.entity_to_professional.remove(&w.id);
        }
        for b in &guard.breaks {
            self.entity_to_professional.remove(&b.id);
        }
        for d in &guard.days_off {
            self.entity_to_professional.remove(&d.id);
        }
        drop(guard);
        self.state.remove(&id);
        self.notify.send(id, &event);
        self.notify.remove(&id);
        Ok(())
    }

    pub async fn add_window(
        &self,
        id: Ulid,
        professional_id: Ulid,
        weekday: Weekday,
        span: TimeSpan,
    ) -> Result<(), EngineError> {
        validate_day_span(&span)?;
        let ps = self
            .get_professional(&professional_id)
            .ok_or(EngineError::NotFound(professional_id))?;
        let mut guard = ps.write().await;
        if guard.windows.len() >= MAX_WINDOWS_PER_PROFESSIONAL {
            return Err(EngineError::LimitExceeded("too many work windows"));
        }

        let event = Event::WindowAdded { id, professional_id, weekday, span };
        self.persist_and_apply(professional_id, &mut guard, &event).await
    }

    pub async fn remove_window(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (professional_id, mut guard) = self.resolve_entity_write(&id).await?;
        if !guard.windows.iter().any(|w| w.id == id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::WindowRemoved { id, professional_id };
        self.persist_and_apply(professional_id, &mut guard, &event).await?;
        Ok(professional_id)
    }

    pub async fn add_break(
        &self,
        id: Ulid,
        professional_id: Ulid,
        span: TimeSpan,
    ) -> Result<(), EngineError> {
        validate_day_span(&span)?;
        let ps = self
            .get_professional(&professional_id)
            .ok_or(EngineError::NotFound(professional_id))?;
        let mut guard = ps.write().await;
        if guard.breaks.len() >= MAX_BREAKS_PER_PROFESSIONAL {
            return Err(EngineError::LimitExceeded("too many breaks"));
        }

        let event = Event::BreakAdded { id, professional_id, span };
        self.persist_and_apply(professional_id, &mut guard, &event).await
    }

    pub async fn remove_break(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (professional_id, mut guard) = self.resolve_entity_write(&id).await?;
        if !guard.breaks.iter().any(|b| b.id == id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::BreakRemoved { id, professional_id };
        self.persist_and_apply(professional_id, &mut guard, &event).await?;
        Ok(professional_id)
    }

    pub async fn add_day_off(
        &self,
        id: Ulid,
        professional_id: Ulid,
        date: NaiveDate,
    ) -> Result<(), EngineError> {
        let ps = self
            .get_professional(&professional_id)
            .ok_or(EngineError::NotFound(professional_id))?;
        let mut guard = ps.write().await;
        if guard.days_off.len() >= MAX_DAYS_OFF_PER_PROFESSIONAL {
            return Err(EngineError::LimitExceeded("too many days off"));
        }

        let event = Event::DayOffAdded { id, professional_id, date };
        self.persist_and_apply(professional_id, &mut guard, &event).await
    }

    pub async fn remove_day_off(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (professional_id, mut guard) = self.resolve_entity_write(&id).await?;
        if !guard.days_off.iter().any(|d| d.id == id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::DayOffRemoved { id, professional_id };
        self.persist_and_apply(professional_id, &mut guard, &event).await?;
        Ok(professional_id)
    }

    /// Book an appointment. The conflict check and the WAL append happen under
    /// the professional's write lock, so of any set of concurrent requests for
    /// overlapping time at most one can commit.
    pub async fn book_appointment(
        &self,
        id: Ulid,
        professional_id: Ulid,
        date: NaiveDate,
        start: Minute,
        duration: Minute,
        customer: Option<String>,
    ) -> Result<(), EngineError> {
        let span = appointment_span(start, duration)?;
        if let Some(ref c) = customer
            && c.len() > MAX_CUSTOMER_LEN
        {
            return Err(EngineError::LimitExceeded("customer name too long"));
        }
        if date < self.today() {
            return Err(EngineError::PastDate(date));
        }

        let ps = self
            .get_professional(&professional_id)
            .ok_or(EngineError::NotFound(professional_id))?;
        let mut guard = ps.write().await;
        if guard.appointments.len() >= MAX_APPOINTMENTS_PER_PROFESSIONAL {
            return Err(EngineError::LimitExceeded("too many appointments"));
        }

        if resolve_windows(&guard, date).is_empty() {
            metrics::counter!(crate::observability::BOOKING_REJECTED_TOTAL, "reason" => "unavailable")
                .increment(1);
            return Err(EngineError::Unavailable(date));
        }
        if let Err(e) = check_no_conflict(&guard, date, span) {
            metrics::counter!(crate::observability::BOOKING_REJECTED_TOTAL, "reason" => "conflict")
                .increment(1);
            return Err(e);
        }

        let event = Event::AppointmentBooked { id, professional_id, date, span, customer };
        self.persist_and_apply(professional_id, &mut guard, &event).await
    }

    /// Drive an appointment through its lifecycle. Rejected transitions leave
    /// the appointment untouched.
    pub async fn set_appointment_status(
        &self,
        id: Ulid,
        status: AppointmentStatus,
    ) -> Result<Ulid, EngineError> {
        let (professional_id, mut guard) = self.resolve_entity_write(&id).await?;
        let current = guard
            .appointment_mut(id)
            .ok_or(EngineError::NotFound(id))?
            .status;
        if !current.can_transition_to(status) {
            return Err(EngineError::InvalidTransition { from: current, to: status });
        }

        let event = Event::AppointmentStatusChanged { id, professional_id, status };
        self.persist_and_apply(professional_id, &mut guard, &event).await?;
        Ok(professional_id)
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        let professional_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        for id in professional_ids {
            let entry = match self.state.get(&id) {
                Some(e) => e,
                None => continue,
            };
            let ps = entry.value().clone();
            let guard = ps.read().await;

            events.push(Event::ProfessionalCreated {
                id: guard.id,
                name: guard.name.clone(),
            });
            for w in &guard.windows {
                events.push(Event::WindowAdded {
                    id: w.id,
                    professional_id: guard.id,
                    weekday: w.weekday,
                    span: w.span,
                });
            }
            for b in &guard.breaks {
                events.push(Event::BreakAdded {
                    id: b.id,
                    professional_id: guard.id,
                    span: b.span,
                });
            }
            for d in &guard.days_off {
                events.push(Event::DayOffAdded {
                    id: d.id,
                    professional_id: guard.id,
                    date: d.date,
                });
            }
            for a in &guard.appointments {
                events.push(Event::AppointmentBooked {
                    id: a.id,
                    professional_id: guard.id,
                    date: a.date,
                    span: a.span,
                    customer: a.customer.clone(),
                });
                if a.status != AppointmentStatus::Scheduled {
                    events.push(Event::AppointmentStatusChanged {
                        id: a.id,
                        professional_id: guard.id,
                        status: a.status,
                    });
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
