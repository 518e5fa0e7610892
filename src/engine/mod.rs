mod booking;
mod calendar;
mod conflict;
mod error;
mod queries;
mod slots;
#[cfg(test)]
mod tests;

pub use calendar::resolve_windows;
pub use conflict::active_spans;
pub use error::EngineError;
pub use slots::{filter_available, generate_slots};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedProfessionalState = Arc<RwLock<ProfessionalState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

pub struct Engine {
    pub state: DashMap<Ulid, SharedProfessionalState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: entity (window/break/day-off/appointment) id → professional id
    pub(super) entity_to_professional: DashMap<Ulid, Ulid>,
    /// Minutes added to UTC to obtain the tenant's local civil date.
    utc_offset_min: i64,
}

/// Apply an event directly to a ProfessionalState (no locking — caller holds the lock).
fn apply_to_professional(ps: &mut ProfessionalState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::WindowAdded {
            id,
            professional_id,
            weekday,
            span,
        } => {
            ps.windows.push(ScheduleWindow {
                id: *id,
                weekday: *weekday,
                span: *span,
            });
            entity_map.insert(*id, *professional_id);
        }
        Event::WindowRemoved { id, .. } => {
            ps.remove_window(*id);
            entity_map.remove(id);
        }
        Event::BreakAdded {
            id,
            professional_id,
            span,
        } => {
            ps.breaks.push(BreakRule { id: *id, span: *span });
            entity_map.insert(*id, *professional_id);
        }
        Event::BreakRemoved { id, .. } => {
            ps.remove_break(*id);
            entity_map.remove(id);
        }
        Event::DayOffAdded {
            id,
            professional_id,
            date,
        } => {
            ps.days_off.push(DayOff { id: *id, date: *date });
            entity_map.insert(*id, *professional_id);
        }
        Event::DayOffRemoved { id, .. } => {
            ps.remove_day_off(*id);
            entity_map.remove(id);
        }
        Event::AppointmentBooked {
            id,
            professional_id,
            date,
            span,
            customer,
        } => {
            ps.insert_appointment(Appointment {
                id: *id,
                date: *date,
                span: *span,
                status: AppointmentStatus::Scheduled,
                customer: customer.clone(),
            });
            entity_map.insert(*id, *professional_id);
        }
        Event::AppointmentStatusChanged { id, status, .. } => {
            if let Some(appt) = ps.appointment_mut(*id) {
                appt.status = *status;
            }
        }
        Event::ProfessionalRenamed { name, .. } => {
            ps.name = name.clone();
        }
        // Created/Deleted are handled at the DashMap level, not here
        Event::ProfessionalCreated { .. } | Event::ProfessionalDeleted { .. } => {}
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        utc_offset_min: i64,
    ) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            entity_to_professional: DashMap::new(),
            utc_offset_min,
        };

        // Replay events — we're the sole owner of these Arcs, so try_write
        // always succeeds instantly (no contention). Never use blocking_write
        // here because this may run inside an async context (e.g. lazy tenant creation).
        for event in &events {
            match event {
                Event::ProfessionalCreated { id, name } => {
                    let ps = ProfessionalState::new(*id, name.clone());
                    engine.state.insert(*id, Arc::new(RwLock::new(ps)));
                }
                Event::ProfessionalDeleted { id } => {
                    if let Some((_, entry)) = engine.state.remove(id) {
                        let ps = entry.try_read().expect("replay: uncontended read");
                        for a in &ps.appointments {
                            engine.entity_to_professional.remove(&a.id);
                        }
                        for w in &ps.windows {
                            engine.entity_to_professional.remove(&w.id);
                        }
                        for b in &ps.breaks {
                            engine.entity_to_professional.remove(&b.id);
                        }
                        for d in &ps.days_off {
                            engine.entity_to_professional.remove(&d.id);
                        }
                    }
                }
                other => {
                    if let Some(professional_id) = event_professional_id(other)
                        && let Some(entry) = engine.state.get(&professional_id)
                    {
                        let ps_arc = entry.clone();
                        let mut guard = ps_arc.try_write().expect("replay: uncontended write");
                        apply_to_professional(&mut guard, other, &engine.entity_to_professional);
                    }
                }
            }
        }

        Ok(engine)
    }

    /// The tenant's current civil date, derived from the configured UTC offset.
    pub fn today(&self) -> NaiveDate {
        (Utc::now() + Duration::minutes(self.utc_offset_min)).date_naive()
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_professional(&self, id: &Ulid) -> Option<SharedProfessionalState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_professional_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_professional.get(entity_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call. Eliminates the repeated 3-line pattern.
    pub(super) async fn persist_and_apply(
        &self,
        professional_id: Ulid,
        ps: &mut ProfessionalState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_professional(ps, event, &self.entity_to_professional);
        self.notify.send(professional_id, event);
        Ok(())
    }

    /// Lookup entity → professional, get state, acquire write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<ProfessionalState>), EngineError> {
        let professional_id = self
            .get_professional_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let ps = self
            .get_professional(&professional_id)
            .ok_or(EngineError::NotFound(professional_id))?;
        let guard = ps.write_owned().await;
        Ok((professional_id, guard))
    }
}

/// Extract the professional_id from an event (for non-Create/Delete events).
fn event_professional_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::WindowAdded { professional_id, .. }
        | Event::WindowRemoved { professional_id, .. }
        | Event::BreakAdded { professional_id, .. }
        | Event::BreakRemoved { professional_id, .. }
        | Event::DayOffAdded { professional_id, .. }
        | Event::DayOffRemoved { professional_id, .. }
        | Event::AppointmentBooked { professional_id, .. }
        | Event::AppointmentStatusChanged { professional_id, .. } => Some(*professional_id),
        Event::ProfessionalRenamed { id, .. } => Some(*id),
        Event::ProfessionalCreated { .. } | Event::ProfessionalDeleted { .. } => None,
    }
}
