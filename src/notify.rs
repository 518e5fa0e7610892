use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// A calendar change on one professional, with a JSON payload in the shape
/// clients receive on their notification channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub professional_id: Ulid,
    pub payload: String,
}

#[derive(Serialize)]
struct Payload<'a> {
    op: &'a str,
    id: String,
}

fn payload_for(event: &Event) -> String {
    let (op, id) = match event {
        Event::ProfessionalCreated { id, .. } => ("professional_created", id),
        Event::ProfessionalRenamed { id, .. } => ("professional_renamed", id),
        Event::ProfessionalDeleted { id } => ("professional_deleted", id),
        Event::WindowAdded { id, .. } => ("window_added", id),
        Event::WindowRemoved { id, .. } => ("window_removed", id),
        Event::BreakAdded { id, .. } => ("break_added", id),
        Event::BreakRemoved { id, .. } => ("break_removed", id),
        Event::DayOffAdded { id, .. } => ("day_off_added", id),
        Event::DayOffRemoved { id, .. } => ("day_off_removed", id),
        Event::AppointmentBooked { id, .. } => ("appointment_booked", id),
        Event::AppointmentStatusChanged { id, .. } => ("appointment_status_changed", id),
    };
    let payload = Payload { op, id: id.to_string() };
    // A struct of two strings cannot fail to serialize
    serde_json::to_string(&payload).unwrap_or_default()
}

/// Broadcast hub for LISTEN/NOTIFY per professional.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Notification>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to notifications for a professional. Creates the channel if needed.
    pub fn subscribe(&self, professional_id: Ulid) -> broadcast::Receiver<Notification> {
        let sender = self
            .channels
            .entry(professional_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, professional_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&professional_id) {
            let _ = sender.send(Notification {
                professional_id,
                payload: payload_for(event),
            });
        }
    }

    /// Remove a channel when the professional is deleted.
    pub fn remove(&self, professional_id: &Ulid) {
        self.channels.remove(professional_id);
    }
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}
