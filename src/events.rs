use chrono::{DateTime, Utc};
use log::debug;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::Session;

const EVENT_CAPACITY: usize = 256;

/// State changes a presentation layer re-renders on.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DeskEvent {
    #[serde(rename_all = "camelCase")]
    SessionCreated { session: Session },
    #[serde(rename_all = "camelCase")]
    SessionStarted {
        session_id: String,
        end_time: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    SessionModified { session: Session },
    #[serde(rename_all = "camelCase")]
    SessionDeleted { session_id: String },
    #[serde(rename_all = "camelCase")]
    SessionCompleted { session: Session },
    #[serde(rename_all = "camelCase")]
    CompletionFailed { session_id: String, message: String },
    #[serde(rename_all = "camelCase")]
    TherapistCheckedIn { therapist_id: String },
    #[serde(rename_all = "camelCase")]
    TherapistCheckedOut { therapist_id: String },
    #[serde(rename_all = "camelCase")]
    TherapistFreed { therapist_id: String },
    #[serde(rename_all = "camelCase")]
    RoomFreed { room_id: String },
    #[serde(rename_all = "camelCase")]
    BookingCompleted { booking_id: String },
    #[serde(rename_all = "camelCase")]
    BookingCancelled { booking_id: String },
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DeskEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeskEvent> {
        self.sender.subscribe()
    }

    /// Having no subscribers is fine; the event is dropped.
    pub fn emit(&self, event: DeskEvent) {
        if self.sender.send(event).is_err() {
            debug!("No subscribers for desk event");
        }
    }
}
