use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TherapistStatus {
    Available,
    InSession,
    CheckedOut,
}

impl TherapistStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TherapistStatus::Available => "Available",
            TherapistStatus::InSession => "In Session",
            TherapistStatus::CheckedOut => "Checked Out",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Therapist {
    pub id: String,
    pub name: String,
    pub status: TherapistStatus,
    /// Rooms this therapist has finished a session in today, in order.
    pub completed_room_ids: Vec<String>,
    pub checked_in_at: DateTime<Utc>,
}

/// Partial update sent to `Persistence::update_therapist`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TherapistUpdate {
    pub status: Option<TherapistStatus>,
    pub completed_room_ids: Option<Vec<String>>,
}

impl TherapistUpdate {
    pub fn status(status: TherapistStatus) -> Self {
        Self {
            status: Some(status),
            completed_room_ids: None,
        }
    }
}
