use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum BookingStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Scheduled => "Scheduled",
            BookingStatus::InProgress => "In Progress",
            BookingStatus::Completed => "Completed",
            BookingStatus::Cancelled => "Cancelled",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, BookingStatus::Scheduled | BookingStatus::InProgress)
    }
}

/// A future-dated reservation; starting it produces a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: String,
    pub customer_name: String,
    pub service_id: String,
    pub scheduled_at: DateTime<Utc>,
    pub therapist_ids: Vec<String>,
    pub room_id: Option<String>,
    pub status: BookingStatus,
}
