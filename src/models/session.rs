use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    Ready,
    InProgress,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Ready => "Ready",
            SessionStatus::InProgress => "In Progress",
            SessionStatus::Completed => "Completed",
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, SessionStatus::Completed)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One billable service instance tying a service, its therapists and a room
/// together for a business day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub service_id: String,
    pub therapist_ids: Vec<String>,
    pub room_id: String,
    pub status: SessionStatus,
    pub start_time: Option<DateTime<Utc>>,
    /// Scheduled end while running; fixed once completed.
    pub end_time: Option<DateTime<Utc>>,
    pub duration_minutes: u32,
    pub price: f64,
    pub payout: f64,
    pub booking_id: Option<String>,
    pub business_day: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Marks the session running from `now` and returns the scheduled end.
    pub fn begin(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        let end_time = now + Duration::minutes(i64::from(self.duration_minutes));
        self.status = SessionStatus::InProgress;
        self.start_time = Some(now);
        self.end_time = Some(end_time);
        self.updated_at = now;
        end_time
    }

    /// End time recorded when the session completes at `now`.
    ///
    /// Finishing early (or from Ready, with no timer ever armed) stamps `now`;
    /// finishing at or after the scheduled end keeps the schedule.
    pub fn completion_end_time(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.end_time {
            Some(scheduled) if scheduled <= now => scheduled,
            _ => now,
        }
    }
}

/// Payload for `Persistence::update_session_status`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusUpdate {
    pub status: SessionStatus,
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSession {
    pub service_id: String,
    pub therapist_ids: Vec<String>,
    pub room_id: String,
    #[serde(default)]
    pub booking_id: Option<String>,
}

/// Fields staff may change on a Ready or running session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionChanges {
    pub service_id: Option<String>,
    pub therapist_ids: Option<Vec<String>>,
    pub room_id: Option<String>,
}

impl SessionChanges {
    pub fn is_empty(&self) -> bool {
        self.service_id.is_none() && self.therapist_ids.is_none() && self.room_id.is_none()
    }
}

/// Totals over the completed sessions of one business day.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DailySummary {
    pub business_day: Option<NaiveDate>,
    pub completed_sessions: usize,
    pub active_sessions: usize,
    pub revenue: f64,
    pub payouts: f64,
    pub payouts_by_therapist: Vec<TherapistPayout>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TherapistPayout {
    pub therapist_id: String,
    pub sessions: usize,
    pub payout: f64,
}
