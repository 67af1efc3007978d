use std::convert::TryFrom;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};

use crate::models::{BookingStatus, RoomStatus, ServiceCategory, SessionStatus, TherapistStatus};

pub fn to_u32(value: i64, field: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| anyhow!("{field} contains out-of-range value {value}"))
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_optional_datetime(
    value: Option<String>,
    field: &str,
) -> Result<Option<DateTime<Utc>>> {
    match value {
        Some(raw) => parse_datetime(&raw, field).map(Some),
        None => Ok(None),
    }
}

pub fn parse_date(value: &str, field: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").with_context(|| format!("failed to parse {field}"))
}

pub fn format_date(value: NaiveDate) -> String {
    value.format("%Y-%m-%d").to_string()
}

pub fn ids_to_json(ids: &[String]) -> Result<String> {
    serde_json::to_string(ids).context("failed to encode id list")
}

pub fn ids_from_json(value: &str, field: &str) -> Result<Vec<String>> {
    serde_json::from_str(value).with_context(|| format!("failed to parse {field}"))
}

pub fn parse_session_status(value: &str) -> Result<SessionStatus> {
    match value {
        "Ready" => Ok(SessionStatus::Ready),
        "In Progress" => Ok(SessionStatus::InProgress),
        "Completed" => Ok(SessionStatus::Completed),
        other => Err(anyhow!("unknown session status {other}")),
    }
}

pub fn parse_therapist_status(value: &str) -> Result<TherapistStatus> {
    match value {
        "Available" => Ok(TherapistStatus::Available),
        "In Session" => Ok(TherapistStatus::InSession),
        "Checked Out" => Ok(TherapistStatus::CheckedOut),
        other => Err(anyhow!("unknown therapist status {other}")),
    }
}

pub fn parse_room_status(value: &str) -> Result<RoomStatus> {
    match value {
        "Available" => Ok(RoomStatus::Available),
        "Occupied" => Ok(RoomStatus::Occupied),
        other => Err(anyhow!("unknown room status {other}")),
    }
}

pub fn parse_booking_status(value: &str) -> Result<BookingStatus> {
    match value {
        "Scheduled" => Ok(BookingStatus::Scheduled),
        "In Progress" => Ok(BookingStatus::InProgress),
        "Completed" => Ok(BookingStatus::Completed),
        "Cancelled" => Ok(BookingStatus::Cancelled),
        other => Err(anyhow!("unknown booking status {other}")),
    }
}

pub fn parse_category(value: &str) -> Result<ServiceCategory> {
    match value {
        "Single" => Ok(ServiceCategory::Single),
        "Dual" => Ok(ServiceCategory::Dual),
        other => Err(anyhow!("unknown service category {other}")),
    }
}
