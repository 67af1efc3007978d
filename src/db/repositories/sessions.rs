use anyhow::{bail, Result};
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Row};

use crate::{
    db::{
        connection::Database,
        helpers::{
            format_date, ids_from_json, ids_to_json, parse_date, parse_datetime,
            parse_optional_datetime, parse_session_status, to_u32,
        },
    },
    models::{Session, SessionStatusUpdate},
};

const SESSION_COLUMNS: &str = "id, service_id, therapist_ids, room_id, status, start_time, end_time,
     duration_minutes, price, payout, booking_id, business_day, created_at, updated_at";

fn row_to_session(row: &Row) -> Result<Session> {
    let therapist_ids: String = row.get("therapist_ids")?;
    let status: String = row.get("status")?;
    let start_time: Option<String> = row.get("start_time")?;
    let end_time: Option<String> = row.get("end_time")?;
    let duration_minutes: i64 = row.get("duration_minutes")?;
    let business_day: String = row.get("business_day")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(Session {
        id: row.get("id")?,
        service_id: row.get("service_id")?,
        therapist_ids: ids_from_json(&therapist_ids, "therapist_ids")?,
        room_id: row.get("room_id")?,
        status: parse_session_status(&status)?,
        start_time: parse_optional_datetime(start_time, "start_time")?,
        end_time: parse_optional_datetime(end_time, "end_time")?,
        duration_minutes: to_u32(duration_minutes, "duration_minutes")?,
        price: row.get("price")?,
        payout: row.get("payout")?,
        booking_id: row.get("booking_id")?,
        business_day: parse_date(&business_day, "business_day")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

impl Database {
    pub async fn upsert_session(&self, session: &Session) -> Result<()> {
        let record = session.clone();
        self.execute("upsert_session", move |conn| {
            conn.execute(
                "INSERT INTO sessions (id, service_id, therapist_ids, room_id, status, start_time, end_time,
                                       duration_minutes, price, payout, booking_id, business_day, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                 ON CONFLICT(id) DO UPDATE SET
                     service_id = excluded.service_id,
                     therapist_ids = excluded.therapist_ids,
                     room_id = excluded.room_id,
                     status = excluded.status,
                     start_time = excluded.start_time,
                     end_time = excluded.end_time,
                     duration_minutes = excluded.duration_minutes,
                     price = excluded.price,
                     payout = excluded.payout,
                     booking_id = excluded.booking_id,
                     updated_at = excluded.updated_at",
                params![
                    record.id,
                    record.service_id,
                    ids_to_json(&record.therapist_ids)?,
                    record.room_id,
                    record.status.as_str(),
                    record.start_time.map(|dt| dt.to_rfc3339()),
                    record.end_time.map(|dt| dt.to_rfc3339()),
                    i64::from(record.duration_minutes),
                    record.price,
                    record.payout,
                    record.booking_id,
                    format_date(record.business_day),
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn mark_session_status(
        &self,
        session_id: &str,
        update: SessionStatusUpdate,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute("mark_session_status", move |conn| {
            let rows_affected = conn.execute(
                "UPDATE sessions
                 SET status = ?1,
                     end_time = ?2,
                     updated_at = ?3
                 WHERE id = ?4",
                params![
                    update.status.as_str(),
                    update.end_time.map(|dt| dt.to_rfc3339()),
                    Utc::now().to_rfc3339(),
                    session_id,
                ],
            )?;

            if rows_affected == 0 {
                bail!("Session {session_id} not found");
            }
            Ok(())
        })
        .await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let session_id = session_id.to_string();
        self.execute("get_session", move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"
            ))?;

            let mut rows = stmt.query(params![session_id])?;
            let session = match rows.next()? {
                Some(row) => Some(row_to_session(row)?),
                None => None,
            };
            Ok(session)
        })
        .await
    }

    pub async fn list_sessions_for_day(&self, business_day: NaiveDate) -> Result<Vec<Session>> {
        let day = format_date(business_day);
        self.execute("list_sessions_for_day", move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE business_day = ?1
                 ORDER BY created_at ASC"
            ))?;

            let mut rows = stmt.query(params![day])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }

            Ok(sessions)
        })
        .await
    }

    /// Deleting a missing session is not an error.
    pub async fn remove_session(&self, session_id: &str) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute("remove_session", move |conn| {
            conn.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])?;
            Ok(())
        })
        .await
    }
}
