use anyhow::{bail, Result};
use rusqlite::{params, Row};

use crate::{
    db::{
        connection::Database,
        helpers::{ids_from_json, ids_to_json, parse_booking_status, parse_datetime},
    },
    models::{Booking, BookingStatus},
};

fn row_to_booking(row: &Row) -> Result<Booking> {
    let scheduled_at: String = row.get("scheduled_at")?;
    let therapist_ids: String = row.get("therapist_ids")?;
    let status: String = row.get("status")?;
    Ok(Booking {
        id: row.get("id")?,
        customer_name: row.get("customer_name")?,
        service_id: row.get("service_id")?,
        scheduled_at: parse_datetime(&scheduled_at, "scheduled_at")?,
        therapist_ids: ids_from_json(&therapist_ids, "therapist_ids")?,
        room_id: row.get("room_id")?,
        status: parse_booking_status(&status)?,
    })
}

impl Database {
    pub async fn upsert_booking(&self, booking: &Booking) -> Result<()> {
        let record = booking.clone();
        self.execute("upsert_booking", move |conn| {
            conn.execute(
                "INSERT INTO bookings (id, customer_name, service_id, scheduled_at, therapist_ids, room_id, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                     customer_name = excluded.customer_name,
                     service_id = excluded.service_id,
                     scheduled_at = excluded.scheduled_at,
                     therapist_ids = excluded.therapist_ids,
                     room_id = excluded.room_id,
                     status = excluded.status",
                params![
                    record.id,
                    record.customer_name,
                    record.service_id,
                    record.scheduled_at.to_rfc3339(),
                    ids_to_json(&record.therapist_ids)?,
                    record.room_id,
                    record.status.as_str(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn mark_booking_status(&self, booking_id: &str, status: BookingStatus) -> Result<()> {
        let booking_id = booking_id.to_string();
        self.execute("mark_booking_status", move |conn| {
            let rows_affected = conn.execute(
                "UPDATE bookings SET status = ?1 WHERE id = ?2",
                params![status.as_str(), booking_id],
            )?;
            if rows_affected == 0 {
                bail!("Booking {booking_id} not found");
            }
            Ok(())
        })
        .await
    }

    /// Scheduled and in-progress bookings.
    pub async fn list_open_bookings(&self) -> Result<Vec<Booking>> {
        self.execute("list_open_bookings", |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, customer_name, service_id, scheduled_at, therapist_ids, room_id, status
                 FROM bookings
                 WHERE status IN ('Scheduled', 'In Progress')
                 ORDER BY scheduled_at ASC",
            )?;
            let mut rows = stmt.query([])?;
            let mut bookings = Vec::new();
            while let Some(row) = rows.next()? {
                bookings.push(row_to_booking(row)?);
            }
            Ok(bookings)
        })
        .await
    }
}
