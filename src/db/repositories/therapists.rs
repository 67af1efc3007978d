use anyhow::{bail, Result};
use chrono::NaiveDate;
use rusqlite::{params, Row};

use crate::{
    db::{
        connection::Database,
        helpers::{format_date, ids_from_json, ids_to_json, parse_datetime, parse_therapist_status},
    },
    models::{Therapist, TherapistUpdate},
};

fn row_to_therapist(row: &Row) -> Result<Therapist> {
    let status: String = row.get("status")?;
    let completed_room_ids: String = row.get("completed_room_ids")?;
    let checked_in_at: String = row.get("checked_in_at")?;

    Ok(Therapist {
        id: row.get("id")?,
        name: row.get("name")?,
        status: parse_therapist_status(&status)?,
        completed_room_ids: ids_from_json(&completed_room_ids, "completed_room_ids")?,
        checked_in_at: parse_datetime(&checked_in_at, "checked_in_at")?,
    })
}

impl Database {
    pub async fn upsert_therapist(&self, therapist: &Therapist) -> Result<()> {
        let record = therapist.clone();
        self.execute("upsert_therapist", move |conn| {
            conn.execute(
                "INSERT INTO therapists (id, name, status, completed_room_ids, checked_in_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                     name = excluded.name,
                     status = excluded.status,
                     completed_room_ids = excluded.completed_room_ids,
                     checked_in_at = excluded.checked_in_at",
                params![
                    record.id,
                    record.name,
                    record.status.as_str(),
                    ids_to_json(&record.completed_room_ids)?,
                    record.checked_in_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Applies only the fields present in `update`.
    pub async fn patch_therapist(&self, therapist_id: &str, update: TherapistUpdate) -> Result<()> {
        let therapist_id = therapist_id.to_string();
        self.execute("patch_therapist", move |conn| {
            let completed_room_ids = update
                .completed_room_ids
                .as_deref()
                .map(ids_to_json)
                .transpose()?;

            let rows_affected = conn.execute(
                "UPDATE therapists
                 SET status = COALESCE(?1, status),
                     completed_room_ids = COALESCE(?2, completed_room_ids)
                 WHERE id = ?3",
                params![
                    update.status.map(|status| status.as_str()),
                    completed_room_ids,
                    therapist_id,
                ],
            )?;

            if rows_affected == 0 {
                bail!("Therapist {therapist_id} not found");
            }
            Ok(())
        })
        .await
    }

    /// Therapists checked in on `business_day`.
    pub async fn list_therapists_for_day(&self, business_day: NaiveDate) -> Result<Vec<Therapist>> {
        let day = format_date(business_day);
        self.execute("list_therapists_for_day", move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, status, completed_room_ids, checked_in_at
                 FROM therapists
                 WHERE substr(checked_in_at, 1, 10) = ?1
                 ORDER BY checked_in_at ASC",
            )?;

            let mut rows = stmt.query(params![day])?;
            let mut therapists = Vec::new();
            while let Some(row) = rows.next()? {
                therapists.push(row_to_therapist(row)?);
            }
            Ok(therapists)
        })
        .await
    }
}
