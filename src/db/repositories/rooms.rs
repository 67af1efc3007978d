use anyhow::{bail, Result};
use rusqlite::{params, Row};

use crate::{
    db::{connection::Database, helpers::parse_room_status},
    models::{Room, RoomUpdate},
};

fn row_to_room(row: &Row) -> Result<Room> {
    let status: String = row.get("status")?;
    Ok(Room {
        id: row.get("id")?,
        name: row.get("name")?,
        status: parse_room_status(&status)?,
    })
}

impl Database {
    pub async fn upsert_room(&self, room: &Room) -> Result<()> {
        let record = room.clone();
        self.execute("upsert_room", move |conn| {
            conn.execute(
                "INSERT INTO rooms (id, name, status)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET
                     name = excluded.name,
                     status = excluded.status",
                params![record.id, record.name, record.status.as_str()],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn patch_room(&self, room_id: &str, update: RoomUpdate) -> Result<()> {
        let room_id = room_id.to_string();
        self.execute("patch_room", move |conn| {
            let rows_affected = conn.execute(
                "UPDATE rooms SET status = COALESCE(?1, status) WHERE id = ?2",
                params![update.status.map(|status| status.as_str()), room_id],
            )?;

            if rows_affected == 0 {
                bail!("Room {room_id} not found");
            }
            Ok(())
        })
        .await
    }

    pub async fn list_rooms(&self) -> Result<Vec<Room>> {
        self.execute("list_rooms", |conn| {
            let mut stmt = conn.prepare("SELECT id, name, status FROM rooms ORDER BY name ASC")?;
            let mut rows = stmt.query([])?;
            let mut rooms = Vec::new();
            while let Some(row) = rows.next()? {
                rooms.push(row_to_room(row)?);
            }
            Ok(rooms)
        })
        .await
    }
}
