use anyhow::Result;
use rusqlite::{params, Row};

use crate::{
    db::{
        connection::Database,
        helpers::{parse_category, to_u32},
    },
    models::Service,
};

fn row_to_service(row: &Row) -> Result<Service> {
    let category: String = row.get("category")?;
    let duration_minutes: i64 = row.get("duration_minutes")?;
    Ok(Service {
        id: row.get("id")?,
        name: row.get("name")?,
        category: parse_category(&category)?,
        duration_minutes: to_u32(duration_minutes, "duration_minutes")?,
        price: row.get("price")?,
        payout: row.get("payout")?,
    })
}

impl Database {
    pub async fn upsert_service(&self, service: &Service) -> Result<()> {
        let record = service.clone();
        self.execute("upsert_service", move |conn| {
            conn.execute(
                "INSERT INTO services (id, name, category, duration_minutes, price, payout)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                     name = excluded.name,
                     category = excluded.category,
                     duration_minutes = excluded.duration_minutes,
                     price = excluded.price,
                     payout = excluded.payout",
                params![
                    record.id,
                    record.name,
                    record.category.as_str(),
                    i64::from(record.duration_minutes),
                    record.price,
                    record.payout,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn list_services(&self) -> Result<Vec<Service>> {
        self.execute("list_services", |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, category, duration_minutes, price, payout
                 FROM services
                 ORDER BY name ASC",
            )?;
            let mut rows = stmt.query([])?;
            let mut services = Vec::new();
            while let Some(row) = rows.next()? {
                services.push(row_to_service(row)?);
            }
            Ok(services)
        })
        .await
    }
}
