//! Raw reading persistence.

use anyhow::Result;
use rusqlite::params;

use crate::detect::Reading;
use crate::storage::Pool;

/// Persist a reading verbatim; returns its row id.
pub fn save(pool: &Pool, reading: &Reading) -> Result<i64> {
    let conn = pool.get()?;
    let fields_json = serde_json::to_string(&reading.fields)?;
    conn.execute(
        "INSERT INTO telemetry (asset_id, timestamp, fields_json) VALUES (?1, ?2, ?3)",
        params![reading.asset_id, reading.timestamp, fields_json],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn count(pool: &Pool) -> Result<i64> {
    let conn = pool.get()?;
    let n = conn.query_row("SELECT COUNT(*) FROM telemetry", [], |row| row.get(0))?;
    Ok(n)
}

/// Readings of one asset in insertion order.
pub fn list_by_asset(pool: &Pool, asset_id: &str) -> Result<Vec<Reading>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT asset_id, timestamp, fields_json FROM telemetry
         WHERE asset_id = ?1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map(params![asset_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut readings = Vec::new();
    for r in rows {
        let (asset_id, timestamp, fields_json) = r?;
        readings.push(Reading {
            asset_id,
            timestamp,
            fields: serde_json::from_str(&fields_json)?,
        });
    }
    Ok(readings)
}
