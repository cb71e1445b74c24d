//! Durable incident records: created on OPENED, finalized on CLOSED.

use std::collections::BTreeMap;

use anyhow::Result;
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use tracing::{debug, warn};

use crate::detect::{AlertId, ClosedIncident, OpenedIncident};
use crate::storage::Pool;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncidentRecord {
    pub id: AlertId,
    pub asset_id: String,
    pub incident_type: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub event_count: u32,
    pub max_value: f64,
    pub mean_value: Option<f64>,
    pub details: serde_json::Value,
    pub created_at: String,
}

const SELECT_COLUMNS: &str = "SELECT id, asset_id, incident_type, started_at, ended_at, event_count,
        max_value, mean_value, details_json, created_at FROM incidents";

fn map_row(row: &Row<'_>) -> rusqlite::Result<IncidentRecord> {
    let details: Option<String> = row.get(8)?;
    Ok(IncidentRecord {
        id: row.get(0)?,
        asset_id: row.get(1)?,
        incident_type: row.get(2)?,
        started_at: row.get(3)?,
        ended_at: row.get(4)?,
        event_count: row.get(5)?,
        max_value: row.get(6)?,
        mean_value: row.get(7)?,
        details: details
            .and_then(|d| serde_json::from_str(&d).ok())
            .unwrap_or_default(),
        created_at: row.get(9)?,
    })
}

#[derive(Clone)]
pub struct IncidentStore {
    pool: Pool,
}

impl IncidentStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Insert a record for a newly opened incident and return its id.
    pub fn create_opened(&self, incident: &OpenedIncident) -> Result<AlertId> {
        let conn = self.pool.get()?;
        let details_json = serde_json::to_string(&incident.details)?;

        conn.execute(
            "INSERT INTO incidents (asset_id, incident_type, started_at, event_count,
                 max_value, mean_value, details_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                incident.asset_id,
                incident.incident_type,
                incident.started_at,
                incident.event_count,
                incident.max_value,
                incident.mean_value,
                details_json
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Finalize the record matching a closed incident.
    ///
    /// Uses the attached alert id when present, otherwise the most recent
    /// still-open record for the same asset and incident type. Returns the id
    /// of the updated record, or `None` when nothing matched.
    pub fn close(&self, incident: &ClosedIncident) -> Result<Option<AlertId>> {
        let conn = self.pool.get()?;

        let target = match incident.alert_id {
            Some(id) => Some(id),
            None => {
                debug!(
                    asset_id = %incident.asset_id,
                    incident_type = %incident.incident_type,
                    "closed incident has no alert id, matching latest open record"
                );
                conn.query_row(
                    "SELECT id FROM incidents
                     WHERE asset_id = ?1 AND incident_type = ?2 AND ended_at IS NULL
                     ORDER BY id DESC LIMIT 1",
                    params![incident.asset_id, incident.incident_type],
                    |row| row.get::<_, AlertId>(0),
                )
                .optional()?
            }
        };

        let Some(id) = target else {
            warn!(
                asset_id = %incident.asset_id,
                incident_type = %incident.incident_type,
                "no open incident record to close"
            );
            return Ok(None);
        };

        let changed = conn.execute(
            "UPDATE incidents
             SET ended_at = ?1, event_count = ?2, max_value = ?3, mean_value = ?4,
                 updated_at = datetime('now')
             WHERE id = ?5",
            params![
                incident.ended_at,
                incident.event_count,
                incident.max_value,
                incident.mean_value,
                id
            ],
        )?;

        if changed == 0 {
            warn!(alert_id = id, "incident record vanished before it could be closed");
            return Ok(None);
        }
        Ok(Some(id))
    }

    pub fn get(&self, id: AlertId) -> Result<Option<IncidentRecord>> {
        let conn = self.pool.get()?;
        let record = conn
            .query_row(&format!("{} WHERE id = ?1", SELECT_COLUMNS), params![id], map_row)
            .optional()?;
        Ok(record)
    }

    /// Newest first.
    pub fn list_recent(&self, skip: usize, limit: usize) -> Result<Vec<IncidentRecord>> {
        let conn = self.pool.get()?;
        let sql = format!("{} ORDER BY id DESC LIMIT ?1 OFFSET ?2", SELECT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![limit as i64, skip as i64], map_row)?;

        let mut incidents = Vec::new();
        for r in rows {
            incidents.push(r?);
        }
        Ok(incidents)
    }

    pub fn list_by_asset(&self, asset_id: &str) -> Result<Vec<IncidentRecord>> {
        let conn = self.pool.get()?;
        let sql = format!("{} WHERE asset_id = ?1 ORDER BY id DESC", SELECT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![asset_id], map_row)?;

        let mut incidents = Vec::new();
        for r in rows {
            incidents.push(r?);
        }
        Ok(incidents)
    }

    pub fn count(&self) -> Result<i64> {
        let conn = self.pool.get()?;
        let n = conn.query_row("SELECT COUNT(*) FROM incidents", [], |row| row.get(0))?;
        Ok(n)
    }

    pub fn counts_by_type(&self) -> Result<BTreeMap<String, i64>> {
        let conn = self.pool.get()?;
        let mut stmt =
            conn.prepare("SELECT incident_type, COUNT(*) FROM incidents GROUP BY incident_type")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;

        let mut counts = BTreeMap::new();
        for r in rows {
            let (kind, n) = r?;
            counts.insert(kind, n);
        }
        Ok(counts)
    }
}
