//! Detect-then-persist flow for one reading.
//!
//! 1. Check plausibility limits.
//! 2. Persist the raw reading.
//! 3. Classify it with the shared detector.
//! 4. OPENED: create an incident record and thread its id back into the
//!    detector. CLOSED: finalize the matching record.
//!
//! Steps 2-4 run one request at a time per asset, so records are written in
//! the order the detector produced the events. Different assets still run in
//! parallel. The detector has already advanced when step 4 runs, so a storage
//! failure there leaves the record behind the detector. A later CLOSED without
//! an id falls back to the newest open record for the same asset and type.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::detect::{AlertId, ChannelFault, IncidentDetector, LifecycleEvent, Reading};
use crate::ingest::{IngestError, IngestLimits};
use crate::storage::{telemetry, IncidentStore, Pool};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatedAlert {
    pub alert_id: AlertId,
    pub incident_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub request_id: Uuid,
    pub telemetry_id: i64,
    pub asset_id: String,
    pub alerts_created: Vec<CreatedAlert>,
    pub alerts_updated: Vec<AlertId>,
    pub events: Vec<LifecycleEvent>,
    pub faults: Vec<ChannelFault>,
}

#[derive(Clone)]
pub struct Pipeline {
    detector: Arc<IncidentDetector>,
    store: IncidentStore,
    limits: IngestLimits,
    gates: Arc<parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl Pipeline {
    pub fn new(detector: Arc<IncidentDetector>, pool: Pool, limits: IngestLimits) -> Self {
        Self {
            detector,
            store: IncidentStore::new(pool),
            limits,
            gates: Arc::default(),
        }
    }

    pub fn detector(&self) -> &Arc<IncidentDetector> {
        &self.detector
    }

    pub fn store(&self) -> &IncidentStore {
        &self.store
    }

    pub async fn ingest(&self, reading: Reading) -> Result<IngestReport, IngestError> {
        self.limits.check(&reading)?;

        let request_id = Uuid::new_v4();
        let span = info_span!("ingest", %request_id, asset_id = %reading.asset_id);
        self.ingest_checked(request_id, reading).instrument(span).await
    }

    /// Per-asset turn-taking for detect-then-persist.
    fn gate(&self, asset_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut gates = self.gates.lock();
        gates.entry(asset_id.to_string()).or_default().clone()
    }

    async fn ingest_checked(
        &self,
        request_id: Uuid,
        reading: Reading,
    ) -> Result<IngestReport, IngestError> {
        let gate = self.gate(&reading.asset_id);
        let _turn = gate.lock().await;

        let pool = self.store.pool().clone();
        let row = reading.clone();
        let telemetry_id = tokio::task::spawn_blocking(move || telemetry::save(&pool, &row))
            .await
            .map_err(|e| IngestError::Storage(e.into()))?
            .map_err(IngestError::Storage)?;

        let processed = self.detector.process(&reading);

        let detector = self.detector.clone();
        let store = self.store.clone();
        let events = processed.events.clone();
        let (alerts_created, alerts_updated) =
            tokio::task::spawn_blocking(move || persist_events(&detector, &store, &events))
                .await
                .map_err(|e| IngestError::Storage(e.into()))?
                .map_err(|e| {
                    error!(error = %e, "failed to persist lifecycle events");
                    IngestError::Storage(e)
                })?;

        Ok(IngestReport {
            request_id,
            telemetry_id,
            asset_id: reading.asset_id,
            alerts_created,
            alerts_updated,
            events: processed.events,
            faults: processed.faults,
        })
    }
}

fn persist_events(
    detector: &IncidentDetector,
    store: &IncidentStore,
    events: &[LifecycleEvent],
) -> anyhow::Result<(Vec<CreatedAlert>, Vec<AlertId>)> {
    let mut created = Vec::new();
    let mut updated = Vec::new();

    for event in events {
        match event {
            LifecycleEvent::Opened(opened) => {
                let alert_id = store.create_opened(opened)?;
                detector.attach_alert_id(&opened.asset_id, &opened.incident_type, alert_id);
                info!(alert_id, incident_type = %opened.incident_type, "incident record created");
                created.push(CreatedAlert {
                    alert_id,
                    incident_type: opened.incident_type.clone(),
                });
            }
            LifecycleEvent::Closed(closed) => {
                if let Some(alert_id) = store.close(closed)? {
                    info!(
                        alert_id,
                        incident_type = %closed.incident_type,
                        "incident record closed"
                    );
                    updated.push(alert_id);
                }
            }
        }
    }

    Ok((created, updated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectorConfig;
    use crate::storage::open_pool;

    fn pipeline() -> (tempfile::TempDir, Pipeline) {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_pool(dir.path().join("p.db").to_str().unwrap()).unwrap();
        let detector = Arc::new(DetectorConfig::default().build().unwrap());
        (dir, Pipeline::new(detector, pool, IngestLimits::default()))
    }

    fn reading(ts: &str, temp: f64) -> Reading {
        Reading::new("PKG-7", ts)
            .with("temperatura", temp)
            .with("fuerza_g", 0.4)
            .with("inclinacion", 5.0)
    }

    #[tokio::test]
    async fn test_incident_record_lifecycle() {
        let (_dir, p) = pipeline();

        for (i, t) in [9.0, 9.5, 10.0].iter().enumerate() {
            let report = p.ingest(reading(&format!("t{}", i), *t)).await.unwrap();
            if i < 2 {
                assert!(report.alerts_created.is_empty());
            } else {
                assert_eq!(report.alerts_created.len(), 1);
                assert_eq!(report.alerts_created[0].incident_type, "temperatura_alta");
            }
        }

        let snap = p.detector().inspect("PKG-7").unwrap();
        let alert_id = snap.channels[0].alert_id.unwrap();

        p.ingest(reading("t3", 11.0)).await.unwrap();
        let report = p.ingest(reading("t4", 5.0)).await.unwrap();
        assert_eq!(report.alerts_updated, vec![alert_id]);
        match &report.events[0] {
            LifecycleEvent::Closed(c) => assert_eq!(c.alert_id, Some(alert_id)),
            other => panic!("expected closed, got {:?}", other),
        }

        let rec = p.store().get(alert_id).unwrap().unwrap();
        assert_eq!(rec.started_at, "t0");
        assert_eq!(rec.ended_at.as_deref(), Some("t4"));
        assert_eq!(rec.event_count, 4);
        assert_eq!(rec.max_value, 11.0);
        assert_eq!(rec.mean_value, Some(9.875));
        assert_eq!(telemetry::count(p.store().pool()).unwrap(), 5);
    }

    #[tokio::test]
    async fn test_rejected_reading_is_not_stored() {
        let (_dir, p) = pipeline();
        let err = p.ingest(reading("t0", 80.0)).await.unwrap_err();
        assert!(err.is_rejection());
        assert_eq!(telemetry::count(p.store().pool()).unwrap(), 0);
        assert_eq!(p.detector().asset_count(), 0);
    }

    #[tokio::test]
    async fn test_faults_are_reported() {
        let (_dir, p) = pipeline();
        let partial = Reading::new("PKG-8", "t0").with("temperatura", 9.0);
        let report = p.ingest(partial).await.unwrap();
        assert_eq!(report.faults.len(), 1);
        assert_eq!(report.faults[0].incident_type, "choque");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_leave_no_orphan_records() {
        let (_dir, p) = pipeline();

        let tasks: Vec<_> = (0..60)
            .map(|i| {
                let p = p.clone();
                let temp = if i % 5 == 4 { 4.0 } else { 9.5 };
                tokio::spawn(async move { p.ingest(reading(&format!("t{}", i), temp)).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        p.ingest(reading("final", 4.0)).await.unwrap();

        let records = p.store().list_by_asset("PKG-7").unwrap();
        assert!(!records.is_empty());
        assert!(records.iter().all(|r| r.ended_at.is_some()), "open record left: {:?}", records);
        assert_eq!(telemetry::count(p.store().pool()).unwrap(), 61);
    }
}
