//! Incident detector: routes readings to per-asset channel state and turns
//! channel edges into lifecycle events.
//!
//! State is a map from asset id to a mutex-guarded [`AssetState`]. Calls for
//! the same asset are serialized on that asset's mutex while calls for
//! different assets run in parallel under the shared read lock. Creating an
//! asset and [`IncidentDetector::reset`] take the write lock, so a reset waits
//! for every in-flight call to finish.

use std::collections::HashMap;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::detect::asset::AssetState;
use crate::detect::{
    AlertId, ChannelConfig, ChannelOutcome, ChannelSnapshot, ClosedIncident, ClosedRun, DetectError,
    LifecycleEvent, OpenedIncident, OpenedRun, Reading,
};

/// Result of processing one reading.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Processed {
    /// Lifecycle events in channel configuration order.
    pub events: Vec<LifecycleEvent>,
    /// Channels that could not evaluate this reading.
    pub faults: Vec<ChannelFault>,
}

/// A channel whose evaluation failed for one reading. Its state is unchanged.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelFault {
    pub incident_type: String,
    pub message: String,
    #[serde(skip)]
    pub error: DetectError,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetSnapshot {
    pub asset_id: String,
    pub channels: Vec<ChannelSnapshot>,
}

/// Owns all per-asset state. Share it behind an `Arc`.
#[derive(Debug)]
pub struct IncidentDetector {
    channels: Vec<ChannelConfig>,
    assets: RwLock<HashMap<String, Mutex<AssetState>>>,
}

impl IncidentDetector {
    pub fn new(channels: Vec<ChannelConfig>) -> Result<Self, DetectError> {
        if channels.is_empty() {
            return Err(DetectError::EmptyChannels);
        }
        for (i, ch) in channels.iter().enumerate() {
            ch.validate()?;
            if channels[..i].iter().any(|other| other.label == ch.label) {
                return Err(DetectError::DuplicateChannel(ch.label.clone()));
            }
        }
        Ok(Self {
            channels,
            assets: RwLock::new(HashMap::new()),
        })
    }

    pub fn channels(&self) -> &[ChannelConfig] {
        &self.channels
    }

    pub fn asset_count(&self) -> usize {
        self.assets.read().len()
    }

    /// Classify one reading, creating the asset's state on first sight.
    pub fn process(&self, reading: &Reading) -> Processed {
        let mut processed = Processed::default();

        self.with_asset(&reading.asset_id, |asset| {
            let outcomes = asset.evaluate(&self.channels, reading);
            for (cfg, outcome) in self.channels.iter().zip(outcomes) {
                match outcome {
                    Ok(ChannelOutcome::None) => {}
                    Ok(ChannelOutcome::Opened(run)) => {
                        processed.events.push(opened_event(cfg, reading, run));
                    }
                    Ok(ChannelOutcome::Closed(run)) => {
                        processed.events.push(closed_event(cfg, reading, run));
                    }
                    Err(error) => {
                        warn!(
                            asset_id = %reading.asset_id,
                            incident_type = %cfg.label,
                            %error,
                            "channel could not evaluate reading"
                        );
                        processed.faults.push(ChannelFault {
                            incident_type: cfg.label.clone(),
                            message: error.to_string(),
                            error,
                        });
                    }
                }
            }
        });

        processed
    }

    /// Thread the persisted incident id back into the running incident.
    ///
    /// Returns `false` when there is nothing to attach to: unknown asset,
    /// unknown incident type, or a run that already closed.
    pub fn attach_alert_id(&self, asset_id: &str, incident_type: &str, alert_id: AlertId) -> bool {
        let Some(index) = self.channels.iter().position(|c| c.label == incident_type) else {
            debug!(%asset_id, %incident_type, "attach ignored: unknown incident type");
            return false;
        };

        let assets = self.assets.read();
        let Some(slot) = assets.get(asset_id) else {
            debug!(%asset_id, %incident_type, "attach ignored: unknown asset");
            return false;
        };

        let attached = slot.lock().attach_alert_id(&self.channels, index, alert_id);
        if attached {
            debug!(%asset_id, %incident_type, alert_id, "alert id attached");
        } else {
            debug!(%asset_id, %incident_type, alert_id, "attach ignored: no confirmed run");
        }
        attached
    }

    pub fn inspect(&self, asset_id: &str) -> Option<AssetSnapshot> {
        let assets = self.assets.read();
        let slot = assets.get(asset_id)?;
        let channels = slot.lock().snapshot(&self.channels);
        Some(AssetSnapshot {
            asset_id: asset_id.to_string(),
            channels,
        })
    }

    /// Snapshots of every known asset, sorted by asset id.
    pub fn snapshot_all(&self) -> Vec<AssetSnapshot> {
        let assets = self.assets.read();
        let mut all: Vec<AssetSnapshot> = assets
            .iter()
            .map(|(asset_id, slot)| AssetSnapshot {
                asset_id: asset_id.clone(),
                channels: slot.lock().snapshot(&self.channels),
            })
            .collect();
        all.sort_by(|a, b| a.asset_id.cmp(&b.asset_id));
        all
    }

    /// Drop all asset state.
    pub fn reset(&self) {
        let mut assets = self.assets.write();
        let dropped = assets.len();
        assets.clear();
        info!(assets = dropped, "detector reset");
    }

    fn with_asset<R>(&self, asset_id: &str, f: impl FnOnce(&mut AssetState) -> R) -> R {
        {
            let assets = self.assets.read();
            if let Some(slot) = assets.get(asset_id) {
                let mut state = slot.lock();
                return f(&mut *state);
            }
        }

        let mut assets = self.assets.write();
        let slot = assets.entry(asset_id.to_string()).or_insert_with(|| {
            debug!(%asset_id, "tracking new asset");
            Mutex::new(AssetState::new(self.channels.len()))
        });
        f(slot.get_mut())
    }
}

fn opened_event(cfg: &ChannelConfig, reading: &Reading, run: OpenedRun) -> LifecycleEvent {
    info!(
        asset_id = %reading.asset_id,
        incident_type = %cfg.label,
        count = run.stats.count,
        max = run.stats.max,
        mean = run.stats.mean,
        "incident opened"
    );

    let mut details = match cfg.predicate.describe() {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("predicate".into(), other);
            map
        }
    };
    details.insert("values".into(), json!(run.values));

    LifecycleEvent::Opened(OpenedIncident {
        asset_id: reading.asset_id.clone(),
        incident_type: cfg.label.clone(),
        started_at: run.started_at,
        event_count: run.stats.count,
        max_value: run.stats.max,
        mean_value: run.stats.mean,
        values: run.values,
        details: Value::Object(details),
    })
}

fn closed_event(cfg: &ChannelConfig, reading: &Reading, run: ClosedRun) -> LifecycleEvent {
    info!(
        asset_id = %reading.asset_id,
        incident_type = %cfg.label,
        count = run.stats.count,
        max = run.stats.max,
        mean = run.stats.mean,
        alert_id = ?run.alert_id,
        "incident closed"
    );

    LifecycleEvent::Closed(ClosedIncident {
        asset_id: reading.asset_id.clone(),
        incident_type: cfg.label.clone(),
        alert_id: run.alert_id,
        ended_at: reading.timestamp.clone(),
        event_count: run.stats.count,
        max_value: run.stats.max,
        mean_value: run.stats.mean,
    })
}
