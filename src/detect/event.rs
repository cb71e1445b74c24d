use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::detect::AlertId;

/// Output contract of the detector, consumed by the persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Opened(OpenedIncident),
    Closed(ClosedIncident),
}

impl LifecycleEvent {
    pub fn asset_id(&self) -> &str {
        match self {
            LifecycleEvent::Opened(o) => &o.asset_id,
            LifecycleEvent::Closed(c) => &c.asset_id,
        }
    }

    pub fn incident_type(&self) -> &str {
        match self {
            LifecycleEvent::Opened(o) => &o.incident_type,
            LifecycleEvent::Closed(c) => &c.incident_type,
        }
    }
}

/// A run just reached its threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenedIncident {
    pub asset_id: String,
    pub incident_type: String,
    pub started_at: String,
    pub event_count: u32,
    pub max_value: f64,
    pub mean_value: f64,
    pub values: Vec<f64>,
    /// Predicate parameters plus the raw values.
    pub details: Value,
}

/// A confirmed run just ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedIncident {
    pub asset_id: String,
    pub incident_type: String,
    /// Absent when the caller never attached one before the run ended.
    pub alert_id: Option<AlertId>,
    pub ended_at: String,
    pub event_count: u32,
    pub max_value: f64,
    pub mean_value: f64,
}
