//! Ingestion boundary: plausibility checks and the detect-then-persist
//! pipeline sitting between the transport and the detector.

pub mod pipeline;
pub mod replay;

pub use self::pipeline::{CreatedAlert, IngestReport, Pipeline};
pub use self::replay::ReplaySummary;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::detect::Reading;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("reading has an empty asset id")]
    MissingAssetId,

    #[error("field '{field}' is not a finite number")]
    NotFinite { field: String },

    #[error("field '{field}' = {value} outside plausible range [{min}, {max}]")]
    OutOfRange { field: String, value: f64, min: f64, max: f64 },

    #[error("storage failure: {0:#}")]
    Storage(anyhow::Error),
}

impl IngestError {
    /// Whether the reading itself was at fault (as opposed to the backend).
    pub fn is_rejection(&self) -> bool {
        !matches!(self, IngestError::Storage(_))
    }
}

/// Inclusive physical range for one field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldRange {
    pub min: f64,
    pub max: f64,
}

impl FieldRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Plausibility limits applied before a reading reaches the detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestLimits {
    pub validate: bool,
    /// Checked only for fields the reading carries.
    pub ranges: BTreeMap<String, FieldRange>,
}

impl Default for IngestLimits {
    fn default() -> Self {
        let ranges = [
            ("temperatura", FieldRange::new(-20.0, 50.0)),
            ("fuerza_g", FieldRange::new(0.0, 10.0)),
            ("inclinacion", FieldRange::new(-90.0, 90.0)),
            ("humedad", FieldRange::new(0.0, 100.0)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self { validate: true, ranges }
    }
}

impl IngestLimits {
    pub fn check(&self, reading: &Reading) -> Result<(), IngestError> {
        if reading.asset_id.trim().is_empty() {
            return Err(IngestError::MissingAssetId);
        }
        if !self.validate {
            return Ok(());
        }
        for (field, value) in &reading.fields {
            if !value.is_finite() {
                return Err(IngestError::NotFinite { field: field.clone() });
            }
            if let Some(range) = self.ranges.get(field) {
                if !range.contains(*value) {
                    return Err(IngestError::OutOfRange {
                        field: field.clone(),
                        value: *value,
                        min: range.min,
                        max: range.max,
                    });
                }
            }
        }
        Ok(())
    }
}
