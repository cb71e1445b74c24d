use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::detect::DetectError;

/// One timestamped set of sensor measurements for one asset.
///
/// Every numeric key other than `asset_id` and `timestamp` is collected into
/// `fields`, so new sensors need no schema change. Non-numeric extras (labels,
/// `null`s) are dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawReading")]
pub struct Reading {
    pub asset_id: String,
    /// ISO-8601, kept verbatim.
    pub timestamp: String,
    #[serde(flatten)]
    pub fields: BTreeMap<String, f64>,
}

/// Wire shape accepted from clients.
#[derive(Deserialize)]
struct RawReading {
    #[serde(alias = "id_paquete")]
    asset_id: String,
    timestamp: String,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

impl From<RawReading> for Reading {
    fn from(raw: RawReading) -> Self {
        let fields = raw
            .extra
            .into_iter()
            .filter_map(|(name, value)| value.as_f64().map(|v| (name, v)))
            .collect();
        Self {
            asset_id: raw.asset_id,
            timestamp: raw.timestamp,
            fields,
        }
    }
}

impl Reading {
    pub fn new(asset_id: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            asset_id: asset_id.into(),
            timestamp: timestamp.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.fields.get(name).copied()
    }

    /// Look up a field, failing when the reading does not carry it.
    pub fn field(&self, name: &str) -> Result<f64, DetectError> {
        self.get(name).ok_or_else(|| DetectError::MissingField {
            asset_id: self.asset_id.clone(),
            field: name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_flat_payload() {
        let json = r#"{
            "id_paquete": "PKG-001",
            "timestamp": "2024-05-01T10:00:00Z",
            "temperatura": 9.5,
            "fuerza_g": 0.4,
            "inclinacion": 3.0
        }"#;
        let r: Reading = serde_json::from_str(json).unwrap();
        assert_eq!(r.asset_id, "PKG-001");
        assert_eq!(r.timestamp, "2024-05-01T10:00:00Z");
        assert_eq!(r.get("temperatura"), Some(9.5));
        assert_eq!(r.fields.len(), 3);
    }

    #[test]
    fn test_non_numeric_extras_are_dropped() {
        let json = r#"{
            "id_paquete": "PKG-002",
            "timestamp": "2024-05-01T10:00:00Z",
            "temperatura": 9.0,
            "source": "mqtt",
            "humedad": null,
            "sellado": true
        }"#;
        let r: Reading = serde_json::from_str(json).unwrap();
        assert_eq!(r.asset_id, "PKG-002");
        assert_eq!(r.fields.len(), 1);
        assert_eq!(r.get("temperatura"), Some(9.0));
        assert_eq!(r.get("humedad"), None);
    }

    #[test]
    fn test_integer_fields_are_numbers() {
        let json = r#"{"asset_id": "A", "timestamp": "t", "inclinacion": 45}"#;
        let r: Reading = serde_json::from_str(json).unwrap();
        assert_eq!(r.get("inclinacion"), Some(45.0));
    }

    #[test]
    fn test_missing_field_is_an_error() {
        let r = Reading::new("A", "t0").with("temperatura", 4.0);
        assert_eq!(r.field("temperatura").unwrap(), 4.0);
        assert_eq!(
            r.field("fuerza_g"),
            Err(DetectError::MissingField {
                asset_id: "A".into(),
                field: "fuerza_g".into()
            })
        );
    }
}
