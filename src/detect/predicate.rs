//! Anomaly predicates evaluated by a detection channel.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::detect::{DetectError, Reading};

/// Outcome of evaluating a predicate against one reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    Normal,
    /// Anomalous, carrying the scalar recorded in the run history.
    Anomalous(f64),
}

/// A pure anomalous/not-anomalous test over a reading.
pub trait Predicate: Send + Sync + fmt::Debug {
    fn evaluate(&self, reading: &Reading) -> Result<Verdict, DetectError>;

    /// Parameters attached to OPENED details.
    fn describe(&self) -> Value {
        Value::Null
    }
}

/// Wraps a closure so programmatic channels need no config.
pub struct FnPredicate<F> {
    name: &'static str,
    f: F,
}

impl<F> FnPredicate<F>
where
    F: Fn(&Reading) -> Result<Verdict, DetectError> + Send + Sync,
{
    pub fn new(name: &'static str, f: F) -> Self {
        Self { name, f }
    }
}

impl<F> fmt::Debug for FnPredicate<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnPredicate").field("name", &self.name).finish()
    }
}

impl<F> Predicate for FnPredicate<F>
where
    F: Fn(&Reading) -> Result<Verdict, DetectError> + Send + Sync,
{
    fn evaluate(&self, reading: &Reading) -> Result<Verdict, DetectError> {
        (self.f)(reading)
    }

    fn describe(&self) -> Value {
        json!({ "predicate": self.name })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Above,
    Below,
}

/// `field <op> threshold`, strict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub op: Comparison,
    pub threshold: f64,
}

impl Condition {
    pub fn above(field: impl Into<String>, threshold: f64) -> Self {
        Self { field: field.into(), op: Comparison::Above, threshold }
    }

    pub fn below(field: impl Into<String>, threshold: f64) -> Self {
        Self { field: field.into(), op: Comparison::Below, threshold }
    }

    fn holds(&self, value: f64) -> bool {
        match self.op {
            Comparison::Above => value > self.threshold,
            Comparison::Below => value < self.threshold,
        }
    }
}

/// What a reading without one of the predicate's fields means.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingPolicy {
    /// Fail this channel's evaluation and leave its state untouched.
    #[default]
    Error,
    /// Treat the reading as not anomalous.
    Normal,
}

/// Conjunction of threshold conditions; records `value_field` while anomalous.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdPredicate {
    conditions: Vec<Condition>,
    value_field: String,
    on_missing: MissingPolicy,
}

impl ThresholdPredicate {
    pub fn new(
        conditions: Vec<Condition>,
        value_field: impl Into<String>,
        on_missing: MissingPolicy,
    ) -> Self {
        Self {
            conditions,
            value_field: value_field.into(),
            on_missing,
        }
    }

    /// Single `field > threshold` condition recording that same field.
    pub fn above(field: &str, threshold: f64) -> Self {
        Self::new(vec![Condition::above(field, threshold)], field, MissingPolicy::Error)
    }

    pub fn value_field(&self) -> &str {
        &self.value_field
    }

    fn lookup(&self, reading: &Reading, field: &str) -> Result<Option<f64>, DetectError> {
        match (reading.get(field), self.on_missing) {
            (Some(v), _) => Ok(Some(v)),
            (None, MissingPolicy::Normal) => Ok(None),
            (None, MissingPolicy::Error) => reading.field(field).map(Some),
        }
    }
}

impl Predicate for ThresholdPredicate {
    fn evaluate(&self, reading: &Reading) -> Result<Verdict, DetectError> {
        // Every field is looked up before deciding so a malformed reading is
        // reported even when an earlier condition already failed.
        let mut anomalous = true;
        for cond in &self.conditions {
            match self.lookup(reading, &cond.field)? {
                Some(v) => anomalous &= cond.holds(v),
                None => return Ok(Verdict::Normal),
            }
        }
        let Some(value) = self.lookup(reading, &self.value_field)? else {
            return Ok(Verdict::Normal);
        };
        Ok(if anomalous { Verdict::Anomalous(value) } else { Verdict::Normal })
    }

    fn describe(&self) -> Value {
        let thresholds: serde_json::Map<String, Value> = self
            .conditions
            .iter()
            .map(|c| (c.field.clone(), json!({ "op": c.op, "threshold": c.threshold })))
            .collect();
        json!({ "conditions": thresholds, "value_field": self.value_field })
    }
}
