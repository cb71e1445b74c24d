//! Detection channel: one predicate with its consecutive-event debounce.
//!
//! A channel counts consecutive anomalous readings for one asset. The run is
//! confirmed when the counter reaches the threshold `N`; that reading is the
//! rising edge and yields [`ChannelOutcome::Opened`]. The first normal reading
//! after a confirmed run is the falling edge and yields
//! [`ChannelOutcome::Closed`]. A run that ends before reaching `N` is dropped
//! without any event.
//!
//! ```text
//!             anomalous (count < N)
//!   Idle ─────────────────────────► Pending ──── count == N ───► Confirmed
//!    ▲                                 │                           │
//!    │           normal (silent)       │          normal (Closed)  │
//!    └─────────────────────────────────┴───────────────────────────┘
//! ```

use std::sync::Arc;

use serde::Serialize;

use crate::detect::{AlertId, DetectError, Predicate, Reading, Verdict};

/// Raw values kept per run once the run is confirmed.
pub const DEFAULT_HISTORY_CAP: usize = 1024;

/// Immutable channel definition, shared by every asset.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub label: String,
    /// Consecutive anomalous readings needed to confirm an incident.
    pub threshold: u32,
    pub predicate: Arc<dyn Predicate>,
    pub history_cap: usize,
}

impl ChannelConfig {
    pub fn new(
        label: impl Into<String>,
        threshold: u32,
        predicate: impl Predicate + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            threshold,
            predicate: Arc::new(predicate),
            history_cap: DEFAULT_HISTORY_CAP,
        }
    }

    pub fn with_history_cap(mut self, cap: usize) -> Self {
        self.history_cap = cap;
        self
    }

    pub fn validate(&self) -> Result<(), DetectError> {
        if self.label.trim().is_empty() {
            return Err(DetectError::InvalidConfig {
                label: self.label.clone(),
                reason: "label must not be empty".into(),
            });
        }
        if self.threshold == 0 {
            return Err(DetectError::InvalidConfig {
                label: self.label.clone(),
                reason: "threshold must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// Statistics over a whole anomalous run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RunStats {
    pub count: u32,
    pub max: f64,
    pub mean: f64,
}

/// Rising edge: the run just reached the threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenedRun {
    pub stats: RunStats,
    pub started_at: String,
    pub values: Vec<f64>,
}

/// Falling edge: a confirmed run just ended.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedRun {
    pub stats: RunStats,
    pub alert_id: Option<AlertId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelOutcome {
    None,
    Opened(OpenedRun),
    Closed(ClosedRun),
}

impl ChannelOutcome {
    pub fn stats(&self) -> Option<RunStats> {
        match self {
            ChannelOutcome::None => None,
            ChannelOutcome::Opened(run) => Some(run.stats),
            ChannelOutcome::Closed(run) => Some(run.stats),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, ChannelOutcome::None)
    }
}

/// Per-asset mutable state of one channel.
///
/// `count > 0`, a non-empty `history` and a set `started_at` always go
/// together.
#[derive(Debug, Clone, Default)]
pub struct ChannelState {
    count: u32,
    history: Vec<f64>,
    started_at: Option<String>,
    alert_id: Option<AlertId>,
    max: f64,
    sum: f64,
}

impl ChannelState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn history(&self) -> &[f64] {
        &self.history
    }

    pub fn started_at(&self) -> Option<&str> {
        self.started_at.as_deref()
    }

    pub fn alert_id(&self) -> Option<AlertId> {
        self.alert_id
    }

    pub fn is_confirmed(&self, config: &ChannelConfig) -> bool {
        self.count >= config.threshold
    }

    /// Feed one reading through the channel.
    ///
    /// A predicate error leaves the state exactly as it was.
    pub fn evaluate(
        &mut self,
        config: &ChannelConfig,
        reading: &Reading,
    ) -> Result<ChannelOutcome, DetectError> {
        match config.predicate.evaluate(reading)? {
            Verdict::Anomalous(value) => Ok(self.on_anomalous(config, reading, value)),
            Verdict::Normal => Ok(self.on_normal(config)),
        }
    }

    fn on_anomalous(
        &mut self,
        config: &ChannelConfig,
        reading: &Reading,
        value: f64,
    ) -> ChannelOutcome {
        if self.count == 0 {
            self.started_at = Some(reading.timestamp.clone());
            self.max = value;
        } else {
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;

        // Keep every value until the rising edge; after that only max/mean
        // are reported, so the list is bounded.
        if self.count <= config.threshold || self.history.len() < config.history_cap {
            self.history.push(value);
        }

        if self.count == config.threshold {
            ChannelOutcome::Opened(OpenedRun {
                stats: self.stats(),
                started_at: self
                    .started_at
                    .clone()
                    .unwrap_or_else(|| reading.timestamp.clone()),
                values: self.history.clone(),
            })
        } else {
            ChannelOutcome::None
        }
    }

    fn on_normal(&mut self, config: &ChannelConfig) -> ChannelOutcome {
        let outcome = if self.count >= config.threshold {
            ChannelOutcome::Closed(ClosedRun {
                stats: self.stats(),
                alert_id: self.alert_id,
            })
        } else {
            ChannelOutcome::None
        };
        self.clear();
        outcome
    }

    fn stats(&self) -> RunStats {
        RunStats {
            count: self.count,
            max: self.max,
            mean: self.sum / self.count as f64,
        }
    }

    fn clear(&mut self) {
        self.count = 0;
        self.history.clear();
        self.started_at = None;
        self.alert_id = None;
        self.max = 0.0;
        self.sum = 0.0;
    }

    /// Record the persisted incident id for the current confirmed run.
    ///
    /// Returns `false` (and changes nothing) when no confirmed run is active,
    /// e.g. because it already closed.
    pub fn attach_alert_id(&mut self, config: &ChannelConfig, alert_id: AlertId) -> bool {
        if !self.is_confirmed(config) {
            return false;
        }
        self.alert_id = Some(alert_id);
        true
    }

    pub fn snapshot(&self, config: &ChannelConfig) -> ChannelSnapshot {
        ChannelSnapshot {
            incident_type: config.label.clone(),
            count: self.count,
            active: self.is_confirmed(config),
            alert_id: self.alert_id,
            started_at: self.started_at.clone(),
        }
    }
}

/// Read-only view of one channel for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelSnapshot {
    pub incident_type: String,
    pub count: u32,
    pub active: bool,
    pub alert_id: Option<AlertId>,
    pub started_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::ThresholdPredicate;

    fn temp_channel(n: u32) -> ChannelConfig {
        ChannelConfig::new("temperatura_alta", n, ThresholdPredicate::above("temperatura", 8.0))
    }

    fn feed(state: &mut ChannelState, cfg: &ChannelConfig, temps: &[f64]) -> Vec<ChannelOutcome> {
        temps
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let r = Reading::new("X", format!("t{}", i)).with("temperatura", *t);
                state.evaluate(cfg, &r).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_opens_on_nth_and_closes_on_normal() {
        let cfg = temp_channel(3);
        let mut st = ChannelState::new();
        let out = feed(&mut st, &cfg, &[9.0, 9.0, 9.0, 4.0]);
        let stats = RunStats { count: 3, max: 9.0, mean: 9.0 };
        assert!(out[0].is_none());
        assert!(out[1].is_none());
        assert_eq!(
            out[2],
            ChannelOutcome::Opened(OpenedRun {
                stats,
                started_at: "t0".into(),
                values: vec![9.0, 9.0, 9.0],
            })
        );
        assert_eq!(out[3], ChannelOutcome::Closed(ClosedRun { stats, alert_id: None }));
        assert_eq!(st.count(), 0);
        assert!(st.history().is_empty());
        assert!(st.started_at().is_none());
    }

    #[test]
    fn test_partial_run_is_silent() {
        let cfg = temp_channel(3);
        let mut st = ChannelState::new();
        let out = feed(&mut st, &cfg, &[9.0, 9.0, 4.0]);
        assert!(out.iter().all(ChannelOutcome::is_none));
        assert_eq!(st.count(), 0);
        assert!(st.history().is_empty());
    }

    #[test]
    fn test_run_start_is_first_anomalous_timestamp() {
        let cfg = temp_channel(3);
        let mut st = ChannelState::new();
        feed(&mut st, &cfg, &[4.0, 9.0]);
        assert_eq!(st.started_at(), Some("t1"));
        assert_eq!(st.count(), 1);
        assert_eq!(st.history(), &[9.0]);
    }

    #[test]
    fn test_close_stats_cover_whole_run() {
        let cfg = temp_channel(3);
        let mut st = ChannelState::new();
        let out = feed(&mut st, &cfg, &[9.0, 10.0, 11.0, 15.0, 9.0, 5.0]);
        assert_eq!(out[2].stats(), Some(RunStats { count: 3, max: 11.0, mean: 10.0 }));
        assert!(out[3].is_none());
        assert!(out[4].is_none());
        assert!(matches!(out[5], ChannelOutcome::Closed(_)));
        assert_eq!(out[5].stats(), Some(RunStats { count: 5, max: 15.0, mean: 10.8 }));
    }

    #[test]
    fn test_threshold_of_one_opens_immediately() {
        let cfg = temp_channel(1);
        let mut st = ChannelState::new();
        let out = feed(&mut st, &cfg, &[12.0, 4.0]);
        let stats = RunStats { count: 1, max: 12.0, mean: 12.0 };
        assert!(matches!(out[0], ChannelOutcome::Opened(ref run) if run.stats == stats));
        assert!(matches!(out[1], ChannelOutcome::Closed(ref run) if run.stats == stats));
    }

    #[test]
    fn test_history_is_bounded_after_confirmation() {
        let cfg = temp_channel(3).with_history_cap(4);
        let mut st = ChannelState::new();
        let temps: Vec<f64> = (0..10).map(|i| 9.0 + i as f64).collect();
        feed(&mut st, &cfg, &temps);
        assert_eq!(st.count(), 10);
        assert_eq!(st.history().len(), 4);

        let out = feed(&mut st, &cfg, &[4.0]);
        assert_eq!(out[0].stats(), Some(RunStats { count: 10, max: 18.0, mean: 13.5 }));
    }

    #[test]
    fn test_history_cap_never_truncates_before_opened() {
        let cfg = temp_channel(5).with_history_cap(2);
        let mut st = ChannelState::new();
        feed(&mut st, &cfg, &[9.0, 9.5, 10.0, 10.5, 11.0]);
        assert_eq!(st.history().len(), 5);
    }

    #[test]
    fn test_attach_only_while_confirmed() {
        let cfg = temp_channel(2);
        let mut st = ChannelState::new();
        feed(&mut st, &cfg, &[9.0]);
        assert!(!st.attach_alert_id(&cfg, 7));
        feed(&mut st, &cfg, &[9.0]);
        assert!(st.attach_alert_id(&cfg, 7));
        assert_eq!(st.alert_id(), Some(7));

        let out = feed(&mut st, &cfg, &[4.0]);
        assert!(matches!(out[0], ChannelOutcome::Closed(ClosedRun { alert_id: Some(7), .. })));
        assert_eq!(st.alert_id(), None);
        assert!(!st.attach_alert_id(&cfg, 8));
    }

    #[test]
    fn test_predicate_error_leaves_state_untouched() {
        let cfg = temp_channel(3);
        let mut st = ChannelState::new();
        feed(&mut st, &cfg, &[9.0, 9.0]);
        let bad = Reading::new("X", "t9").with("humedad", 50.0);
        assert!(st.evaluate(&cfg, &bad).is_err());
        assert_eq!(st.count(), 2);
        assert_eq!(st.history(), &[9.0, 9.0]);
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        assert!(temp_channel(0).validate().is_err());
        assert!(temp_channel(1).validate().is_ok());
    }
}
