//! Sustained-incident detection: debounced per-channel classification of
//! per-asset readings into opened/closed lifecycle events.

pub mod asset;
pub mod channel;
pub mod detector;
pub mod event;
pub mod predicate;
pub mod reading;

pub use self::channel::{
    ChannelConfig, ChannelOutcome, ChannelSnapshot, ClosedRun, OpenedRun, RunStats,
};
pub use self::detector::{AssetSnapshot, ChannelFault, IncidentDetector, Processed};
pub use self::event::{ClosedIncident, LifecycleEvent, OpenedIncident};
pub use self::predicate::{
    Comparison, Condition, FnPredicate, MissingPolicy, Predicate, ThresholdPredicate, Verdict,
};
pub use self::reading::Reading;

use thiserror::Error;

/// Identifier assigned to an incident record by the persistence layer.
pub type AlertId = i64;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DetectError {
    #[error("reading for asset '{asset_id}' is missing field '{field}'")]
    MissingField { asset_id: String, field: String },

    #[error("invalid channel configuration '{label}': {reason}")]
    InvalidConfig { label: String, reason: String },

    #[error("channel '{0}' is configured more than once")]
    DuplicateChannel(String),

    #[error("detector needs at least one channel")]
    EmptyChannels,
}
