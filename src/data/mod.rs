//! Data structures for telemetry.
//!
//! This module contains the reading types, the bounded per-channel history
//! and the disease-risk alert rules.

pub mod alerts;
pub mod history;
pub mod reading;

pub use alerts::{ActiveAlerts, AlertEngine, AlertId, AlertRule, Interval, DISEASE_RULES};
pub use history::{
    HistoryBuffer, HistoryStats, SampleBuffer, HISTORY_CAPACITY, MAX_HISTORY_CAPACITY,
};
pub use reading::{Channel, Reading};
