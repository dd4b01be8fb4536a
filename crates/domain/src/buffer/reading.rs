use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sensor::SensorId;

/// A single reading held in the store-and-forward buffer, whether it
/// has already reached the time-series sink or is still waiting for a
/// flush.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BufferedReading {
    pub id: Option<i64>,
    pub sensor_id: SensorId,
    pub sensor_name: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub raw_value: f64,
    pub synced: bool,
    pub synced_at: Option<DateTime<Utc>>,
}

impl BufferedReading {
    /// Builds an as-yet-unpersisted reading for a processed value just
    /// produced by the pipeline.
    pub fn new(
        sensor_id: SensorId,
        sensor_name: impl Into<String>,
        timestamp: DateTime<Utc>,
        value: f64,
        raw_value: f64,
    ) -> Self {
        Self {
            id: None,
            sensor_id,
            sensor_name: sensor_name.into(),
            timestamp,
            value,
            raw_value,
            synced: false,
            synced_at: None,
        }
    }
}
