use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sensor::SensorId;

/// Emitted once per successfully processed reading, after the formula
/// has run. Consumed by the buffer service, streaming subscribers,
/// automation and the cloud forwarder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueEvent {
    pub sensor_id: SensorId,
    pub sensor_name: String,
    pub raw_value: f64,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl ValueEvent {
    pub fn new(
        sensor_id: SensorId,
        sensor_name: impl Into<String>,
        raw_value: f64,
        value: f64,
    ) -> Self {
        Self {
            sensor_id,
            sensor_name: sensor_name.into(),
            raw_value,
            value,
            timestamp: Utc::now(),
        }
    }
}
