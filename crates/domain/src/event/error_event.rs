use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sensor::SensorId;

/// Emitted when a driver poll or write fails, independent of any
/// resulting state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub sensor_id: SensorId,
    pub sensor_name: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorEvent {
    pub fn new(sensor_id: SensorId, sensor_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            sensor_id,
            sensor_name: sensor_name.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}
