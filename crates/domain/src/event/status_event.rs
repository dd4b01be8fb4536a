use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::driver::DriverState;
use crate::sensor::SensorId;

/// Emitted whenever a driver's `DriverState` changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    pub sensor_id: SensorId,
    pub sensor_name: String,
    pub previous: DriverState,
    pub current: DriverState,
    pub timestamp: DateTime<Utc>,
}

impl StatusEvent {
    pub fn new(
        sensor_id: SensorId,
        sensor_name: impl Into<String>,
        previous: DriverState,
        current: DriverState,
    ) -> Self {
        Self {
            sensor_id,
            sensor_name: sensor_name.into(),
            previous,
            current,
            timestamp: Utc::now(),
        }
    }
}
