use serde::{Deserialize, Serialize};

use super::{Protocol, SensorId};
use crate::error::DriverError;

const POLL_INTERVAL_RANGE_MS: std::ops::RangeInclusive<u64> = 100..=60_000;
const TIMEOUT_RANGE_MS: std::ops::RangeInclusive<u64> = 1_000..=30_000;
const RETRY_COUNT_RANGE: std::ops::RangeInclusive<u32> = 1..=10;

fn default_formula() -> String {
    "val".to_string()
}

/// Registry entry describing one sensor. Owned by the (external)
/// metadata store; the orchestrator consumes a snapshot of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorDefinition {
    pub sensor_id: SensorId,
    pub sensor_name: String,
    pub protocol: Protocol,
    pub connection_params: serde_json::Value,
    #[serde(default = "default_formula")]
    pub data_formula: String,
    pub poll_interval_ms: u64,
    pub timeout_ms: u64,
    pub retry_count: u32,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl SensorDefinition {
    /// Validates the bounded fields. Construction does not validate
    /// `connection_params` against the chosen protocol; that happens
    /// when the driver is actually built.
    pub fn validate(&self) -> Result<(), DriverError> {
        if !POLL_INTERVAL_RANGE_MS.contains(&self.poll_interval_ms) {
            return Err(DriverError::InvalidConfig(format!(
                "poll_interval_ms {} out of range {:?}",
                self.poll_interval_ms, POLL_INTERVAL_RANGE_MS
            )));
        }
        if !TIMEOUT_RANGE_MS.contains(&self.timeout_ms) {
            return Err(DriverError::InvalidConfig(format!(
                "timeout_ms {} out of range {:?}",
                self.timeout_ms, TIMEOUT_RANGE_MS
            )));
        }
        if !RETRY_COUNT_RANGE.contains(&self.retry_count) {
            return Err(DriverError::InvalidConfig(format!(
                "retry_count {} out of range {:?}",
                self.retry_count, RETRY_COUNT_RANGE
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(poll_interval_ms: u64, timeout_ms: u64, retry_count: u32) -> SensorDefinition {
        SensorDefinition {
            sensor_id: SensorId::new(1),
            sensor_name: "temp1".into(),
            protocol: Protocol::ModbusTcp,
            connection_params: serde_json::json!({}),
            data_formula: "val".into(),
            poll_interval_ms,
            timeout_ms,
            retry_count,
            is_active: true,
        }
    }

    #[test]
    fn accepts_values_in_range() {
        assert!(def(1000, 5000, 3).validate().is_ok());
    }

    #[test]
    fn rejects_poll_interval_out_of_range() {
        assert!(def(50, 5000, 3).validate().is_err());
        assert!(def(70_000, 5000, 3).validate().is_err());
    }

    #[test]
    fn rejects_timeout_out_of_range() {
        assert!(def(1000, 500, 3).validate().is_err());
        assert!(def(1000, 40_000, 3).validate().is_err());
    }

    #[test]
    fn rejects_retry_count_out_of_range() {
        assert!(def(1000, 5000, 0).validate().is_err());
        assert!(def(1000, 5000, 11).validate().is_err());
    }
}
