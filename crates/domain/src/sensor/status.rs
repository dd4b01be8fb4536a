use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::driver::DriverState;

/// Transient snapshot of a driver's runtime status, as exposed by
/// `get_status`/`get_all_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverStatus {
    pub state: DriverState,
    pub running: bool,
    pub connected: bool,
    pub last_raw: Option<f64>,
    pub last_processed: Option<f64>,
    pub last_seen_ts: Option<DateTime<Utc>>,
    pub consecutive_error_count: u32,
}

impl DriverStatus {
    pub fn stopped() -> Self {
        Self {
            state: DriverState::Stopped,
            running: false,
            connected: false,
            last_raw: None,
            last_processed: None,
            last_seen_ts: None,
            consecutive_error_count: 0,
        }
    }
}

impl Default for DriverStatus {
    fn default() -> Self {
        Self::stopped()
    }
}
