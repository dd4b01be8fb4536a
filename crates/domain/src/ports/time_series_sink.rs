use async_trait::async_trait;
use std::collections::HashMap;

use crate::buffer::BufferedReading;
use crate::error::DriverError;

/// The outbound interface contract for the time-series database this
/// gateway reports into. Only the shape of the contract is owned
/// here; the concrete client (whatever database is actually in use)
/// is an infrastructure adapter.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait TimeSeriesSink: Send + Sync {
    async fn write_point(&self, reading: &BufferedReading) -> Result<(), DriverError>;
    async fn write_batch(&self, readings: &[BufferedReading]) -> Result<(), DriverError>;

    /// Computes `function` (e.g. "mean", "max", "min", "stddev", "count")
    /// over `sensor_name` for the trailing `window`, returning `None` if
    /// no data exists in the window.
    async fn query_statistics(
        &self,
        sensor_name: &str,
        function: &str,
        window: std::time::Duration,
    ) -> Result<Option<f64>, DriverError>;

    fn is_connected(&self) -> bool;
}

/// A deterministic in-memory fake used by tests for the buffer
/// service and automation engine, standing in for the real sink.
#[derive(Default)]
pub struct InMemorySink {
    pub points: std::sync::Mutex<Vec<BufferedReading>>,
    pub stats: std::sync::Mutex<HashMap<(String, String), f64>>,
    pub connected: std::sync::atomic::AtomicBool,
    pub fail_writes: std::sync::atomic::AtomicBool,
}

impl InMemorySink {
    pub fn new(connected: bool) -> Self {
        Self {
            points: std::sync::Mutex::new(Vec::new()),
            stats: std::sync::Mutex::new(HashMap::new()),
            connected: std::sync::atomic::AtomicBool::new(connected),
            fail_writes: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn set_stat(&self, sensor_name: &str, function: &str, value: f64) {
        self.stats
            .lock()
            .unwrap()
            .insert((sensor_name.to_string(), function.to_string()), value);
    }
}

#[async_trait]
impl TimeSeriesSink for InMemorySink {
    async fn write_point(&self, reading: &BufferedReading) -> Result<(), DriverError> {
        if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(DriverError::Write("sink unavailable".into()));
        }
        self.points.lock().unwrap().push(reading.clone());
        Ok(())
    }

    async fn write_batch(&self, readings: &[BufferedReading]) -> Result<(), DriverError> {
        if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(DriverError::Write("sink unavailable".into()));
        }
        self.points.lock().unwrap().extend_from_slice(readings);
        Ok(())
    }

    async fn query_statistics(
        &self,
        sensor_name: &str,
        function: &str,
        _window: std::time::Duration,
    ) -> Result<Option<f64>, DriverError> {
        Ok(self
            .stats
            .lock()
            .unwrap()
            .get(&(sensor_name.to_string(), function.to_string()))
            .copied())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(std::sync::atomic::Ordering::SeqCst)
    }
}
