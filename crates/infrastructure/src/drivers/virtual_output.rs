use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use domain::driver::Driver;
use domain::error::DriverError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualOutputConfig {
    #[serde(default)]
    pub initial_value: Option<f64>,
}

/// An in-memory actuator with no physical backing. A `write` sets the
/// held value; the next `read` surfaces it as a genuine reading that
/// flows back through the normal pipeline (formula, bus, buffer) just
/// like any sensor. Recursive triggering (a rule's target is itself
/// watched by another rule) is bounded only by automation cooldowns,
/// not by any special-casing here: this driver does not know, and
/// does not need to know, whether its value came from a write issued
/// by the automation engine.
pub struct VirtualOutputDriver {
    bits: Arc<AtomicU64>,
    has_value: Arc<AtomicBool>,
}

impl VirtualOutputDriver {
    pub fn new(config: VirtualOutputConfig) -> Self {
        let has_value = config.initial_value.is_some();
        let bits = config.initial_value.unwrap_or(0.0).to_bits();
        Self {
            bits: Arc::new(AtomicU64::new(bits)),
            has_value: Arc::new(AtomicBool::new(has_value)),
        }
    }
}

#[async_trait]
impl Driver for VirtualOutputDriver {
    async fn connect(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn read(&mut self) -> Result<f64, DriverError> {
        if !self.has_value.load(Ordering::SeqCst) {
            return Err(DriverError::Read("no value has been written yet".into()));
        }
        Ok(f64::from_bits(self.bits.load(Ordering::SeqCst)))
    }

    async fn write(&mut self, value: f64) -> Result<(), DriverError> {
        self.bits.store(value.to_bits(), Ordering::SeqCst);
        self.has_value.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_event_driven(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_before_any_write_fails() {
        let mut driver = VirtualOutputDriver::new(VirtualOutputConfig { initial_value: None });
        assert!(driver.read().await.is_err());
    }

    #[tokio::test]
    async fn write_then_read_roundtrips() {
        let mut driver = VirtualOutputDriver::new(VirtualOutputConfig { initial_value: None });
        driver.write(42.0).await.unwrap();
        assert_eq!(driver.read().await.unwrap(), 42.0);
    }

    #[tokio::test]
    async fn initial_value_is_readable_immediately() {
        let mut driver = VirtualOutputDriver::new(VirtualOutputConfig {
            initial_value: Some(1.0),
        });
        assert_eq!(driver.read().await.unwrap(), 1.0);
    }
}
