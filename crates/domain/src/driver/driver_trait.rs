use async_trait::async_trait;

use crate::error::DriverError;

/// One protocol session to one device.
///
/// A driver owns exactly one sensor's transport. The base supervisor
/// (in `application`) composes a `Driver` value and is responsible for
/// retry, timeout and status bookkeeping; drivers themselves contain
/// only I/O.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Establish the protocol session. Idempotent under repeated failure.
    async fn connect(&mut self) -> Result<(), DriverError>;

    /// Release protocol resources. Must succeed even if never connected.
    async fn disconnect(&mut self) -> Result<(), DriverError>;

    /// Return the most recent raw reading.
    ///
    /// Event-driven drivers return a memoized last value here and fail
    /// with `DriverError::Read` if none has arrived yet.
    async fn read(&mut self) -> Result<f64, DriverError>;

    /// Write a value, if the underlying protocol supports it.
    ///
    /// Default is unsupported; Modbus (holding/coil), MQTT (command
    /// topic) and virtual-output override this.
    async fn write(&mut self, _value: f64) -> Result<(), DriverError> {
        Err(DriverError::UnsupportedWrite)
    }

    /// Whether this driver delivers values from a side task rather than
    /// on the supervisor's poll cadence (MQTT, CAN, virtual-output).
    fn is_event_driven(&self) -> bool {
        false
    }
}
