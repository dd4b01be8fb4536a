//! Domain layer - Pure business logic with no external dependencies
//!
//! This crate contains:
//! - Entities (SensorDefinition, Driver, AutomationRule)
//! - Value Objects (SensorId, Protocol, DriverState)
//! - Domain Events (ValueEvent, StatusEvent, ErrorEvent)
//! - The sandboxed formula engine
//!
//! Principles:
//! - No dependencies on infrastructure
//! - Business rules enforced at domain level
//! - Rich domain models with behavior
//! - Testable in isolation

pub mod automation;
pub mod buffer;
pub mod driver;
pub mod error;
pub mod event;
pub mod formula;
pub mod ports;
pub mod sensor;

// Re-export commonly used types
pub use automation::AutomationRule;
pub use buffer::BufferedReading;
pub use driver::{Driver, DriverState};
pub use error::{DriverError, FormulaError};
pub use event::{ErrorEvent, StatusEvent, ValueEvent};
pub use ports::{RelationalStore, TimeSeriesSink};
pub use sensor::{DriverStatus, Protocol, SensorDefinition, SensorId};
