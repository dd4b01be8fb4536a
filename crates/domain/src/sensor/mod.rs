mod definition;
mod protocol;
mod sensor_id;
mod status;

pub use definition::SensorDefinition;
pub use protocol::Protocol;
pub use sensor_id::SensorId;
pub use status::DriverStatus;
