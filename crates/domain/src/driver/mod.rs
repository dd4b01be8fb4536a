mod connection_state;
mod driver_trait;

pub use connection_state::DriverState;
pub use driver_trait::Driver;
