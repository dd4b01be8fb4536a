mod registry;
mod supervisor;

pub use registry::{DriverFactory, DriverRegistry};
pub use supervisor::Supervisor;
