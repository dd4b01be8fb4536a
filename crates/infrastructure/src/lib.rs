//! Infrastructure layer - External integrations: protocol drivers, the
//! store-and-forward buffer's SQLite backing, and configuration
//! loading.

pub mod config;
pub mod drivers;
pub mod persistence;

pub use config::GatewayConfig;
pub use drivers::build_driver;
pub use persistence::SqliteStore;
