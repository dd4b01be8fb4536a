mod relational_store;
mod time_series_sink;

pub use relational_store::RelationalStore;
pub use time_series_sink::{InMemorySink, TimeSeriesSink};
#[cfg(any(test, feature = "mock"))]
pub use relational_store::MockRelationalStore;
#[cfg(any(test, feature = "mock"))]
pub use time_series_sink::MockTimeSeriesSink;
