use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::buffer::BufferedReading;
use crate::error::DriverError;

/// The outbound interface contract for the relational metadata store
/// the store-and-forward buffer persists unsynced readings to.
/// Implementing the full store (sensors, users, config versions) is
/// out of scope here; only this slice of its contract matters to the
/// gateway core.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait RelationalStore: Send + Sync {
    async fn append(&self, reading: BufferedReading) -> Result<i64, DriverError>;

    async fn select_unsynced_ordered(
        &self,
        limit: u32,
    ) -> Result<Vec<BufferedReading>, DriverError>;

    async fn mark_synced(&self, id: i64, synced_at: DateTime<Utc>) -> Result<(), DriverError>;

    async fn delete_synced_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, DriverError>;

    async fn count_unsynced(&self) -> Result<u64, DriverError>;

    async fn count_synced(&self) -> Result<u64, DriverError>;
}
