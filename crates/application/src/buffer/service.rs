//! Store-and-forward buffer: accepts processed readings, tries a
//! synchronous write to the time-series sink, and falls back to
//! durable persistence when the sink is unavailable. A background
//! task periodically drains unsynced rows back out to the sink.
//!
//! Grounded on the teacher's `SQLiteBuffer`/`BufferedMqttPublisher`
//! pair: check connected, try the direct write, enqueue on failure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use domain::event::ValueEvent;
use domain::{BufferedReading, RelationalStore, TimeSeriesSink};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bus::ValueSubscriber;

const DEFAULT_GC_HORIZON_HOURS: i64 = 24;

pub struct BufferService {
    sink: Arc<dyn TimeSeriesSink>,
    store: Arc<dyn RelationalStore>,
    cloud_available: AtomicBool,
    batch_size: u32,
    gc_horizon_hours: i64,
}

impl BufferService {
    pub fn new(
        sink: Arc<dyn TimeSeriesSink>,
        store: Arc<dyn RelationalStore>,
        batch_size: u32,
    ) -> Self {
        Self {
            sink,
            store,
            cloud_available: AtomicBool::new(true),
            batch_size,
            gc_horizon_hours: DEFAULT_GC_HORIZON_HOURS,
        }
    }

    pub fn is_cloud_available(&self) -> bool {
        self.cloud_available.load(Ordering::SeqCst)
    }

    /// Accepts a processed reading. Tries a synchronous write first;
    /// on any failure (or when the sink is already believed
    /// unavailable) the reading is durably persisted unsynced instead
    /// of being dropped.
    pub async fn add(&self, reading: BufferedReading) -> Result<()> {
        if self.sink.is_connected() {
            match self.sink.write_point(&reading).await {
                Ok(()) => {
                    self.cloud_available.store(true, Ordering::SeqCst);
                    return Ok(());
                }
                Err(err) => {
                    warn!(error = %err, "direct sink write failed, persisting to buffer");
                }
            }
        }
        self.cloud_available.store(false, Ordering::SeqCst);
        self.store.append(reading).await?;
        Ok(())
    }

    /// Drains up to `batch_size` unsynced rows, oldest first, and
    /// submits them as a batch. Returns the number of rows
    /// successfully synced.
    pub async fn flush(&self) -> Result<u64> {
        let batch = self.store.select_unsynced_ordered(self.batch_size).await?;
        if batch.is_empty() {
            self.cloud_available.store(true, Ordering::SeqCst);
            return Ok(0);
        }

        match self.sink.write_batch(&batch).await {
            Ok(()) => {
                let synced_at = Utc::now();
                let mut synced = 0u64;
                for reading in &batch {
                    if let Some(id) = reading.id {
                        self.store.mark_synced(id, synced_at).await?;
                        synced += 1;
                    }
                }
                self.cloud_available.store(true, Ordering::SeqCst);
                info!(count = synced, "flushed buffered readings");
                Ok(synced)
            }
            Err(err) => {
                self.cloud_available.store(false, Ordering::SeqCst);
                warn!(error = %err, count = batch.len(), "flush failed, leaving rows unsynced");
                Ok(0)
            }
        }
    }

    /// Deletes synced rows older than the configured retention
    /// horizon, default 24 hours.
    pub async fn garbage_collect(&self) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::hours(self.gc_horizon_hours);
        let deleted = self.store.delete_synced_older_than(cutoff).await?;
        if deleted > 0 {
            info!(count = deleted, "garbage collected synced readings");
        }
        Ok(deleted)
    }

    /// Runs `flush` on a fixed interval until cancelled.
    pub async fn run_drain_loop(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = self.flush().await {
                        warn!(error = %err, "scheduled flush failed");
                    }
                }
            }
        }
    }

    /// Best-effort final flush, called during graceful shutdown.
    /// Errors are logged, not propagated, since there is nothing left
    /// to do with them at shutdown time.
    pub async fn flush_on_shutdown(&self) {
        if let Err(err) = self.flush().await {
            warn!(error = %err, "final flush on shutdown failed");
        }
    }
}

#[async_trait]
impl ValueSubscriber for BufferService {
    async fn on_value(&self, event: &ValueEvent) {
        let reading = BufferedReading::new(
            event.sensor_id,
            &event.sensor_name,
            event.timestamp,
            event.value,
            event.raw_value,
        );
        if let Err(err) = self.add(reading).await {
            warn!(sensor = %event.sensor_name, error = %err, "failed to accept reading into buffer");
        }
    }
}
