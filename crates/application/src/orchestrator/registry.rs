//! Single-owner driver registry: every hot add/remove/restart request
//! flows through one task that owns the `HashMap` of running
//! supervisors, avoiding the need for locking around the map itself.
//! Adapted from `DeviceManager`'s one-task-per-actor tracking, traded
//! down from its `JoinHandle` abort-all shutdown to per-sensor
//! cancellation tokens so a single sensor can be restarted without
//! disturbing its neighbours.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use domain::driver::Driver;
use domain::sensor::{DriverStatus, SensorDefinition, SensorId};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::bus::EventBus;

use super::supervisor::Supervisor;

struct RunningDriver {
    definition: SensorDefinition,
    handle: JoinHandle<()>,
    cancel: CancellationToken,
    status: Arc<AsyncMutex<DriverStatus>>,
    driver: Arc<AsyncMutex<Box<dyn Driver>>>,
}

/// A constructor for the concrete `Driver` implementation matching a
/// sensor's protocol. Supplied by the infrastructure layer so the
/// registry itself stays protocol-agnostic.
pub type DriverFactory = Arc<dyn Fn(&SensorDefinition) -> Result<Box<dyn Driver>> + Send + Sync>;

pub struct DriverRegistry {
    bus: Arc<EventBus>,
    factory: DriverFactory,
    running: AsyncMutex<HashMap<SensorId, RunningDriver>>,
}

impl DriverRegistry {
    pub fn new(bus: Arc<EventBus>, factory: DriverFactory) -> Self {
        Self {
            bus,
            factory,
            running: AsyncMutex::new(HashMap::new()),
        }
    }

    /// Adds and starts a new sensor's driver. If the sensor id is
    /// already registered, the existing driver is stopped first (same
    /// as calling `remove`), then the new one takes its place.
    pub async fn add(&self, definition: SensorDefinition) -> Result<()> {
        definition.validate()?;
        let _ = self.remove(definition.sensor_id).await;
        let mut running = self.running.lock().await;
        let driver = (self.factory)(&definition)?;
        let (supervisor, cancel) = Supervisor::new(definition.clone(), driver, self.bus.clone());
        let status = supervisor.status_handle();
        let driver_handle = supervisor.driver_handle();
        let sensor_id = definition.sensor_id;
        let handle = tokio::spawn(supervisor.run());
        running.insert(
            sensor_id,
            RunningDriver {
                definition,
                handle,
                cancel,
                status,
                driver: driver_handle,
            },
        );
        info!(sensor_id = %sensor_id, "driver started");
        Ok(())
    }

    /// Cancels and removes a running sensor's driver. Waits for the
    /// supervisor task to observe cancellation and exit before
    /// returning, so the caller can safely reuse the sensor id
    /// immediately afterwards.
    pub async fn remove(&self, sensor_id: SensorId) -> Result<()> {
        let entry = {
            let mut running = self.running.lock().await;
            running
                .remove(&sensor_id)
                .ok_or_else(|| anyhow!("sensor {sensor_id} is not registered"))?
        };
        entry.cancel.cancel();
        let _ = entry.handle.await;
        info!(sensor_id = %sensor_id, "driver stopped");
        Ok(())
    }

    /// Stops and restarts a sensor's driver, re-reading its
    /// definition (which may have changed, e.g. a new poll interval
    /// or formula). `add` already replaces an existing registration
    /// under the same id, so this is just that path under its more
    /// specific name.
    pub async fn restart(&self, definition: SensorDefinition) -> Result<()> {
        self.add(definition).await
    }

    pub async fn status(&self, sensor_id: SensorId) -> Option<DriverStatus> {
        let running = self.running.lock().await;
        let entry = running.get(&sensor_id)?;
        Some(entry.status.lock().await.clone())
    }

    pub async fn all_status(&self) -> HashMap<SensorId, DriverStatus> {
        let running = self.running.lock().await;
        let mut result = HashMap::new();
        for (sensor_id, entry) in running.iter() {
            result.insert(*sensor_id, entry.status.lock().await.clone());
        }
        result
    }

    /// Writes a value to an actuator sensor's driver, used by the
    /// automation engine when a rule's condition fires.
    pub async fn write(&self, sensor_id: SensorId, value: f64) -> Result<()> {
        let running = self.running.lock().await;
        let entry = running
            .get(&sensor_id)
            .ok_or_else(|| anyhow!("sensor {sensor_id} is not registered"))?;
        entry.driver.lock().await.write(value).await?;
        Ok(())
    }

    pub async fn definitions(&self) -> Vec<SensorDefinition> {
        self.running
            .lock()
            .await
            .values()
            .map(|e| e.definition.clone())
            .collect()
    }

    /// Cancels every running driver and waits for them to stop, for
    /// graceful shutdown.
    pub async fn shutdown(&self) {
        let mut running = self.running.lock().await;
        for (_, entry) in running.drain() {
            entry.cancel.cancel();
            let _ = entry.handle.await;
        }
    }
}
