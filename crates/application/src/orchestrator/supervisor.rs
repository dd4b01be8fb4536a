//! One supervised task per sensor: connects its driver, polls (or, for
//! event-driven protocols, just watches connection health), runs the
//! data formula, and publishes the resulting events on the bus.
//!
//! Adapted from `DeviceActor::run()`'s poll-loop shape down to a
//! single scalar per driver instead of a batch of tags.

use std::sync::Arc;
use std::time::Duration;

use domain::driver::{Driver, DriverState};
use domain::event::{ErrorEvent, StatusEvent, ValueEvent};
use domain::sensor::{DriverStatus, SensorDefinition};
use domain::{formula, DriverError};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bus::EventBus;

pub struct Supervisor {
    definition: SensorDefinition,
    driver: Arc<AsyncMutex<Box<dyn Driver>>>,
    bus: Arc<EventBus>,
    status: Arc<AsyncMutex<DriverStatus>>,
    cancel: CancellationToken,
}

impl Supervisor {
    pub fn new(
        definition: SensorDefinition,
        driver: Box<dyn Driver>,
        bus: Arc<EventBus>,
    ) -> (Self, CancellationToken) {
        let cancel = CancellationToken::new();
        let status = Arc::new(AsyncMutex::new(DriverStatus::stopped()));
        (
            Self {
                definition,
                driver: Arc::new(AsyncMutex::new(driver)),
                bus,
                status,
                cancel: cancel.clone(),
            },
            cancel,
        )
    }

    pub fn status_handle(&self) -> Arc<AsyncMutex<DriverStatus>> {
        self.status.clone()
    }

    pub fn driver_handle(&self) -> Arc<AsyncMutex<Box<dyn Driver>>> {
        self.driver.clone()
    }

    async fn set_state(&self, new_state: DriverState) {
        let mut status = self.status.lock().await;
        let previous = status.state;
        if previous != new_state {
            status.state = new_state;
            status.running = new_state.is_running();
            status.connected = new_state.is_online();
            drop(status);
            self.bus
                .publish_status(StatusEvent::new(
                    self.definition.sensor_id,
                    &self.definition.sensor_name,
                    previous,
                    new_state,
                ))
                .await;
        }
    }

    /// Applies a checked state transition, ignoring (and logging) any
    /// transition the state machine doesn't allow from the current
    /// state rather than forcing it.
    async fn transition(&self, f: impl FnOnce(&DriverState) -> Result<DriverState, &'static str>) {
        let current = self.status.lock().await.state;
        match f(&current) {
            Ok(next) => self.set_state(next).await,
            Err(reason) => {
                warn!(sensor = %self.definition.sensor_name, ?current, reason, "ignoring invalid driver state transition")
            }
        }
    }

    /// Runs until cancelled. Connection failures retry up to
    /// `retry_count` times with the configured timeout before the
    /// driver settles into `Offline`.
    pub async fn run(self) {
        self.transition(DriverState::to_connecting).await;

        if !self.connect_with_retries().await {
            self.transition(DriverState::to_offline).await;
        }

        // Event-driven drivers (MQTT, CAN, virtual-output) keep a
        // memoized last value fed by their own internal side task;
        // `read` surfaces whatever is cached rather than performing a
        // fresh transaction. Polling them on the same cadence as
        // transactional drivers still works, it just becomes a cheap
        // cache read instead of a protocol round trip.
        let poll_interval = Duration::from_millis(self.definition.poll_interval_ms);
        let mut ticker = tokio::time::interval(poll_interval);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!(sensor = %self.definition.sensor_name, "supervisor cancelled, stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
            }
        }

        let _ = self.driver.lock().await.disconnect().await;
        self.set_state(DriverState::Stopped).await;
    }

    async fn connect_with_retries(&self) -> bool {
        let timeout = Duration::from_millis(self.definition.timeout_ms);
        for attempt in 1..=self.definition.retry_count {
            let result = tokio::time::timeout(timeout, async {
                self.driver.lock().await.connect().await
            })
            .await;
            match result {
                Ok(Ok(())) => {
                    self.transition(DriverState::to_online).await;
                    return true;
                }
                Ok(Err(err)) => {
                    warn!(sensor = %self.definition.sensor_name, attempt, error = %err, "connect failed");
                }
                Err(_) => {
                    warn!(sensor = %self.definition.sensor_name, attempt, "connect timed out");
                }
            }
        }
        false
    }

    async fn poll_once(&self) {
        if self.status.lock().await.state == DriverState::Offline && !self.reconnect_once().await {
            return;
        }

        let timeout = Duration::from_millis(self.definition.timeout_ms);
        let read_result = tokio::time::timeout(timeout, async {
            self.driver.lock().await.read().await
        })
        .await;

        match read_result {
            Ok(Ok(raw_value)) => {
                self.status.lock().await.consecutive_error_count = 0;
                self.handle_reading(raw_value).await;
                self.transition(DriverState::to_online).await;
            }
            Ok(Err(err)) => self.handle_error(err).await,
            Err(_) => self.handle_error(DriverError::Timeout).await,
        }
    }

    /// Attempts a single reconnect when the driver has gone OFFLINE,
    /// rather than retrying `read` against a dead session. On success
    /// the driver goes straight back ONLINE and the caller proceeds to
    /// read in the same poll tick; on failure it stays OFFLINE and the
    /// next tick's poll retries, one interval later.
    async fn reconnect_once(&self) -> bool {
        let timeout = Duration::from_millis(self.definition.timeout_ms);
        let result = tokio::time::timeout(timeout, async {
            self.driver.lock().await.connect().await
        })
        .await;
        match result {
            Ok(Ok(())) => {
                self.status.lock().await.consecutive_error_count = 0;
                self.transition(DriverState::to_online).await;
                true
            }
            Ok(Err(err)) => {
                warn!(sensor = %self.definition.sensor_name, error = %err, "reconnect attempt failed, retrying next poll");
                false
            }
            Err(_) => {
                warn!(sensor = %self.definition.sensor_name, "reconnect attempt timed out, retrying next poll");
                false
            }
        }
    }

    /// Evaluates the sensor's data formula against a fresh raw reading
    /// and publishes the result. A formula failure is logged and
    /// reported on the error channel, but the raw value still goes out
    /// on the value channel as a fallback so a bad formula doesn't
    /// silently stop the data flow.
    async fn handle_reading(&self, raw_value: f64) {
        let value = match formula::evaluate(&self.definition.data_formula, raw_value) {
            Ok(value) => value,
            Err(err) => {
                self.bus
                    .publish_error(ErrorEvent::new(
                        self.definition.sensor_id,
                        &self.definition.sensor_name,
                        format!("formula evaluation failed: {err}"),
                    ))
                    .await;
                raw_value
            }
        };

        let mut status = self.status.lock().await;
        status.last_raw = Some(raw_value);
        status.last_processed = Some(value);
        status.last_seen_ts = Some(chrono::Utc::now());
        drop(status);
        self.bus
            .publish_value(ValueEvent::new(
                self.definition.sensor_id,
                &self.definition.sensor_name,
                raw_value,
                value,
            ))
            .await;
    }

    /// On a read/connect failure: increments the error counter and
    /// reports it, escalating to OFFLINE once `retry_count` consecutive
    /// failures have accumulated.
    async fn handle_error(&self, err: DriverError) {
        let error_count = {
            let mut status = self.status.lock().await;
            status.consecutive_error_count += 1;
            status.consecutive_error_count
        };
        self.bus
            .publish_error(ErrorEvent::new(
                self.definition.sensor_id,
                &self.definition.sensor_name,
                err.to_string(),
            ))
            .await;
        if error_count >= self.definition.retry_count {
            self.transition(DriverState::to_offline).await;
        } else {
            self.transition(DriverState::to_error).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use domain::sensor::{Protocol, SensorId};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::{sleep, Duration as TokioDuration};

    struct FakeDriver {
        connect_fails: u32,
        connect_attempts: AtomicU32,
        read_attempts: Arc<AtomicU32>,
        fail_reads: bool,
        value: f64,
    }

    #[async_trait]
    impl Driver for FakeDriver {
        async fn connect(&mut self) -> Result<(), DriverError> {
            let attempt = self.connect_attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.connect_fails {
                return Err(DriverError::Connection("simulated".into()));
            }
            Ok(())
        }

        async fn disconnect(&mut self) -> Result<(), DriverError> {
            Ok(())
        }

        async fn read(&mut self) -> Result<f64, DriverError> {
            self.read_attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail_reads {
                Err(DriverError::Read("simulated".into()))
            } else {
                Ok(self.value)
            }
        }
    }

    fn definition(formula: &str, retry_count: u32) -> SensorDefinition {
        SensorDefinition {
            sensor_id: SensorId::new(1),
            sensor_name: "temp1".into(),
            protocol: Protocol::System,
            connection_params: serde_json::json!({}),
            data_formula: formula.into(),
            poll_interval_ms: 50,
            timeout_ms: 1_000,
            retry_count,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn poll_once_applies_formula_and_publishes_value() {
        let bus = Arc::new(EventBus::new());
        let driver: Box<dyn Driver> = Box::new(FakeDriver {
            connect_fails: 0,
            connect_attempts: AtomicU32::new(0),
            read_attempts: Arc::new(AtomicU32::new(0)),
            fail_reads: false,
            value: 100.0,
        });
        let (supervisor, _cancel) = Supervisor::new(definition("val/10", 3), driver, bus);
        supervisor.poll_once().await;

        let status = supervisor.status_handle().lock().await.clone();
        assert_eq!(status.last_raw, Some(100.0));
        assert_eq!(status.last_processed, Some(10.0));
    }

    #[tokio::test]
    async fn formula_failure_still_publishes_raw_value_as_fallback() {
        let bus = Arc::new(EventBus::new());
        let driver: Box<dyn Driver> = Box::new(FakeDriver {
            connect_fails: 0,
            connect_attempts: AtomicU32::new(0),
            read_attempts: Arc::new(AtomicU32::new(0)),
            fail_reads: false,
            value: 5.0,
        });
        let (supervisor, _cancel) = Supervisor::new(definition("val/0", 3), driver, bus);
        supervisor.poll_once().await;

        let status = supervisor.status_handle().lock().await.clone();
        assert_eq!(status.last_raw, Some(5.0));
        assert_eq!(status.last_processed, Some(5.0));
    }

    #[tokio::test]
    async fn retry_exhaustion_escalates_to_offline() {
        let bus = Arc::new(EventBus::new());
        let driver: Box<dyn Driver> = Box::new(FakeDriver {
            connect_fails: 0,
            connect_attempts: AtomicU32::new(0),
            read_attempts: Arc::new(AtomicU32::new(0)),
            fail_reads: true,
            value: 0.0,
        });
        let (supervisor, _cancel) = Supervisor::new(definition("val", 3), driver, bus);
        supervisor.transition(DriverState::to_connecting).await;
        supervisor.transition(DriverState::to_online).await;

        supervisor.poll_once().await;
        supervisor.poll_once().await;
        assert_eq!(supervisor.status_handle().lock().await.state, DriverState::Error);

        supervisor.poll_once().await;
        assert_eq!(supervisor.status_handle().lock().await.state, DriverState::Offline);
    }

    #[tokio::test]
    async fn successful_read_after_offline_recovers_to_online() {
        let bus = Arc::new(EventBus::new());
        let driver: Box<dyn Driver> = Box::new(FakeDriver {
            connect_fails: 0,
            connect_attempts: AtomicU32::new(0),
            read_attempts: Arc::new(AtomicU32::new(0)),
            fail_reads: false,
            value: 1.0,
        });
        let (supervisor, _cancel) = Supervisor::new(definition("val", 1), driver, bus);
        supervisor.set_state(DriverState::Offline).await;

        supervisor.poll_once().await;
        assert_eq!(supervisor.status_handle().lock().await.state, DriverState::Online);
    }

    #[tokio::test]
    async fn offline_poll_reconnects_then_reads_in_the_same_tick() {
        let bus = Arc::new(EventBus::new());
        let read_attempts = Arc::new(AtomicU32::new(0));
        let driver: Box<dyn Driver> = Box::new(FakeDriver {
            connect_fails: 0,
            connect_attempts: AtomicU32::new(0),
            read_attempts: read_attempts.clone(),
            fail_reads: false,
            value: 7.0,
        });
        let (supervisor, _cancel) = Supervisor::new(definition("val", 1), driver, bus);
        supervisor.set_state(DriverState::Offline).await;

        supervisor.poll_once().await;

        assert_eq!(supervisor.status_handle().lock().await.state, DriverState::Online);
        let status = supervisor.status_handle().lock().await.clone();
        assert_eq!(status.last_processed, Some(7.0));
        assert_eq!(read_attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn offline_poll_skips_read_while_reconnect_keeps_failing() {
        let bus = Arc::new(EventBus::new());
        let read_attempts = Arc::new(AtomicU32::new(0));
        let driver: Box<dyn Driver> = Box::new(FakeDriver {
            connect_fails: 5,
            connect_attempts: AtomicU32::new(0),
            read_attempts: read_attempts.clone(),
            fail_reads: false,
            value: 7.0,
        });
        let (supervisor, _cancel) = Supervisor::new(definition("val", 1), driver, bus);
        supervisor.set_state(DriverState::Offline).await;

        supervisor.poll_once().await;

        assert_eq!(supervisor.status_handle().lock().await.state, DriverState::Offline);
        assert_eq!(
            read_attempts.load(Ordering::SeqCst),
            0,
            "read must not be attempted while reconnect keeps failing"
        );
    }

    #[tokio::test]
    async fn run_stops_cleanly_on_cancellation() {
        let bus = Arc::new(EventBus::new());
        let driver: Box<dyn Driver> = Box::new(FakeDriver {
            connect_fails: 0,
            connect_attempts: AtomicU32::new(0),
            read_attempts: Arc::new(AtomicU32::new(0)),
            fail_reads: false,
            value: 1.0,
        });
        let (supervisor, cancel) = Supervisor::new(definition("val", 3), driver, bus);
        let handle = tokio::spawn(supervisor.run());
        sleep(TokioDuration::from_millis(20)).await;
        cancel.cancel();
        handle.await.unwrap();
    }
}
