use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use domain::driver::Driver;
use domain::error::DriverError;
use serde::{Deserialize, Serialize};
use socketcan::tokio::CanSocket;
use socketcan::{CanFrame, EmbeddedFrame, Id, StandardId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

fn default_byte_order() -> ByteOrder {
    ByteOrder::BigEndian
}
fn default_scale() -> f64 {
    1.0
}
fn default_offset() -> f64 {
    0.0
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    BigEndian,
    LittleEndian,
}

/// A lightweight DBC-lite signal decode: a byte range within the
/// frame's payload, interpreted as an unsigned integer and mapped to
/// a physical value via `scale`/`offset`. A full DBC parser is out of
/// scope; this covers the common "slice of bytes -> linear scaling"
/// signal shape without requiring a `.dbc` file on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanConfig {
    pub interface: String,
    pub can_id: u32,
    pub start_byte: usize,
    pub length_bytes: usize,
    #[serde(default = "default_byte_order")]
    pub byte_order: ByteOrder,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default = "default_offset")]
    pub offset: f64,
}

fn decode_signal(frame_data: &[u8], config: &CanConfig) -> Option<f64> {
    let end = config.start_byte.checked_add(config.length_bytes)?;
    let slice = frame_data.get(config.start_byte..end)?;
    let mut raw: u64 = 0;
    match config.byte_order {
        ByteOrder::BigEndian => {
            for byte in slice {
                raw = (raw << 8) | *byte as u64;
            }
        }
        ByteOrder::LittleEndian => {
            for byte in slice.iter().rev() {
                raw = (raw << 8) | *byte as u64;
            }
        }
    }
    Some(raw as f64 * config.scale + config.offset)
}

/// Reads one signal out of a CAN bus. Connection spawns a background
/// task draining the socket and memoizing the latest decoded value
/// for `config.can_id`; `read` returns that memo rather than blocking
/// on the bus directly, matching the other event-driven drivers.
pub struct CanDriver {
    config: CanConfig,
    latest_bits: Arc<AtomicU64>,
    has_value: Arc<AtomicBool>,
    listener: Option<JoinHandle<()>>,
    stop_tx: Option<mpsc::Sender<()>>,
}

impl CanDriver {
    pub fn new(config: CanConfig) -> Self {
        Self {
            config,
            latest_bits: Arc::new(AtomicU64::new(0)),
            has_value: Arc::new(AtomicBool::new(false)),
            listener: None,
            stop_tx: None,
        }
    }
}

#[async_trait]
impl Driver for CanDriver {
    async fn connect(&mut self) -> Result<(), DriverError> {
        if self.listener.is_some() {
            return Ok(());
        }

        let socket = CanSocket::open(&self.config.interface)
            .map_err(|e| DriverError::Connection(format!("failed to open {}: {e}", self.config.interface)))?;

        let target_id = Id::Standard(
            StandardId::new(self.config.can_id as u16)
                .ok_or_else(|| DriverError::InvalidConfig(format!("invalid CAN id {}", self.config.can_id)))?,
        );

        let config = self.config.clone();
        let latest_bits = self.latest_bits.clone();
        let has_value = self.has_value.clone();
        let (stop_tx, mut stop_rx) = mpsc::channel(1);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_rx.recv() => break,
                    frame = socket.read_frame() => {
                        match frame {
                            Ok(CanFrame::Data(data_frame)) if data_frame.id() == target_id => {
                                if let Some(value) = decode_signal(data_frame.data(), &config) {
                                    latest_bits.store(value.to_bits(), Ordering::SeqCst);
                                    has_value.store(true, Ordering::SeqCst);
                                }
                            }
                            Ok(_) => {}
                            Err(err) => {
                                warn!(interface = %config.interface, error = %err, "CAN read error");
                            }
                        }
                    }
                }
            }
        });

        self.listener = Some(handle);
        self.stop_tx = Some(stop_tx);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), DriverError> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(()).await;
        }
        if let Some(handle) = self.listener.take() {
            handle.abort();
        }
        Ok(())
    }

    async fn read(&mut self) -> Result<f64, DriverError> {
        if !self.has_value.load(Ordering::SeqCst) {
            return Err(DriverError::Read("no CAN frame received yet".into()));
        }
        Ok(f64::from_bits(self.latest_bits.load(Ordering::SeqCst)))
    }

    fn is_event_driven(&self) -> bool {
        true
    }
}
