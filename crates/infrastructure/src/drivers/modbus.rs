use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use domain::driver::Driver;
use domain::error::DriverError;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as TokioMutex;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;
use tokio_serial::SerialStream;

/// Shares one RTU serial connection across every driver instance
/// polling the same physical port, since only one client can own a
/// serial line at a time. Looked up by lowercased port name.
static SHARED_RTU_PORTS: std::sync::OnceLock<StdMutex<HashMap<String, Weak<TokioMutex<Context>>>>> =
    std::sync::OnceLock::new();

fn shared_rtu_ports() -> &'static StdMutex<HashMap<String, Weak<TokioMutex<Context>>>> {
    SHARED_RTU_PORTS.get_or_init(|| StdMutex::new(HashMap::new()))
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum RegisterType {
    Holding,
    Input,
    Coil,
    Discrete,
}

fn default_count() -> u16 {
    1
}
fn default_register_type() -> RegisterType {
    RegisterType::Holding
}
fn default_baud_rate() -> u32 {
    9600
}
fn default_data_bits() -> u8 {
    8
}
fn default_parity() -> String {
    "None".to_string()
}
fn default_stop_bits() -> u8 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ModbusTransport {
    Tcp { host: String, port: u16 },
    Rtu {
        serial_port: String,
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
        #[serde(default = "default_data_bits")]
        data_bits: u8,
        #[serde(default = "default_parity")]
        parity: String,
        #[serde(default = "default_stop_bits")]
        stop_bits: u8,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusConfig {
    #[serde(flatten)]
    pub transport: ModbusTransport,
    pub slave_id: u8,
    pub address: u16,
    #[serde(default = "default_count")]
    pub count: u16,
    #[serde(default = "default_register_type")]
    pub register_type: RegisterType,
}

impl ModbusConfig {
    fn parity(raw: &str) -> Result<tokio_serial::Parity, DriverError> {
        match raw {
            "None" => Ok(tokio_serial::Parity::None),
            "Even" => Ok(tokio_serial::Parity::Even),
            "Odd" => Ok(tokio_serial::Parity::Odd),
            other => Err(DriverError::InvalidConfig(format!(
                "invalid parity '{other}'"
            ))),
        }
    }

    fn stop_bits(raw: u8) -> Result<tokio_serial::StopBits, DriverError> {
        match raw {
            1 => Ok(tokio_serial::StopBits::One),
            2 => Ok(tokio_serial::StopBits::Two),
            other => Err(DriverError::InvalidConfig(format!(
                "invalid stop bits {other}"
            ))),
        }
    }

    fn data_bits(raw: u8) -> Result<tokio_serial::DataBits, DriverError> {
        match raw {
            5 => Ok(tokio_serial::DataBits::Five),
            6 => Ok(tokio_serial::DataBits::Six),
            7 => Ok(tokio_serial::DataBits::Seven),
            8 => Ok(tokio_serial::DataBits::Eight),
            other => Err(DriverError::InvalidConfig(format!(
                "invalid data bits {other}"
            ))),
        }
    }
}

pub struct ModbusDriver {
    config: ModbusConfig,
    context: Option<Arc<TokioMutex<Context>>>,
}

impl ModbusDriver {
    pub fn new(config: ModbusConfig) -> Self {
        Self {
            config,
            context: None,
        }
    }

    async fn connect_tcp(&self, host: &str, port: u16) -> Result<Context, DriverError> {
        let socket_addr = format!("{host}:{port}")
            .parse()
            .map_err(|e| DriverError::InvalidConfig(format!("invalid TCP address: {e}")))?;
        tokio_modbus::client::tcp::connect_slave(socket_addr, Slave(self.config.slave_id))
            .await
            .map_err(|e| DriverError::Connection(format!("TCP connect failed: {e}")))
    }

    async fn connect_rtu(
        &self,
        serial_port: &str,
        baud_rate: u32,
        data_bits: u8,
        parity: &str,
        stop_bits: u8,
    ) -> Result<Arc<TokioMutex<Context>>, DriverError> {
        let key = serial_port.to_lowercase();
        if let Some(ctx) = shared_rtu_ports().lock().unwrap().get(&key).and_then(Weak::upgrade) {
            return Ok(ctx);
        }

        let builder = tokio_serial::new(serial_port, baud_rate)
            .data_bits(ModbusConfig::data_bits(data_bits)?)
            .parity(ModbusConfig::parity(parity)?)
            .stop_bits(ModbusConfig::stop_bits(stop_bits)?);
        let port = SerialStream::open(&builder)
            .map_err(|e| DriverError::Connection(format!("failed to open {serial_port}: {e}")))?;
        let ctx = tokio_modbus::client::rtu::attach_slave(port, Slave(self.config.slave_id));
        let ctx = Arc::new(TokioMutex::new(ctx));
        shared_rtu_ports()
            .lock()
            .unwrap()
            .insert(key, Arc::downgrade(&ctx));
        Ok(ctx)
    }
}

#[async_trait]
impl Driver for ModbusDriver {
    async fn connect(&mut self) -> Result<(), DriverError> {
        let ctx = match &self.config.transport {
            ModbusTransport::Tcp { host, port } => {
                Arc::new(TokioMutex::new(self.connect_tcp(host, *port).await?))
            }
            ModbusTransport::Rtu {
                serial_port,
                baud_rate,
                data_bits,
                parity,
                stop_bits,
            } => {
                self.connect_rtu(serial_port, *baud_rate, *data_bits, parity, *stop_bits)
                    .await?
            }
        };
        self.context = Some(ctx);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), DriverError> {
        self.context = None;
        Ok(())
    }

    async fn read(&mut self) -> Result<f64, DriverError> {
        let ctx_arc = self
            .context
            .as_ref()
            .ok_or_else(|| DriverError::Connection("not connected".into()))?;
        let mut ctx = ctx_arc.lock().await;
        ctx.set_slave(Slave(self.config.slave_id));

        let registers: Vec<u16> = match self.config.register_type {
            RegisterType::Holding => ctx
                .read_holding_registers(self.config.address, self.config.count)
                .await
                .map_err(|e| DriverError::Read(format!("transport error: {e}")))?
                .map_err(|e| DriverError::Read(format!("modbus exception: {e}")))?,
            RegisterType::Input => ctx
                .read_input_registers(self.config.address, self.config.count)
                .await
                .map_err(|e| DriverError::Read(format!("transport error: {e}")))?
                .map_err(|e| DriverError::Read(format!("modbus exception: {e}")))?,
            RegisterType::Coil => {
                let bits = ctx
                    .read_coils(self.config.address, self.config.count)
                    .await
                    .map_err(|e| DriverError::Read(format!("transport error: {e}")))?
                    .map_err(|e| DriverError::Read(format!("modbus exception: {e}")))?;
                return Ok(if bits.first().copied().unwrap_or(false) {
                    1.0
                } else {
                    0.0
                });
            }
            RegisterType::Discrete => {
                let bits = ctx
                    .read_discrete_inputs(self.config.address, self.config.count)
                    .await
                    .map_err(|e| DriverError::Read(format!("transport error: {e}")))?
                    .map_err(|e| DriverError::Read(format!("modbus exception: {e}")))?;
                return Ok(if bits.first().copied().unwrap_or(false) {
                    1.0
                } else {
                    0.0
                });
            }
        };

        Ok(registers_to_value(&registers))
    }

    async fn write(&mut self, value: f64) -> Result<(), DriverError> {
        let ctx_arc = self
            .context
            .as_ref()
            .ok_or_else(|| DriverError::Connection("not connected".into()))?;
        let mut ctx = ctx_arc.lock().await;
        ctx.set_slave(Slave(self.config.slave_id));

        match self.config.register_type {
            RegisterType::Holding => ctx
                .write_single_register(self.config.address, value as u16)
                .await
                .map_err(|e| DriverError::Write(format!("transport error: {e}")))?
                .map_err(|e| DriverError::Write(format!("modbus exception: {e}")))?,
            RegisterType::Coil => ctx
                .write_single_coil(self.config.address, value != 0.0)
                .await
                .map_err(|e| DriverError::Write(format!("transport error: {e}")))?
                .map_err(|e| DriverError::Write(format!("modbus exception: {e}")))?,
            RegisterType::Input | RegisterType::Discrete => {
                return Err(DriverError::UnsupportedWrite);
            }
        }
        Ok(())
    }
}

/// Combines up to two 16-bit registers, big-endian, into a scalar.
/// One register is returned as-is; two are combined into a 32-bit
/// unsigned value.
fn registers_to_value(registers: &[u16]) -> f64 {
    match registers {
        [single] => *single as f64,
        [high, low, ..] => (((*high as u32) << 16) | *low as u32) as f64,
        [] => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_register_passes_through() {
        assert_eq!(registers_to_value(&[42]), 42.0);
    }

    #[test]
    fn two_registers_combine_big_endian() {
        assert_eq!(registers_to_value(&[0x0001, 0x0000]), 65536.0);
    }

    #[test]
    fn parses_tcp_config() {
        let json = serde_json::json!({
            "mode": "tcp",
            "host": "10.0.0.5",
            "port": 502,
            "slave_id": 1,
            "address": 100,
            "count": 2,
            "register_type": "Holding"
        });
        let config: ModbusConfig = serde_json::from_value(json).unwrap();
        assert!(matches!(config.transport, ModbusTransport::Tcp { .. }));
    }

    #[test]
    fn parses_rtu_config_with_defaults() {
        let json = serde_json::json!({
            "mode": "rtu",
            "serial_port": "/dev/ttyUSB0",
            "slave_id": 3,
            "address": 0,
        });
        let config: ModbusConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.count, 1);
        assert_eq!(config.register_type, RegisterType::Holding);
        if let ModbusTransport::Rtu { baud_rate, .. } = config.transport {
            assert_eq!(baud_rate, 9600);
        } else {
            panic!("expected RTU transport");
        }
    }
}
