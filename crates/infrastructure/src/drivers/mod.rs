pub mod can;
pub mod modbus;
pub mod mqtt;
pub mod system;
pub mod virtual_output;

use anyhow::{anyhow, Result};
use domain::driver::Driver;
use domain::sensor::{Protocol, SensorDefinition};

/// Resolves a `SensorDefinition`'s `connection_params` into a concrete
/// `Driver` matching its protocol. Mirrors the teacher's
/// `DriverFactory::create_driver` dispatch, keyed on this gateway's
/// `Protocol` enum instead of its SCADA driver-type enum.
pub fn build_driver(definition: &SensorDefinition) -> Result<Box<dyn Driver>> {
    match definition.protocol {
        Protocol::ModbusTcp | Protocol::ModbusRtu => {
            let config: modbus::ModbusConfig =
                serde_json::from_value(definition.connection_params.clone()).map_err(|e| {
                    anyhow!("invalid modbus config for {}: {e}", definition.sensor_name)
                })?;
            Ok(Box::new(modbus::ModbusDriver::new(config)))
        }
        Protocol::Can => {
            let config: can::CanConfig = serde_json::from_value(definition.connection_params.clone())
                .map_err(|e| anyhow!("invalid CAN config for {}: {e}", definition.sensor_name))?;
            Ok(Box::new(can::CanDriver::new(config)))
        }
        Protocol::Mqtt => {
            let config: mqtt::MqttConfig =
                serde_json::from_value(definition.connection_params.clone())
                    .map_err(|e| anyhow!("invalid MQTT config for {}: {e}", definition.sensor_name))?;
            Ok(Box::new(mqtt::MqttDriver::new(config)))
        }
        Protocol::System => {
            let config: system::SystemConfig =
                serde_json::from_value(definition.connection_params.clone())
                    .map_err(|e| anyhow!("invalid system config for {}: {e}", definition.sensor_name))?;
            Ok(Box::new(system::SystemDriver::new(config)))
        }
        Protocol::VirtualOutput => {
            let config: virtual_output::VirtualOutputConfig =
                serde_json::from_value(definition.connection_params.clone())
                    .unwrap_or(virtual_output::VirtualOutputConfig { initial_value: None });
            Ok(Box::new(virtual_output::VirtualOutputDriver::new(config)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::sensor::SensorId;

    fn definition(protocol: Protocol, connection_params: serde_json::Value) -> SensorDefinition {
        SensorDefinition {
            sensor_id: SensorId::new(1),
            sensor_name: "sensor1".into(),
            protocol,
            connection_params,
            data_formula: "val".into(),
            poll_interval_ms: 1000,
            timeout_ms: 2000,
            retry_count: 3,
            is_active: true,
        }
    }

    #[test]
    fn builds_virtual_output_driver_with_default_config() {
        let def = definition(Protocol::VirtualOutput, serde_json::json!({}));
        assert!(build_driver(&def).is_ok());
    }

    #[test]
    fn rejects_malformed_modbus_config() {
        let def = definition(Protocol::ModbusTcp, serde_json::json!({"not": "valid"}));
        assert!(build_driver(&def).is_err());
    }

    #[test]
    fn builds_modbus_driver_from_valid_tcp_config() {
        let def = definition(
            Protocol::ModbusTcp,
            serde_json::json!({
                "mode": "tcp",
                "host": "10.0.0.5",
                "port": 502,
                "slave_id": 1,
                "address": 0
            }),
        );
        assert!(build_driver(&def).is_ok());
    }
}
