use serde::{Deserialize, Serialize};

/// Which protocol driver backs a sensor definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "MODBUS_TCP")]
    ModbusTcp,
    #[serde(rename = "MODBUS_RTU")]
    ModbusRtu,
    #[serde(rename = "CAN")]
    Can,
    #[serde(rename = "MQTT")]
    Mqtt,
    #[serde(rename = "SYSTEM")]
    System,
    #[serde(rename = "VIRTUAL_OUTPUT")]
    VirtualOutput,
}

impl Protocol {
    /// Whether this protocol's driver is event-driven (delivers values
    /// from a side task) rather than polled on the supervisor cadence.
    pub fn is_event_driven(&self) -> bool {
        matches!(self, Self::Mqtt | Self::Can | Self::VirtualOutput)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ModbusTcp => "MODBUS_TCP",
            Self::ModbusRtu => "MODBUS_RTU",
            Self::Can => "CAN",
            Self::Mqtt => "MQTT",
            Self::System => "SYSTEM",
            Self::VirtualOutput => "VIRTUAL_OUTPUT",
        }
    }
}
