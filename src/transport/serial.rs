//! RS-232 / USB serial connector.
//!
//! Balances are reached at 8N1, no flow control, at the configured baud rate
//! (9600 by default). Opening happens on the blocking pool so the runtime is
//! never stalled by a slow driver.

use super::{Connector, DynSerial};
use crate::device::PortInfo;
use crate::error::AppResult;
#[cfg(not(feature = "instrument_serial"))]
use crate::error::DaqError;
use async_trait::async_trait;

/// Default balance baud rate.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Connector for physical serial ports.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    baud_rate: u32,
}

impl Default for SerialConnector {
    fn default() -> Self {
        Self::new(DEFAULT_BAUD_RATE)
    }
}

impl SerialConnector {
    /// Creates a connector using `baud_rate`.
    pub fn new(baud_rate: u32) -> Self {
        Self { baud_rate }
    }
}

#[cfg(feature = "instrument_serial")]
#[async_trait]
impl Connector for SerialConnector {
    async fn connect(&self, identifier: &str) -> AppResult<DynSerial> {
        use crate::error::DaqError;
        use tokio::io::AsyncWriteExt;
        use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt};

        let path = identifier.to_string();
        let baud_rate = self.baud_rate;

        let mut port = tokio::task::spawn_blocking(move || {
            tokio_serial::new(&path, baud_rate)
                .data_bits(tokio_serial::DataBits::Eight)
                .parity(tokio_serial::Parity::None)
                .stop_bits(tokio_serial::StopBits::One)
                .flow_control(tokio_serial::FlowControl::None)
                .open_native_async()
        })
        .await
        .map_err(|e| DaqError::connection(identifier, format!("open task failed: {e}")))?
        .map_err(|e| DaqError::connection(identifier, e))?;

        port.clear(ClearBuffer::All)
            .map_err(|e| DaqError::connection(identifier, e))?;
        AsyncWriteExt::flush(&mut port)
            .await
            .map_err(|e| DaqError::connection(identifier, e))?;

        tracing::info!(port = identifier, baud_rate, "Opened serial port");
        Ok(Box::new(port))
    }

    fn list_ports(&self) -> AppResult<Vec<PortInfo>> {
        use crate::error::DaqError;
        use tokio_serial::SerialPortType;

        let ports = tokio_serial::available_ports()
            .map_err(|e| DaqError::connection("<enumeration>", e))?;

        Ok(ports
            .into_iter()
            .map(|p| {
                let description = match &p.port_type {
                    SerialPortType::UsbPort(usb) => usb
                        .product
                        .clone()
                        .unwrap_or_else(|| "USB Serial Device".to_string()),
                    SerialPortType::BluetoothPort => "Bluetooth Serial".to_string(),
                    SerialPortType::PciPort => "PCI Serial".to_string(),
                    SerialPortType::Unknown => "Serial Port".to_string(),
                };
                PortInfo::new(p.port_name, description)
            })
            .collect())
    }
}

#[cfg(not(feature = "instrument_serial"))]
#[async_trait]
impl Connector for SerialConnector {
    async fn connect(&self, _identifier: &str) -> AppResult<DynSerial> {
        Err(DaqError::SerialFeatureDisabled)
    }

    fn list_ports(&self) -> AppResult<Vec<PortInfo>> {
        Err(DaqError::SerialFeatureDisabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_port_is_a_connection_error() {
        let connector = SerialConnector::default();
        let result = connector.connect("/dev/this-port-does-not-exist").await;
        assert!(result.is_err());
    }
}
