use log::{error, info};
use serialport::{ClearBuffer, SerialPort};
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use crate::config::settings::ParityConfig;
use crate::utils::error::RelayError;

/// Raw duplex byte channel under the Modbus client.
///
/// The client opens the transport lazily, so implementations must accept
/// `open` on an already open handle and `close` on a closed one.
pub trait Transport: Send {
    fn open(&mut self) -> Result<(), RelayError>;

    fn is_open(&self) -> bool;

    fn write(&mut self, bytes: &[u8]) -> Result<usize, RelayError>;

    /// Reads whatever is available within `timeout`. Returns 0 when nothing arrived.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, RelayError>;

    /// Drops stale input left over from an earlier exchange.
    fn clear_input(&mut self) -> Result<(), RelayError> {
        Ok(())
    }

    fn close(&mut self);
}

/// RS485 adapter driven through the `serialport` crate, 8 data bits, 1 stop bit.
pub struct SerialTransport {
    port_name: String,
    baud_rate: u32,
    parity: ParityConfig,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    pub fn new(port_name: &str, baud_rate: u32, parity: ParityConfig) -> Self {
        Self {
            port_name: port_name.to_string(),
            baud_rate,
            parity,
            port: None,
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>, RelayError> {
        let port_name = &self.port_name;
        self.port
            .as_mut()
            .ok_or_else(|| RelayError::TransportError(format!("Port {} is not open", port_name)))
    }
}

impl Transport for SerialTransport {
    fn open(&mut self) -> Result<(), RelayError> {
        if self.port.is_some() {
            return Ok(());
        }

        info!("🔌 Opening RS485 port: {}", self.port_name);
        info!("⚙️  Configuration: {} baud, {:?} parity, 8 data bits, 1 stop bit", self.baud_rate, self.parity);

        let serial_parity = match self.parity {
            ParityConfig::None => serialport::Parity::None,
            ParityConfig::Even => serialport::Parity::Even,
            ParityConfig::Odd => serialport::Parity::Odd,
        };

        let port = serialport::new(&self.port_name, self.baud_rate)
            .timeout(Duration::from_millis(200))
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serial_parity)
            .open()
            .map_err(|e| {
                error!("❌ Failed to open serial port {}: {}", self.port_name, e);
                RelayError::TransportError(format!("Failed to open port {}: {}", self.port_name, e))
            })?;

        self.port = Some(port);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, RelayError> {
        let port = self.port_mut()?;
        port.write_all(bytes)
            .map_err(|e| RelayError::TransportError(format!("Write failed: {}", e)))?;
        port.flush()
            .map_err(|e| RelayError::TransportError(format!("Flush failed: {}", e)))?;
        Ok(bytes.len())
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, RelayError> {
        let port = self.port_mut()?;
        port.set_timeout(timeout)?;

        match port.read(buf) {
            Ok(n) => Ok(n),
            Err(ref e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(RelayError::TransportError(format!("Read failed: {}", e))),
        }
    }

    fn clear_input(&mut self) -> Result<(), RelayError> {
        let port = self.port_mut()?;
        port.clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            info!("✅ RS485 port {} closed", self.port_name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_transport_starts_closed() {
        let transport = SerialTransport::new("/dev/ttyUSB0", 9600, ParityConfig::None);
        assert!(!transport.is_open());
        assert_eq!(transport.port_name(), "/dev/ttyUSB0");
    }

    #[test]
    fn io_on_closed_port_is_a_transport_error() {
        let mut transport = SerialTransport::new("/dev/ttyUSB0", 9600, ParityConfig::None);
        assert!(matches!(
            transport.write(&[0x01]),
            Err(RelayError::TransportError(_))
        ));
        let mut buf = [0u8; 8];
        assert!(matches!(
            transport.read(&mut buf, Duration::from_millis(1)),
            Err(RelayError::TransportError(_))
        ));
    }

    #[test]
    fn opening_a_missing_port_fails() {
        let mut transport = SerialTransport::new("/dev/does-not-exist-relay", 9600, ParityConfig::None);
        assert!(matches!(transport.open(), Err(RelayError::TransportError(_))));
        assert!(!transport.is_open());
    }
}
