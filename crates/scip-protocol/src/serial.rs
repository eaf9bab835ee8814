//! Serial Port Transport
//!
//! Blocking `Transport` over the `serialport` crate, configured 8N1 with no
//! flow control.

use crate::error::ScipError;
use crate::transport::{BaudRate, Transport};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;
use tracing::{debug, info};

/// Port timeout used until the first `receive` sets its own
const OPEN_TIMEOUT_MS: u64 = 100;

/// Serial device transport (e.g. "/dev/ttyACM0" or "COM3")
#[derive(Default)]
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    device: String,
}

impl SerialTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Path of the currently or last opened device
    pub fn device(&self) -> &str {
        &self.device
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>, ScipError> {
        self.port.as_mut().ok_or(ScipError::NotConnected)
    }
}

impl Transport for SerialTransport {
    fn connect(&mut self, device: &str, baud: u32) -> Result<(), ScipError> {
        let baud = BaudRate::from_u32(baud)?;
        info!("Opening {} at {} baud", device, baud.as_u32());

        let port = serialport::new(device, baud.as_u32())
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(OPEN_TIMEOUT_MS))
            .open()?;

        self.port = Some(port);
        self.device = device.to_string();
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.port.take().is_some() {
            info!("Closed {}", self.device);
        }
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<(), ScipError> {
        let baud = BaudRate::from_u32(baud)?;
        let port = self.port_mut()?;
        port.set_baud_rate(baud.as_u32())?;
        port.clear(ClearBuffer::All)?;
        debug!("Host baud rate set to {}", baud.as_u32());
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<usize, ScipError> {
        let port = self.port_mut()?;
        port.write_all(data)?;
        Ok(data.len())
    }

    fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, ScipError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let port = self.port_mut()?;

        if timeout.is_zero() {
            let available = port.bytes_to_read()? as usize;
            if available == 0 {
                return Ok(0);
            }
            let want = available.min(buf.len());
            return match port.read(&mut buf[..want]) {
                Ok(n) => Ok(n),
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => Ok(0),
                Err(e) => Err(e.into()),
            };
        }

        port.set_timeout(timeout)?;
        match port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn purge(&mut self) -> Result<(), ScipError> {
        self.port_mut()?.clear(ClearBuffer::All)?;
        Ok(())
    }
}
