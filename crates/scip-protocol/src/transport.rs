//! Byte Transport Abstraction

use crate::error::ScipError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Serial baud rates the sensor family understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BaudRate {
    B4800,
    B9600,
    B19200,
    B38400,
    B57600,
    B115200,
}

impl BaudRate {
    /// Every supported rate, slowest first
    pub const ALL: [BaudRate; 6] = [
        BaudRate::B4800,
        BaudRate::B9600,
        BaudRate::B19200,
        BaudRate::B38400,
        BaudRate::B57600,
        BaudRate::B115200,
    ];

    /// Rate in bits per second
    pub fn as_u32(&self) -> u32 {
        match self {
            BaudRate::B4800 => 4800,
            BaudRate::B9600 => 9600,
            BaudRate::B19200 => 19200,
            BaudRate::B38400 => 38400,
            BaudRate::B57600 => 57600,
            BaudRate::B115200 => 115200,
        }
    }

    /// Look up a supported rate
    pub fn from_u32(baud: u32) -> Result<Self, ScipError> {
        Self::ALL
            .iter()
            .copied()
            .find(|b| b.as_u32() == baud)
            .ok_or(ScipError::UnsupportedBaudRate(baud))
    }
}

impl Default for BaudRate {
    fn default() -> Self {
        BaudRate::B115200
    }
}

/// Platform byte transport consumed by the protocol layers.
///
/// `receive` waits at most `timeout` for data and may return fewer bytes than
/// requested; `Ok(0)` means the wait expired with nothing available. A zero
/// timeout is a non-blocking poll.
pub trait Transport {
    /// Open `device` at `baud`
    fn connect(&mut self, device: &str, baud: u32) -> Result<(), ScipError>;

    /// Close the device; a no-op when already closed
    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    /// Change the host-side baud rate
    fn set_baud_rate(&mut self, baud: u32) -> Result<(), ScipError>;

    /// Write bytes, returning how many were accepted
    fn send(&mut self, data: &[u8]) -> Result<usize, ScipError>;

    /// Read up to `buf.len()` bytes
    fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, ScipError>;

    /// Drop anything pending in the OS buffers
    fn purge(&mut self) -> Result<(), ScipError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn connect(&mut self, device: &str, baud: u32) -> Result<(), ScipError> {
        (**self).connect(device, baud)
    }

    fn disconnect(&mut self) {
        (**self).disconnect()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<(), ScipError> {
        (**self).set_baud_rate(baud)
    }

    fn send(&mut self, data: &[u8]) -> Result<usize, ScipError> {
        (**self).send(data)
    }

    fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, ScipError> {
        (**self).receive(buf, timeout)
    }

    fn purge(&mut self) -> Result<(), ScipError> {
        (**self).purge()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_baud_lookup() {
        assert_eq!(BaudRate::from_u32(38400).unwrap(), BaudRate::B38400);
        assert_eq!(BaudRate::B57600.as_u32(), 57600);
        assert!(matches!(
            BaudRate::from_u32(250000),
            Err(ScipError::UnsupportedBaudRate(250000))
        ));
    }
}
