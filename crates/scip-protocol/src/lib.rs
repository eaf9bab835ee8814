//! SCIP2.0 Protocol Implementation
//!
//! Line framing, checksums and command exchanges for Hokuyo URG-series laser
//! rangefinders, over any byte transport implementing [`Transport`].

mod codec;
mod command;
mod config;
mod error;
pub mod mock;
mod parameters;
mod receiver;
mod serial;
mod transport;

pub use codec::{checksum, decode, encode, verify_line, with_checksum, DIGIT_MAX, DIGIT_OFFSET};
pub use command::{parse_status, status, CommandProtocol, VERSION_LINES};
pub use config::ProtocolConfig;
pub use error::ScipError;
pub use parameters::{ScannerParameters, PARAMETER_KEYS};
pub use receiver::{is_line_terminator, Line, LineReceiver, LINE_WIDTH};
pub use serial::SerialTransport;
pub use transport::{BaudRate, Transport};

/// Result alias used across the SCIP crates
pub type Result<T, E = ScipError> = std::result::Result<T, E>;
