//! URG Scanner Session
//!
//! Connection management, data requests and reply decoding on top of the
//! SCIP2.0 command layer.

mod config;
mod decode;
mod request;
mod scan;
mod session;

pub use config::SessionConfig;
pub use decode::{PartialSample, SampleDecoder, INVALID_RANGE};
pub use request::{CaptureRequest, RequestKind, MAX_CAPTURE_TIMES, MAX_SKIP_FRAMES, MAX_SKIP_LINES};
pub use scan::Scan;
pub use session::{LaserState, ScannerSession, ENDLESS_CAPTURE, NEGOTIATION_BAUD_RATES};
