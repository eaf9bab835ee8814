//! Continuous Scan Streaming
//!
//! Runs the continuous request and poll loop of a scanner session on a
//! blocking task and forwards decoded scans over a channel.

mod streamer;

pub use streamer::{ScanStreamer, StreamConfig, StreamOutcome, StreamStats, StreamTask};
