//! Circular Byte Buffer
//!
//! Provides the fixed-capacity byte ring that sits between a serial transport
//! and the line receiver. Bytes read ahead of demand are parked here and
//! handed out oldest first.

mod buffer;

pub use buffer::{ByteRing, DEFAULT_SHIFT, MAX_SHIFT};
