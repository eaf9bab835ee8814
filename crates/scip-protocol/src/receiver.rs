//! Line Framing Receiver
//!
//! Turns the transport byte stream into CR/LF terminated lines. Bytes already
//! waiting in the OS buffer are pulled into a `ByteRing` ahead of demand, and a
//! single byte can be pushed back to be replayed before any new read.

use crate::error::ScipError;
use crate::transport::Transport;
use byte_ring::ByteRing;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Longest line the sensor emits: 64 payload bytes, checksum, terminator
pub const LINE_WIDTH: usize = 64 + 1 + 1;

/// True for the CR and LF line terminators
pub fn is_line_terminator(ch: u8) -> bool {
    ch == b'\r' || ch == b'\n'
}

/// One received line with its terminator stripped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    bytes: Vec<u8>,
    truncated: bool,
}

impl Line {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The line filled the buffer before a terminator arrived, so it may be
    /// the head of a longer line
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Line receiver over a transport
pub struct LineReceiver<T> {
    transport: T,
    ring: ByteRing,
    /// Scratch space for topping up the ring
    scratch: Vec<u8>,
    /// Pushed-back byte, replayed first
    pending: Option<u8>,
    /// Optional hard cap on `skip`
    drain_limit: Option<Duration>,
}

impl<T: Transport> LineReceiver<T> {
    /// Create a receiver with the default 1 KiB ring
    pub fn new(transport: T) -> Self {
        Self::with_ring(transport, ByteRing::with_default_capacity())
    }

    pub fn with_ring(transport: T, ring: ByteRing) -> Self {
        let scratch = vec![0u8; ring.capacity()];
        Self {
            transport,
            ring,
            scratch,
            pending: None,
            drain_limit: None,
        }
    }

    /// Cap the total time a `skip` may take
    pub fn set_drain_limit(&mut self, limit: Option<Duration>) {
        self.drain_limit = limit;
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Bytes parked in the ring
    pub fn buffered(&self) -> usize {
        self.ring.len()
    }

    /// Fill `buf` from the pushed-back byte, the ring, then the transport.
    ///
    /// Returns the number of bytes filled; fewer than requested means the
    /// transport wait expired. Transport failures are reported as errors.
    pub fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, ScipError> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut filled = 0;
        if let Some(ch) = self.pending.take() {
            buf[0] = ch;
            filled = 1;
        }

        if !self.transport.is_connected() {
            return if filled > 0 {
                Ok(filled)
            } else {
                Err(ScipError::NotConnected)
            };
        }

        let wanted = buf.len() - filled;
        if self.ring.len() < wanted {
            let free = self.ring.free();
            let n = self
                .transport
                .receive(&mut self.scratch[..free], Duration::ZERO)?;
            self.ring.write(&self.scratch[..n]);
        }
        filled += self.ring.read(&mut buf[filled..]);

        while filled < buf.len() {
            let n = self.transport.receive(&mut buf[filled..], timeout)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    /// Read one line of at most `max_len - 1` bytes.
    ///
    /// Returns `None` only when the wait expired before any byte arrived. When
    /// the buffer fills first, its last byte is pushed back and the returned
    /// line is marked truncated.
    pub fn get_line(&mut self, max_len: usize, timeout: Duration) -> Result<Option<Line>, ScipError> {
        let mut bytes = Vec::with_capacity(max_len);
        let mut timed_out = false;
        let mut ch = [0u8; 1];

        while bytes.len() < max_len {
            if self.recv(&mut ch, timeout)? == 0 {
                timed_out = true;
                break;
            }
            if is_line_terminator(ch[0]) {
                break;
            }
            bytes.push(ch[0]);
        }

        let mut truncated = false;
        if max_len > 0 && bytes.len() == max_len {
            if let Some(last) = bytes.pop() {
                self.ungetc(last);
            }
            truncated = true;
        }

        if bytes.is_empty() && timed_out {
            return Ok(None);
        }
        trace!("line: {:?}", String::from_utf8_lossy(&bytes));
        Ok(Some(Line { bytes, truncated }))
    }

    /// Read and discard bytes until one single-byte wait of `each_timeout`
    /// expires. A zero `each_timeout` falls back to `total_timeout`.
    ///
    /// `total_timeout` does not cap the drain; only the configured drain
    /// limit does. Returns the number of bytes discarded.
    pub fn skip(&mut self, total_timeout: Duration, each_timeout: Duration) -> Result<usize, ScipError> {
        self.pending = None;
        let each = if each_timeout.is_zero() {
            total_timeout
        } else {
            each_timeout
        };

        let started = Instant::now();
        let mut discarded = 0;
        let mut ch = [0u8; 1];
        loop {
            if let Some(limit) = self.drain_limit {
                if started.elapsed() >= limit {
                    debug!("Drain limit reached after {} bytes", discarded);
                    break;
                }
            }
            if self.recv(&mut ch, each)? == 0 {
                break;
            }
            discarded += 1;
        }

        if discarded > 0 {
            debug!("Drained {} stale bytes", discarded);
        }
        Ok(discarded)
    }

    /// Push back one byte; a second call before it is consumed replaces it
    pub fn ungetc(&mut self, ch: u8) {
        self.pending = Some(ch);
    }

    /// Purge the transport and drop everything buffered locally
    pub fn clear(&mut self) -> Result<(), ScipError> {
        self.reset();
        if self.transport.is_connected() {
            self.transport.purge()?;
        }
        Ok(())
    }

    /// Drop the ring contents and the pushed-back byte
    pub fn reset(&mut self) {
        self.ring.clear();
        self.pending = None;
    }
}
