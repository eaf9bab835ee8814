//! Scanner Session
//!
//! Owns the command channel to one sensor: connects and negotiates the baud
//! rate, caches the sensor parameters, issues data requests and decodes the
//! multi-line replies into range and intensity samples.

use crate::config::SessionConfig;
use crate::decode::{SampleDecoder, INVALID_RANGE};
use crate::request::{CaptureRequest, RequestKind, MAX_CAPTURE_TIMES, MAX_SKIP_FRAMES, MAX_SKIP_LINES};
use crate::scan::Scan;
use scip_protocol::{
    decode, parse_status, status, verify_line, BaudRate, CommandProtocol, ScannerParameters, ScipError, Transport,
    VERSION_LINES,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Baud rates tried while looking for the sensor
pub const NEGOTIATION_BAUD_RATES: [u32; 3] = [115200, 19200, 38400];

/// Reported by `remaining_capture_times` for an endless stream
pub const ENDLESS_CAPTURE: u32 = 100;

/// Echo length of single-shot data replies
const SINGLE_SHOT_ECHO_LEN: usize = 12;
/// Echo length of continuous data replies
const CONTINUOUS_ECHO_LEN: usize = 15;
/// Encoded characters in a timestamp
const TIMESTAMP_WIDTH: usize = 4;

/// Laser emission state as last observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LaserState {
    Off,
    On,
    Unknown,
}

/// Fill level of one decoded reply
#[derive(Debug, Clone, Copy)]
struct Decoded {
    filled: usize,
    /// Placeholder samples in front of the reported window
    leading: usize,
}

/// Session with one URG-series sensor
pub struct ScannerSession<T> {
    protocol: CommandProtocol<T>,
    config: SessionConfig,
    parameters: Option<ScannerParameters>,
    baud_rate: Option<u32>,
    skip_lines: u32,
    skip_frames: u32,
    capture_times: u32,
    remaining_times: u32,
    laser: LaserState,
    last_timestamp: Option<u32>,
    last_kind: Option<RequestKind>,
}

impl<T: Transport> ScannerSession<T> {
    pub fn new(transport: T, config: SessionConfig) -> Self {
        Self {
            protocol: CommandProtocol::new(transport, config.protocol.clone()),
            config,
            parameters: None,
            baud_rate: None,
            skip_lines: 1,
            skip_frames: 0,
            capture_times: 0,
            remaining_times: 0,
            laser: LaserState::Unknown,
            last_timestamp: None,
            last_kind: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        self.protocol.transport()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.protocol.transport_mut()
    }

    pub fn into_inner(self) -> T {
        self.protocol.into_inner()
    }

    /// Open `device`, bring the sensor to `baud` in SCIP2.0 mode and fetch
    /// its parameters
    pub fn connect(&mut self, device: &str, baud: u32) -> Result<(), ScipError> {
        let baud = BaudRate::from_u32(baud)?.as_u32();
        if self.is_connected() {
            self.close();
        }
        self.parameters = None;
        self.baud_rate = None;

        info!("Connecting to {} at {} baud", device, baud);
        self.protocol.transport_mut().connect(device, baud)?;
        self.protocol.receiver_mut().reset();

        if let Err(e) = self.negotiate(baud) {
            warn!("Connection to {} failed: {}", device, e);
            self.close();
            return Err(e);
        }

        let parameters = match self.protocol.query_parameters() {
            Ok(parameters) => parameters,
            Err(e) => {
                warn!("Parameter query failed: {}", e);
                self.close();
                return Err(e);
            }
        };
        self.parameters = Some(parameters);
        self.baud_rate = Some(baud);
        self.skip_lines = 1;
        self.skip_frames = 0;
        self.capture_times = 0;
        self.remaining_times = 0;
        self.laser = LaserState::Unknown;
        self.last_kind = None;

        info!("Connected to {} at {} baud", device, baud);
        Ok(())
    }

    /// Find the sensor among the candidate baud rates and switch it to
    /// `requested`
    fn negotiate(&mut self, requested: u32) -> Result<(), ScipError> {
        let mut candidates = NEGOTIATION_BAUD_RATES;
        if let Some(pos) = candidates.iter().position(|&b| b == requested) {
            candidates.swap(0, pos);
        }

        for candidate in candidates {
            debug!("Trying sensor at {} baud", candidate);
            self.protocol.transport_mut().set_baud_rate(candidate)?;
            self.protocol.receiver_mut().clear()?;

            let reply = match self.protocol.exchange("QT", &[status::OK]) {
                Ok(code) => code,
                Err(ScipError::NoResponse) | Err(ScipError::InvalidResponse(_)) => continue,
                Err(ScipError::MismatchedResponse { received, .. }) => {
                    info!("Sensor is streaming ({:?}), draining", received);
                    self.protocol.receiver_mut().clear()?;
                    self.protocol.drain()?;
                    status::OK
                }
                Err(ScipError::Status { code, .. }) => code,
                Err(e) => return Err(e),
            };

            if reply != status::OK {
                match self.protocol.enter_protocol_v2() {
                    Ok(_) => info!("Switched sensor to SCIP2.0"),
                    Err(ScipError::ProtocolVersionUnsupported) => return Err(ScipError::ProtocolVersionUnsupported),
                    Err(ScipError::Status { code, .. }) => {
                        warn!("SCIP2.0 answered with status {:02X}, continuing", code)
                    }
                    Err(e) if e.is_recoverable() => {
                        debug!("No SCIP2.0 reply at {} baud: {}", candidate, e);
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            }

            if candidate == requested {
                return Ok(());
            }

            let started = Instant::now();
            self.protocol.set_baud_rate(requested)?;
            let round_trip = started.elapsed();
            std::thread::sleep(round_trip * 4 / 3 + self.config.baud_switch_margin());

            info!("Sensor switched from {} to {} baud", candidate, requested);
            self.protocol.transport_mut().set_baud_rate(requested)?;
            self.protocol.receiver_mut().reset();
            return Ok(());
        }

        Err(ScipError::BaudNegotiationFailed)
    }

    /// Stop any measurement, drain, and close the transport
    pub fn disconnect(&mut self) {
        if !self.is_connected() {
            return;
        }
        if let Err(e) = self.laser_off() {
            debug!("Laser off during disconnect failed: {}", e);
        }
        if let Err(e) = self.protocol.drain() {
            debug!("Drain during disconnect failed: {}", e);
        }
        self.close();
        info!("Disconnected");
    }

    fn close(&mut self) {
        self.protocol.transport_mut().disconnect();
        self.protocol.receiver_mut().reset();
        self.baud_rate = None;
        self.laser = LaserState::Unknown;
    }

    pub fn is_connected(&self) -> bool {
        self.protocol.transport().is_connected()
    }

    fn ensure_connected(&self) -> Result<(), ScipError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ScipError::NotConnected)
        }
    }

    /// Baud rate of the current connection
    pub fn baud_rate(&self) -> Option<u32> {
        self.baud_rate
    }

    /// Parameters cached at connect
    pub fn parameters(&self) -> Result<&ScannerParameters, ScipError> {
        self.parameters.as_ref().ok_or(ScipError::NotConnected)
    }

    /// Re-issue the parameter query and refresh the cache
    pub fn fetch_parameters(&mut self) -> Result<ScannerParameters, ScipError> {
        self.ensure_connected()?;
        let parameters = self.protocol.query_parameters()?;
        self.parameters = Some(parameters.clone());
        Ok(parameters)
    }

    /// Sensor model, empty before the first connect
    pub fn model(&self) -> &str {
        self.parameters.as_ref().map_or("", |p| p.model.as_str())
    }

    /// Samples in a full scan, 0 before the first connect
    pub fn data_max(&self) -> usize {
        self.parameters.as_ref().map_or(0, ScannerParameters::data_max)
    }

    pub fn scan_msec(&self) -> u32 {
        self.parameters.as_ref().map_or(1, ScannerParameters::scan_msec)
    }

    pub fn min_distance(&self) -> i64 {
        self.parameters.as_ref().map_or(0, |p| p.distance_min)
    }

    pub fn max_distance(&self) -> i64 {
        self.parameters.as_ref().map_or(0, |p| p.distance_max)
    }

    /// Angular stride; 0 is taken as 1
    pub fn set_skip_lines(&mut self, lines: u32) -> Result<(), ScipError> {
        let lines = lines.max(1);
        if lines > MAX_SKIP_LINES {
            return Err(ScipError::InvalidArgument(format!("skip lines {} > {}", lines, MAX_SKIP_LINES)));
        }
        self.skip_lines = lines;
        Ok(())
    }

    /// Temporal stride for continuous requests
    pub fn set_skip_frames(&mut self, frames: u32) -> Result<(), ScipError> {
        if frames > MAX_SKIP_FRAMES {
            return Err(ScipError::InvalidArgument(format!("skip frames {} > {}", frames, MAX_SKIP_FRAMES)));
        }
        self.skip_frames = frames;
        Ok(())
    }

    /// Scans per continuous request; out-of-range counts mean endless
    pub fn set_capture_times(&mut self, times: u32) {
        self.capture_times = if times > MAX_CAPTURE_TIMES { 0 } else { times };
    }

    /// Scans left in the current stream, `ENDLESS_CAPTURE` when endless
    pub fn remaining_capture_times(&self) -> u32 {
        if self.capture_times == 0 {
            ENDLESS_CAPTURE
        } else {
            self.remaining_times
        }
    }

    /// Sensor version lines ("VV")
    pub fn version_lines(&mut self) -> Result<Vec<String>, ScipError> {
        self.ensure_connected()?;
        self.protocol.query_version(VERSION_LINES)
    }

    /// Send a data request. `None` bounds default to the measurable area.
    ///
    /// Single-shot requests switch the laser on first when it is not known
    /// to be on.
    pub fn request_data(&mut self, kind: RequestKind, first: Option<i32>, last: Option<i32>) -> Result<(), ScipError> {
        self.ensure_connected()?;
        let parameters = self.parameters()?;
        let request = CaptureRequest {
            kind,
            first: first.unwrap_or(parameters.area_min),
            last: last.unwrap_or(parameters.area_max),
            skip_lines: self.skip_lines,
            skip_frames: self.skip_frames,
            capture_times: self.capture_times,
        };
        let command = request.command(parameters)?;

        if kind.is_continuous() {
            self.remaining_times = self.capture_times;
        } else if self.laser != LaserState::On {
            self.laser_on()?;
        }

        debug!("Requesting {}", command);
        self.protocol.send_command(&command)?;
        self.last_kind = Some(kind);
        Ok(())
    }

    /// Decode the next data reply into `out`, returning the samples stored
    pub fn receive_data(&mut self, out: &mut [i64]) -> Result<usize, ScipError> {
        self.ensure_connected()?;
        let limit = out.len();
        let stride = self.skip_lines as usize;
        self.decode_reply(out, 0, limit, stride).map(|d| d.filled)
    }

    /// Decode an intensity reply; each (range, intensity) pair covers two
    /// steps
    pub fn receive_data_with_intensity(&mut self, ranges: &mut [i64], intensities: &mut [i64]) -> Result<usize, ScipError> {
        self.ensure_connected()?;
        if intensities.len() < ranges.len() {
            return Err(ScipError::InvalidArgument(format!(
                "intensity buffer holds {} of {} samples",
                intensities.len(),
                ranges.len()
            )));
        }

        let limit = ranges.len();
        let decoded = self.decode_reply(ranges, 0, limit, 1)?;
        for slot in &mut intensities[..decoded.leading] {
            *slot = INVALID_RANGE;
        }
        let mut i = decoded.leading;
        while i < decoded.filled {
            let range = ranges[i];
            if i + 1 < ranges.len() {
                let intensity = ranges[i + 1];
                intensities[i] = intensity;
                intensities[i + 1] = intensity;
                ranges[i + 1] = range;
            } else {
                intensities[i] = INVALID_RANGE;
            }
            i += 2;
        }
        Ok(decoded.filled)
    }

    /// Decode a reply into `out`, where `out[0]` is step `first`; samples past
    /// step `last` are dropped
    pub fn receive_partial_data(&mut self, out: &mut [i64], first: i32, last: i32) -> Result<usize, ScipError> {
        self.ensure_connected()?;
        if first < 0 || last < first {
            return Err(ScipError::InvalidArgument(format!("step range {}..={}", first, last)));
        }
        let span = i64::from(last) - i64::from(first) + 1;
        let limit = usize::try_from(span).unwrap_or(usize::MAX);
        self.decode_reply(out, first as usize, limit, 1).map(|d| d.filled)
    }

    /// Request one scan of `kind` and decode it
    pub fn capture(&mut self, kind: RequestKind) -> Result<Scan, ScipError> {
        self.request_data(kind, None, None)?;
        self.receive_scan()
    }

    /// Decode the next reply of the last request as a full-area scan
    pub fn receive_scan(&mut self) -> Result<Scan, ScipError> {
        let data_max = self.parameters()?.data_max();
        let with_intensity = self.last_kind.map_or(false, |k| k.has_intensity());

        let mut ranges = vec![INVALID_RANGE; data_max];
        let intensities = if with_intensity {
            let mut intensities = vec![INVALID_RANGE; data_max];
            let n = self.receive_data_with_intensity(&mut ranges, &mut intensities)?;
            intensities.truncate(n);
            ranges.truncate(n);
            Some(intensities)
        } else {
            let n = self.receive_data(&mut ranges)?;
            ranges.truncate(n);
            None
        };

        Ok(Scan {
            ranges,
            intensities,
            timestamp: self.last_timestamp,
            remaining: self.remaining_times,
        })
    }

    /// Timestamp of the last decoded data reply
    pub fn recent_timestamp(&self) -> Option<u32> {
        self.last_timestamp
    }

    /// Read one data reply: echo, status, optional timestamp, data lines.
    ///
    /// Samples land at `out[step - store_first]`; at most `limit` are kept.
    /// A checksum or decode failure discards what was decoded so far and
    /// waits for the next echo line.
    fn decode_reply(&mut self, out: &mut [i64], store_first: usize, limit: usize, stride: usize) -> Result<Decoded, ScipError> {
        let bound = out.len().min(limit);
        let data_start = if self.config.data_timestamp { 3 } else { 2 };
        self.last_timestamp = None;

        let mut last_error = ScipError::NoResponse;
        let mut lines = 0usize;
        let mut decoded = Decoded { filled: 0, leading: 0 };
        let mut is_echoback = false;
        let mut command = String::new();
        let mut decoder = SampleDecoder::new(3, stride, bound);
        let mut timeout = self.config.first_line_timeout();

        loop {
            let line = match self.protocol.read_line(timeout)? {
                Some(line) if !line.is_empty() => line,
                _ => {
                    if is_echoback {
                        is_echoback = false;
                        lines = 0;
                        continue;
                    }
                    break;
                }
            };
            let bytes = line.as_bytes();

            let payload = if lines > 0 {
                match verify_line(bytes) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("Discarding scan: {}", e);
                        last_error = e;
                        lines = 0;
                        decoded = Decoded { filled: 0, leading: 0 };
                        is_echoback = false;
                        decoder.reset();
                        continue;
                    }
                }
            } else {
                bytes
            };

            if lines == 0 {
                let len = payload.len();
                let first = std::str::from_utf8(&payload[..len.min(6)])
                    .ok()
                    .and_then(|s| s.get(2..6))
                    .and_then(|s| s.parse::<usize>().ok());
                let first = match first {
                    Some(first) if len == SINGLE_SHOT_ECHO_LEN || len == CONTINUOUS_ECHO_LEN => first,
                    _ => {
                        last_error = ScipError::InvalidResponse(format!("unexpected echo {:?}", line.to_string_lossy()));
                        decoded = Decoded { filled: 0, leading: 0 };
                        is_echoback = false;
                        continue;
                    }
                };
                command = line.to_string_lossy();

                let offset = first.saturating_sub(store_first);
                if offset >= bound {
                    debug!("Reply starts at step {}, past the requested window", first);
                    self.skip_reply()?;
                    return Ok(Decoded { filled: 0, leading: 0 });
                }
                for slot in &mut out[..offset] {
                    *slot = INVALID_RANGE;
                }
                decoded = Decoded { filled: offset, leading: offset };

                self.remaining_times = if len == SINGLE_SHOT_ECHO_LEN {
                    0
                } else {
                    command.get(13..15).and_then(|s| s.parse().ok()).unwrap_or(0)
                };
                let width = if payload[1] == b'S' { 2 } else { 3 };
                decoder = SampleDecoder::new(width, stride, bound);
            } else if lines == 1 {
                let code = parse_status(payload).ok();
                match code {
                    Some(status::LASER_OFF) => {
                        warn!("{} rejected: laser is off", command);
                        self.laser = LaserState::Off;
                    }
                    Some(status::DESYNC) => {
                        warn!("Possible reply desync after {}, draining", command);
                        self.protocol.drain_with(timeout)?;
                    }
                    _ => {}
                }
                if command.starts_with('M') && code == Some(status::OK) {
                    is_echoback = true;
                }
                if let Some(code) = code.filter(|c| *c != status::OK && *c != status::STREAMING) {
                    last_error = ScipError::Status {
                        command: command.clone(),
                        code,
                    };
                }
            } else if lines == 2 && self.config.data_timestamp {
                match payload.get(..TIMESTAMP_WIDTH).map(decode) {
                    Some(Ok(timestamp)) => self.last_timestamp = Some(timestamp),
                    _ => debug!("Unreadable timestamp line {:?}", line.to_string_lossy()),
                }
            } else if lines >= data_start {
                match decoder.decode_line(payload, out, decoded.filled) {
                    Ok(filled) => decoded.filled = filled,
                    Err(e) => {
                        warn!("Discarding scan: {}", e);
                        last_error = e;
                        lines = 0;
                        decoded = Decoded { filled: 0, leading: 0 };
                        is_echoback = false;
                        decoder.reset();
                        continue;
                    }
                }
            }

            lines += 1;
            timeout = self.config.each_line_timeout();
        }

        // placeholders alone are not a scan
        if decoded.filled > decoded.leading {
            Ok(decoded)
        } else {
            Err(last_error)
        }
    }

    /// Consume the remaining lines of the current reply up to its blank line
    fn skip_reply(&mut self) -> Result<(), ScipError> {
        let timeout = self.config.each_line_timeout();
        while let Some(line) = self.protocol.read_line(timeout)? {
            if line.is_empty() {
                break;
            }
        }
        Ok(())
    }

    pub fn index_to_radian(&self, index: i32) -> Result<f64, ScipError> {
        Ok(self.parameters()?.index_to_radian(index))
    }

    pub fn index_to_degree(&self, index: i32) -> Result<i32, ScipError> {
        Ok(self.parameters()?.index_to_degree(index))
    }

    pub fn radian_to_index(&self, radian: f64) -> Result<i32, ScipError> {
        Ok(self.parameters()?.radian_to_index(radian))
    }

    pub fn degree_to_index(&self, degree: i32) -> Result<i32, ScipError> {
        Ok(self.parameters()?.degree_to_index(degree))
    }

    pub fn laser_on(&mut self) -> Result<(), ScipError> {
        self.ensure_connected()?;
        self.protocol.laser_on()?;
        self.laser = LaserState::On;
        debug!("Laser on");
        Ok(())
    }

    /// Switch the laser off, which also ends any stream
    pub fn laser_off(&mut self) -> Result<(), ScipError> {
        self.ensure_connected()?;
        self.protocol.laser_off()?;
        self.laser = LaserState::Off;
        debug!("Laser off");
        Ok(())
    }

    /// Discard incoming traffic until the line goes quiet
    pub fn drain(&mut self) -> Result<usize, ScipError> {
        self.ensure_connected()?;
        self.protocol.drain()
    }

    /// Stop a running stream without waiting for the reply
    pub fn stop_measurement(&mut self) -> Result<(), ScipError> {
        self.ensure_connected()?;
        self.protocol.stop_measurement(false)?;
        self.laser = LaserState::Off;
        Ok(())
    }

    pub fn laser_state(&self) -> LaserState {
        self.laser
    }

    /// Reboot the sensor and close the connection
    pub fn reboot(&mut self) -> Result<(), ScipError> {
        self.ensure_connected()?;
        self.protocol.reboot()?;
        self.close();
        info!("Sensor rebooting, connection closed");
        Ok(())
    }

    pub fn reset(&mut self) -> Result<(), ScipError> {
        self.reboot()
    }

    pub fn enable_timestamp_mode(&mut self) -> Result<(), ScipError> {
        self.ensure_connected()?;
        self.protocol.enable_timestamp_mode()
    }

    pub fn disable_timestamp_mode(&mut self) -> Result<(), ScipError> {
        self.ensure_connected()?;
        self.protocol.disable_timestamp_mode()
    }

    /// Sensor clock in milliseconds; needs timestamp mode
    pub fn current_timestamp(&mut self) -> Result<u32, ScipError> {
        self.ensure_connected()?;
        self.protocol.current_timestamp()
    }
}
