//! Simulated transports for testing without hardware
//!
//! `ScriptedTransport` replays a fixed byte script and records what was sent.
//! `MockSensor` answers SCIP2.0 commands the way a URG-series sensor does,
//! but only while the host and device baud rates agree.

use crate::codec::{encode, with_checksum};
use crate::error::ScipError;
use crate::parameters::ScannerParameters;
use crate::transport::{BaudRate, Transport};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

/// Payload characters per data line
const DATA_LINE_WIDTH: usize = 64;

/// Transport that replays scripted input
#[derive(Debug, Clone)]
pub struct ScriptedTransport {
    incoming: VecDeque<u8>,
    sent: Vec<u8>,
    connected: bool,
    baud: u32,
    max_chunk: usize,
    fail_receive: bool,
    purges: usize,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self {
            incoming: VecDeque::new(),
            sent: Vec::new(),
            connected: true,
            baud: BaudRate::default().as_u32(),
            max_chunk: usize::MAX,
            fail_receive: false,
            purges: 0,
        }
    }
}

impl ScriptedTransport {
    /// Connected transport with nothing to read
    pub fn new() -> Self {
        Self::default()
    }

    /// Connected transport that will deliver `bytes`
    pub fn with_incoming(bytes: &[u8]) -> Self {
        let mut transport = Self::new();
        transport.push_incoming(bytes);
        transport
    }

    pub fn push_incoming(&mut self, bytes: &[u8]) {
        self.incoming.extend(bytes);
    }

    /// Deliver at most `n` bytes per `receive`
    pub fn set_max_chunk(&mut self, n: usize) {
        self.max_chunk = n.max(1);
    }

    /// Make every `receive` fail
    pub fn set_fail_receive(&mut self, fail: bool) {
        self.fail_receive = fail;
    }

    /// Everything sent so far
    pub fn sent(&self) -> &[u8] {
        &self.sent
    }

    /// Sent bytes split into non-empty lines
    pub fn sent_lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.sent)
            .split('\n')
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn purge_count(&self) -> usize {
        self.purges
    }

    pub fn baud(&self) -> u32 {
        self.baud
    }
}

impl Transport for ScriptedTransport {
    fn connect(&mut self, _device: &str, baud: u32) -> Result<(), ScipError> {
        self.baud = BaudRate::from_u32(baud)?.as_u32();
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<(), ScipError> {
        self.baud = BaudRate::from_u32(baud)?.as_u32();
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<usize, ScipError> {
        if !self.connected {
            return Err(ScipError::NotConnected);
        }
        self.sent.extend_from_slice(data);
        Ok(data.len())
    }

    fn receive(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize, ScipError> {
        if self.fail_receive {
            return Err(ScipError::Transport("scripted receive failure".to_string()));
        }
        if !self.connected {
            return Err(ScipError::NotConnected);
        }
        let n = buf.len().min(self.max_chunk).min(self.incoming.len());
        for (slot, byte) in buf.iter_mut().zip(self.incoming.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn purge(&mut self) -> Result<(), ScipError> {
        self.incoming.clear();
        self.purges += 1;
        Ok(())
    }
}

/// Protocol dialect the simulated firmware starts in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareMode {
    /// Already speaking SCIP2.0
    Scip20,
    /// Booted in 1.x but accepts the switch to 2.0
    Scip1Upgradable,
    /// 1.x only
    Scip1Only,
}

/// Active data request inside the simulated sensor
#[derive(Debug, Clone)]
struct DataRequest {
    echo: String,
    first: usize,
    last: usize,
    group: usize,
    width: usize,
    intensity: bool,
    continuous: bool,
    infinite: bool,
    remaining: u32,
}

/// Simulated SCIP2.0 rangefinder
#[derive(Debug, Clone)]
pub struct MockSensor {
    parameters: ScannerParameters,
    ranges: Vec<u32>,
    intensities: Vec<u32>,
    mode: FirmwareMode,
    device_baud: u32,
    host_baud: u32,
    connected: bool,
    laser_on: bool,
    time_adjust: bool,
    reboot_armed: bool,
    timestamp: u32,
    output: VecDeque<u8>,
    pending_line: Vec<u8>,
    commands: Vec<String>,
    stream: Option<DataRequest>,
    corrupt_next_scan: bool,
}

/// Parameters of a URG-04LX
pub fn urg_04lx_parameters() -> ScannerParameters {
    ScannerParameters {
        model: "URG-04LX".to_string(),
        distance_min: 20,
        distance_max: 5600,
        area_total: 1024,
        area_min: 44,
        area_max: 725,
        area_front: 384,
        scan_rpm: 600,
    }
}

impl Default for MockSensor {
    fn default() -> Self {
        Self::new(urg_04lx_parameters())
    }
}

impl MockSensor {
    /// Sensor in SCIP2.0 mode at 115200 baud; step `i` measures `1000 + i` mm
    pub fn new(parameters: ScannerParameters) -> Self {
        let steps = parameters.data_max();
        Self {
            ranges: (0..steps as u32).map(|i| 1000 + i).collect(),
            intensities: (0..steps as u32).map(|i| 100 + i % 50).collect(),
            parameters,
            mode: FirmwareMode::Scip20,
            device_baud: BaudRate::B115200.as_u32(),
            host_baud: 0,
            connected: false,
            laser_on: false,
            time_adjust: false,
            reboot_armed: false,
            timestamp: 0,
            output: VecDeque::new(),
            pending_line: Vec::new(),
            commands: Vec::new(),
            stream: None,
            corrupt_next_scan: false,
        }
    }

    /// Sensor listening at `baud`
    pub fn with_device_baud(mut self, baud: u32) -> Self {
        self.device_baud = baud;
        self
    }

    pub fn with_mode(mut self, mode: FirmwareMode) -> Self {
        self.mode = mode;
        self
    }

    /// Replace the per-step distances
    pub fn with_ranges(mut self, ranges: Vec<u32>) -> Self {
        self.ranges = ranges;
        self
    }

    /// Replace the per-step intensities
    pub fn with_intensities(mut self, intensities: Vec<u32>) -> Self {
        self.intensities = intensities;
        self
    }

    /// Pretend a continuous full-range stream was left running
    pub fn streaming(mut self) -> Self {
        let first = self.parameters.area_min.max(0) as usize;
        let last = self.parameters.area_max.max(0) as usize;
        self.stream = Some(DataRequest {
            echo: format!("MD{:04}{:04}01000", first, last),
            first,
            last,
            group: 1,
            width: 3,
            intensity: false,
            continuous: true,
            infinite: true,
            remaining: 0,
        });
        self.laser_on = true;
        self
    }

    /// Break the checksum of the first data line of the next scan
    pub fn corrupt_next_scan(&mut self) {
        self.corrupt_next_scan = true;
    }

    /// Queue raw reply bytes ahead of anything the sensor sends next
    pub fn push_output(&mut self, bytes: &[u8]) {
        self.output.extend(bytes);
    }

    /// Command lines received at the matching baud rate
    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    /// How many received commands start with `prefix`
    pub fn count_commands(&self, prefix: &str) -> usize {
        self.commands.iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn device_baud(&self) -> u32 {
        self.device_baud
    }

    pub fn host_baud(&self) -> u32 {
        self.host_baud
    }

    pub fn is_laser_on(&self) -> bool {
        self.laser_on
    }

    pub fn is_streaming(&self) -> bool {
        self.stream.is_some()
    }

    fn push_line(&mut self, payload: &[u8]) {
        self.output.extend(payload);
        self.output.push_back(b'\n');
    }

    fn push_status(&mut self, code: u8) {
        let line = with_checksum(format!("{:02X}", code).as_bytes());
        self.push_line(&line);
    }

    fn reply(&mut self, command: &str, code: u8) {
        self.push_line(command.as_bytes());
        self.push_status(code);
        self.output.push_back(b'\n');
    }

    fn handle_command(&mut self, command: String) {
        debug!("mock sensor <- {:?}", command);
        self.commands.push(command.clone());

        if self.mode != FirmwareMode::Scip20 {
            match command.as_str() {
                "SCIP2.0" if self.mode == FirmwareMode::Scip1Upgradable => {
                    self.mode = FirmwareMode::Scip20;
                    self.reply(&command, 0x00);
                }
                "SCIP2.0" => self.reply(&command, 0x0C),
                _ => self.reply(&command, 0x0E),
            }
            return;
        }

        let head = command.get(..2).unwrap_or("");
        match head {
            "QT" => {
                if self.stream.is_some() {
                    // a scan already in flight reaches the host first
                    self.emit_scan();
                }
                self.stream = None;
                self.laser_on = false;
                self.reply(&command, 0x00);
            }
            "SC" => self.reply(&command, 0x0E),
            "BM" => {
                let code = if self.laser_on { 0x02 } else { 0x00 };
                self.laser_on = true;
                self.reply(&command, code);
            }
            "PP" => self.reply_parameters(&command),
            "VV" => {
                self.push_line(command.as_bytes());
                self.push_status(0x00);
                for line in [
                    "VEND:Hokuyo Automatic Co.,Ltd.".to_string(),
                    format!("PROD:{}", self.parameters.model),
                    "FIRM:3.4.03".to_string(),
                    "PROT:SCIP 2.0".to_string(),
                    "SERI:H0000001".to_string(),
                ] {
                    let mut payload = line.into_bytes();
                    payload.push(b';');
                    let line = with_checksum(&payload);
                    self.push_line(&line);
                }
                self.output.push_back(b'\n');
            }
            "SS" => {
                let requested = command.get(2..8).and_then(|s| s.parse::<u32>().ok());
                match requested.map(BaudRate::from_u32) {
                    Some(Ok(baud)) if baud.as_u32() == self.device_baud => self.reply(&command, 0x03),
                    Some(Ok(baud)) => {
                        self.reply(&command, 0x00);
                        self.device_baud = baud.as_u32();
                    }
                    _ => self.reply(&command, 0x01),
                }
            }
            "TM" => match command.as_str() {
                "TM0" => {
                    let code = if self.time_adjust { 0x02 } else { 0x00 };
                    self.time_adjust = true;
                    self.reply(&command, code);
                }
                "TM1" => {
                    self.push_line(command.as_bytes());
                    self.push_status(0x00);
                    let line = with_checksum(&encode(self.timestamp, 4));
                    self.push_line(&line);
                    self.output.push_back(b'\n');
                }
                "TM2" => {
                    let code = if self.time_adjust { 0x00 } else { 0x03 };
                    self.time_adjust = false;
                    self.reply(&command, code);
                }
                _ => self.reply(&command, 0x0F),
            },
            "RB" => {
                if self.reboot_armed {
                    self.reboot_armed = false;
                    self.laser_on = false;
                    self.stream = None;
                    self.reply(&command, 0x00);
                } else {
                    self.reboot_armed = true;
                    self.reply(&command, 0x01);
                }
            }
            "GD" | "GS" | "MD" | "MS" | "ME" => self.start_request(&command),
            _ => self.reply(&command, 0x0F),
        }
    }

    fn reply_parameters(&mut self, command: &str) {
        self.push_line(command.as_bytes());
        self.push_status(0x00);
        let p = &self.parameters;
        let entries = [
            format!("MODL:{}(Simulated)", p.model),
            format!("DMIN:{}", p.distance_min),
            format!("DMAX:{}", p.distance_max),
            format!("ARES:{}", p.area_total),
            format!("AMIN:{}", p.area_min),
            format!("AMAX:{}", p.area_max),
            format!("AFRT:{}", p.area_front),
            format!("SCAN:{}", p.scan_rpm),
        ];
        for entry in entries {
            let mut line = entry.into_bytes();
            line.push(b';');
            let line = with_checksum(&line);
            self.push_line(&line);
        }
        self.output.push_back(b'\n');
    }

    fn start_request(&mut self, command: &str) {
        let field = |range: std::ops::Range<usize>| command.get(range).and_then(|s| s.parse::<usize>().ok());
        let continuous = command.starts_with('M');
        let expected_len = if continuous { 15 } else { 12 };
        let (Some(first), Some(last)) = (field(2..6), field(6..10)) else {
            self.reply(command, 0x02);
            return;
        };
        if command.len() != expected_len || first > last || last > self.parameters.area_max as usize {
            self.reply(command, 0x04);
            return;
        }

        let cluster_field = command.get(10..12).unwrap_or("01");
        let intensity = command.starts_with("ME") || cluster_field == "FF";
        let group = if cluster_field == "FF" {
            2
        } else {
            field(10..12).unwrap_or(1).max(1)
        };
        let times = if continuous { field(13..15).unwrap_or(0) as u32 } else { 0 };

        let request = DataRequest {
            echo: command.to_string(),
            first,
            last,
            group,
            width: if command.as_bytes()[1] == b'S' { 2 } else { 3 },
            intensity,
            continuous,
            infinite: continuous && times == 0,
            remaining: times,
        };

        if continuous {
            self.laser_on = true;
            self.reply(command, 0x00);
            self.stream = Some(request);
        } else if !self.laser_on {
            self.reply(command, 0x10);
        } else {
            self.push_line(command.as_bytes());
            self.push_status(0x00);
            self.emit_data(&request);
            self.output.push_back(b'\n');
        }
    }

    /// Timestamp line followed by the data lines of one scan
    fn emit_data(&mut self, request: &DataRequest) {
        self.timestamp = self.timestamp.wrapping_add(self.parameters.scan_msec());
        let line = with_checksum(&encode(self.timestamp, 4));
        self.push_line(&line);

        let mut data = Vec::new();
        let mut step = request.first;
        while step <= request.last {
            let range = self.ranges.get(step).copied().unwrap_or(0);
            data.extend(encode(range, request.width));
            if request.intensity {
                let intensity = self.intensities.get(step).copied().unwrap_or(0);
                data.extend(encode(intensity, 3));
            }
            step += request.group;
        }

        let corrupt = std::mem::take(&mut self.corrupt_next_scan);
        for (i, chunk) in data.chunks(DATA_LINE_WIDTH).enumerate() {
            let mut line = with_checksum(chunk);
            if corrupt && i == 0 {
                if let Some(sum) = line.last_mut() {
                    *sum = if *sum == b'0' { b'1' } else { b'0' };
                }
            }
            self.push_line(&line);
        }
    }

    /// Next scan of the active continuous request
    fn emit_scan(&mut self) {
        let Some(mut request) = self.stream.take() else {
            return;
        };
        if !request.infinite {
            request.remaining = request.remaining.saturating_sub(1);
        }
        let echo = format!("{}{:02}", &request.echo[..13], request.remaining);
        self.push_line(echo.as_bytes());
        self.push_status(0x99);
        self.emit_data(&request);
        self.output.push_back(b'\n');

        if request.infinite || request.remaining > 0 {
            self.stream = Some(request);
        }
    }
}

impl Transport for MockSensor {
    fn connect(&mut self, _device: &str, baud: u32) -> Result<(), ScipError> {
        self.host_baud = BaudRate::from_u32(baud)?.as_u32();
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
        self.output.clear();
        self.pending_line.clear();
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<(), ScipError> {
        self.host_baud = BaudRate::from_u32(baud)?.as_u32();
        self.output.clear();
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<usize, ScipError> {
        if !self.connected {
            return Err(ScipError::NotConnected);
        }
        if self.host_baud != self.device_baud {
            // framing errors on the device side: nothing is understood
            return Ok(data.len());
        }
        for &byte in data {
            if byte == b'\n' || byte == b'\r' {
                if !self.pending_line.is_empty() {
                    let line = String::from_utf8_lossy(&self.pending_line).into_owned();
                    self.pending_line.clear();
                    self.handle_command(line);
                }
            } else {
                self.pending_line.push(byte);
            }
        }
        Ok(data.len())
    }

    fn receive(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize, ScipError> {
        if !self.connected {
            return Err(ScipError::NotConnected);
        }
        if self.output.is_empty() && self.host_baud == self.device_baud {
            self.emit_scan();
        }
        let n = buf.len().min(self.output.len());
        for (slot, byte) in buf.iter_mut().zip(self.output.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn purge(&mut self) -> Result<(), ScipError> {
        self.output.clear();
        Ok(())
    }
}
