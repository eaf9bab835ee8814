//! SCIP2.0 Command Exchange
//!
//! A command is one ASCII line. The sensor answers with an echo of the
//! command, a two-hex-digit status line, optional payload lines and a blank
//! line.

use crate::codec::{decode, verify_line};
use crate::config::ProtocolConfig;
use crate::error::ScipError;
use crate::parameters::{ScannerParameters, PARAMETER_KEYS};
use crate::receiver::{is_line_terminator, Line, LineReceiver, LINE_WIDTH};
use crate::transport::{BaudRate, Transport};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Reply status codes with a fixed meaning
pub mod status {
    /// Command accepted
    pub const OK: u8 = 0x00;
    /// Reply to "SCIP2.0" when already in 2.0 mode, or the 1.x error reply to "QT"
    pub const ALREADY_V2_OR_LEGACY: u8 = 0x0E;
    /// Reply to "SCIP2.0" from firmware that only speaks 1.x
    pub const LEGACY_ONLY: u8 = 0x0C;
    /// Laser is switched off (data requests)
    pub const LASER_OFF: u8 = 0x10;
    /// Possible response desynchronisation (data requests)
    pub const DESYNC: u8 = 0x0B;
    /// Streamed scan follows (continuous requests)
    pub const STREAMING: u8 = 0x99;
}

/// Version lines a "VV" reply normally carries
pub const VERSION_LINES: usize = 5;

/// Parse the leading two hex digits of a status line
pub fn parse_status(line: &[u8]) -> Result<u8, ScipError> {
    line.get(..2)
        .and_then(|digits| std::str::from_utf8(digits).ok())
        .and_then(|digits| u8::from_str_radix(digits, 16).ok())
        .ok_or_else(|| {
            ScipError::InvalidResponse(format!(
                "malformed status line {:?}",
                String::from_utf8_lossy(line)
            ))
        })
}

/// Command/response handler over a line receiver
pub struct CommandProtocol<T> {
    receiver: LineReceiver<T>,
    config: ProtocolConfig,
}

impl<T: Transport> CommandProtocol<T> {
    pub fn new(transport: T, config: ProtocolConfig) -> Self {
        let mut receiver = LineReceiver::new(transport);
        receiver.set_drain_limit(config.drain_limit());
        Self { receiver, config }
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn receiver(&self) -> &LineReceiver<T> {
        &self.receiver
    }

    pub fn receiver_mut(&mut self) -> &mut LineReceiver<T> {
        &mut self.receiver
    }

    pub fn transport(&self) -> &T {
        self.receiver.transport()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.receiver.transport_mut()
    }

    pub fn into_inner(self) -> T {
        self.receiver.into_inner()
    }

    /// Send one command line, appending the line feed if missing
    pub fn send_command(&mut self, command: &str) -> Result<(), ScipError> {
        let mut bytes = command.as_bytes().to_vec();
        if bytes.last() != Some(&b'\n') {
            bytes.push(b'\n');
        }
        trace!("send: {:?}", command.trim_end());

        let sent = self.receiver.transport_mut().send(&bytes)?;
        if sent != bytes.len() {
            return Err(ScipError::Transport(format!(
                "short write: {} of {} bytes",
                sent,
                bytes.len()
            )));
        }
        Ok(())
    }

    /// Read one line with the given timeout
    pub fn read_line(&mut self, timeout: Duration) -> Result<Option<Line>, ScipError> {
        self.receiver.get_line(LINE_WIDTH, timeout)
    }

    /// Read the echo and status lines of a reply to `command`.
    ///
    /// Returns the status code when it is one of `accepted`, otherwise
    /// `ScipError::Status` carrying the code.
    pub fn receive_reply(&mut self, command: &str, accepted: &[u8], timeout: Duration) -> Result<u8, ScipError> {
        let name = command.trim_end();
        let head = &name.as_bytes()[..name.len().min(2)];

        let mut echo = self.read_line(timeout)?.ok_or(ScipError::NoResponse)?;
        if echo.as_bytes() == [0x00] {
            debug!("Ignoring NUL after connection");
            echo = self.read_line(timeout)?.ok_or(ScipError::NoResponse)?;
        }
        if !echo.as_bytes().starts_with(head) {
            return Err(ScipError::MismatchedResponse {
                expected: name.to_string(),
                received: echo.to_string_lossy(),
            });
        }

        let status_line = self.read_line(timeout)?.ok_or(ScipError::NoResponse)?;
        let code = parse_status(status_line.as_bytes())?;
        self.consume_terminator(timeout)?;

        if accepted.contains(&code) {
            Ok(code)
        } else {
            Err(ScipError::Status {
                command: name.to_string(),
                code,
            })
        }
    }

    /// Consume the blank line closing a reply; anything else is pushed back
    fn consume_terminator(&mut self, timeout: Duration) -> Result<(), ScipError> {
        let mut ch = [0u8; 1];
        if self.receiver.recv(&mut ch, timeout)? == 1 && !is_line_terminator(ch[0]) {
            self.receiver.ungetc(ch[0]);
        }
        Ok(())
    }

    /// Send `command` and wait for its reply
    pub fn exchange(&mut self, command: &str, accepted: &[u8]) -> Result<u8, ScipError> {
        self.send_command(command)?;
        self.receive_reply(command, accepted, self.config.reply_timeout())
    }

    /// Discard incoming traffic until the line goes quiet
    pub fn drain(&mut self) -> Result<usize, ScipError> {
        self.drain_with(self.config.drain_each_timeout())
    }

    /// Discard incoming traffic using `each_timeout` per byte
    pub fn drain_with(&mut self, each_timeout: Duration) -> Result<usize, ScipError> {
        self.receiver.skip(self.config.reply_timeout(), each_timeout)
    }

    /// Switch the sensor into SCIP2.0 mode
    pub fn enter_protocol_v2(&mut self) -> Result<u8, ScipError> {
        match self.exchange("SCIP2.0", &[status::OK, status::ALREADY_V2_OR_LEGACY]) {
            Err(ScipError::Status { code: status::LEGACY_ONLY, .. }) => {
                warn!("Sensor firmware only speaks SCIP1.x");
                Err(ScipError::ProtocolVersionUnsupported)
            }
            other => other,
        }
    }

    /// Stop any measurement and switch the laser off ("QT").
    ///
    /// Without `wait_reply` the command is fire-and-forget and the reply is
    /// left for the data decoder.
    pub fn stop_measurement(&mut self, wait_reply: bool) -> Result<(), ScipError> {
        if !wait_reply {
            return self.send_command("QT");
        }
        self.exchange("QT", &[status::OK]).map(|_| ())
    }

    /// Switch the laser on ("BM")
    pub fn laser_on(&mut self) -> Result<(), ScipError> {
        self.exchange("BM", &[0, 2]).map(|_| ())
    }

    /// Switch the laser off; the same exchange as a waited stop
    pub fn laser_off(&mut self) -> Result<(), ScipError> {
        self.stop_measurement(true)
    }

    /// Fetch the sensor parameters ("PP")
    pub fn query_parameters(&mut self) -> Result<ScannerParameters, ScipError> {
        self.exchange("PP", &[status::OK])?;

        let timeout = self.config.reply_timeout();
        let mut lines = Vec::with_capacity(PARAMETER_KEYS.len());
        for key in PARAMETER_KEYS {
            let line = self
                .read_line(timeout)?
                .filter(|line| !line.is_empty())
                .ok_or_else(|| ScipError::InvalidResponse(format!("parameter reply ended before {}", key)))?;
            lines.push(line.into_bytes());
        }
        self.consume_terminator(timeout)?;

        let parameters = ScannerParameters::from_lines(&lines)?;
        info!(
            "Sensor {}: steps {}..{} of {}, front {}, {} rpm",
            parameters.model,
            parameters.area_min,
            parameters.area_max,
            parameters.area_total,
            parameters.area_front,
            parameters.scan_rpm
        );
        Ok(parameters)
    }

    /// Fetch up to `max_lines` version lines ("VV"), then drain what is left
    pub fn query_version(&mut self, max_lines: usize) -> Result<Vec<String>, ScipError> {
        self.exchange("VV", &[status::OK])?;

        let timeout = self.config.reply_timeout();
        let mut lines = Vec::with_capacity(max_lines);
        while lines.len() < max_lines {
            match self.read_line(timeout)? {
                Some(line) if !line.is_empty() => lines.push(line.to_string_lossy()),
                _ => break,
            }
        }
        self.drain()?;
        Ok(lines)
    }

    /// Ask the sensor to switch its baud rate ("SS")
    pub fn set_baud_rate(&mut self, baud: u32) -> Result<(), ScipError> {
        let baud = BaudRate::from_u32(baud)?;
        let command = format!("SS{:06}", baud.as_u32());
        self.exchange(&command, &[0, 3, 4]).map(|_| ())
    }

    /// Reboot the sensor ("RB" sent twice)
    pub fn reboot(&mut self) -> Result<(), ScipError> {
        if let Err(e) = self.laser_off() {
            debug!("Laser off before reboot failed: {}", e);
        }
        self.exchange("RB", &[1])?;
        self.exchange("RB", &[0])?;
        info!("Sensor reboot requested");
        Ok(())
    }

    /// Enter time-adjust mode ("TM0")
    pub fn enable_timestamp_mode(&mut self) -> Result<(), ScipError> {
        self.exchange("TM0", &[0, 2]).map(|_| ())
    }

    /// Leave time-adjust mode ("TM2")
    pub fn disable_timestamp_mode(&mut self) -> Result<(), ScipError> {
        self.exchange("TM2", &[0, 3]).map(|_| ())
    }

    /// Read the sensor clock ("TM1")
    pub fn current_timestamp(&mut self) -> Result<u32, ScipError> {
        self.exchange("TM1", &[status::OK])?;

        let timeout = self.config.reply_timeout();
        let line = self.read_line(timeout)?.ok_or(ScipError::NoResponse)?;
        if line.len() != 5 {
            return Err(ScipError::InvalidResponse(format!(
                "timestamp line has {} bytes",
                line.len()
            )));
        }
        let timestamp = decode(verify_line(line.as_bytes())?)?;
        self.consume_terminator(timeout)?;
        Ok(timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedTransport;

    fn protocol(replies: &[u8]) -> CommandProtocol<ScriptedTransport> {
        CommandProtocol::new(ScriptedTransport::with_incoming(replies), ProtocolConfig::fast())
    }

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status(b"00P").unwrap(), 0);
        assert_eq!(parse_status(b"0E").unwrap(), 0x0E);
        assert_eq!(parse_status(b"99b").unwrap(), 0x99);
        assert!(parse_status(b"0").is_err());
        assert!(parse_status(b"QT").is_err());
    }

    #[test]
    fn test_exchange_accepted() {
        let mut proto = protocol(b"QT\n00P\n\n");
        proto.stop_measurement(true).unwrap();
        assert_eq!(proto.transport().sent(), b"QT\n");
    }

    #[test]
    fn test_stop_without_reply() {
        let mut proto = protocol(b"");
        proto.stop_measurement(false).unwrap();
        assert_eq!(proto.transport().sent_lines(), vec!["QT".to_string()]);
    }

    #[test]
    fn test_exchange_mismatch() {
        let mut proto = protocol(b"MD0044072501000\n00P\n\n");
        let err = proto.exchange("QT", &[0]).unwrap_err();
        assert!(matches!(err, ScipError::MismatchedResponse { .. }));
    }

    #[test]
    fn test_exchange_no_response() {
        let mut proto = protocol(b"");
        assert!(matches!(proto.exchange("QT", &[0]), Err(ScipError::NoResponse)));
    }

    #[test]
    fn test_exchange_ignores_connection_nul() {
        let mut proto = protocol(b"\0\nBM\n00P\n\n");
        proto.laser_on().unwrap();
    }

    #[test]
    fn test_rejected_status_is_returned() {
        let mut proto = protocol(b"SS019200\n01R\n\n");
        let err = proto.set_baud_rate(19200).unwrap_err();
        assert_eq!(err.status_code(), Some(0x01));
        assert_eq!(proto.transport().sent(), b"SS019200\n");
    }

    #[test]
    fn test_missing_blank_line_is_pushed_back() {
        let mut proto = protocol(b"BM\n00P\nBM\n02R\n\n");
        proto.laser_on().unwrap();
        proto.laser_on().unwrap();
    }

    #[test]
    fn test_enter_v2_legacy_firmware() {
        let mut proto = protocol(b"SCIP2.0\n0C\n\n");
        assert!(matches!(
            proto.enter_protocol_v2(),
            Err(ScipError::ProtocolVersionUnsupported)
        ));
    }

    #[test]
    fn test_enter_v2_already_enabled() {
        let mut proto = protocol(b"SCIP2.0\n0Ev\n\n");
        assert_eq!(proto.enter_protocol_v2().unwrap(), 0x0E);
    }

    #[test]
    fn test_query_parameters() {
        let reply = b"PP\n00P\n\
MODL:URG-04LX(Hokuyo Automatic Co.,Ltd.);[\n\
DMIN:20;4\nDMAX:5600;_\nARES:1024;\\\nAMIN:44;7\nAMAX:725;o\nAFRT:384;6\nSCAN:600;e\n\n";
        let mut proto = protocol(reply);
        let params = proto.query_parameters().unwrap();
        assert_eq!(params.model, "URG-04LX");
        assert_eq!(params.area_front, 384);
        assert_eq!(proto.read_line(Duration::from_millis(5)).unwrap(), None);
    }

    #[test]
    fn test_query_parameters_short_reply() {
        let mut proto = protocol(b"PP\n00P\nMODL:URG-04LX;[\nDMIN:20;4\n\n");
        assert!(matches!(proto.query_parameters(), Err(ScipError::InvalidResponse(_))));
    }

    #[test]
    fn test_query_version() {
        let reply = b"VV\n00P\nVEND:Hokuyo;x\nPROD:URG-04LX;x\nFIRM:3.4.03;x\nPROT:SCIP 2.0;x\nSERI:H0000001;x\n\n";
        let mut proto = protocol(reply);
        let lines = proto.query_version(3).unwrap();
        assert_eq!(lines, vec!["VEND:Hokuyo;x", "PROD:URG-04LX;x", "FIRM:3.4.03;x"]);
        // trailing lines were drained
        assert_eq!(proto.read_line(Duration::from_millis(5)).unwrap(), None);
    }

    #[test]
    fn test_set_baud_rate_rejects_unsupported() {
        let mut proto = protocol(b"");
        assert!(matches!(proto.set_baud_rate(12345), Err(ScipError::UnsupportedBaudRate(12345))));
        assert!(proto.transport().sent().is_empty());
    }

    #[test]
    fn test_current_timestamp() {
        let mut reply = b"TM1\n00P\n".to_vec();
        reply.extend(crate::codec::with_checksum(&crate::codec::encode(123_456, 4)));
        reply.extend(b"\n\n");

        let mut proto = protocol(&reply);
        assert_eq!(proto.current_timestamp().unwrap(), 123_456);
    }

    #[test]
    fn test_reboot_sends_rb_twice() {
        let mut proto = protocol(b"QT\n00P\n\nRB\n01Q\n\nRB\n00P\n\n");
        proto.reboot().unwrap();
        assert_eq!(proto.transport().sent_lines(), vec!["QT", "RB", "RB"]);
    }
}
