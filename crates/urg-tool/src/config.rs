//! Tool configuration

use config::{Config, ConfigError, Environment, File};
use scan_stream::StreamConfig;
use scanner_session::{RequestKind, SessionConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::Level;

/// Prefix of environment overrides, e.g. `URG_DEVICE`, `URG_STREAM__CAPTURE_TIMES`
pub const ENV_PREFIX: &str = "URG";

/// What the tool does once connected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    /// Print one scan
    Single,
    /// Print scans until the stream ends or Ctrl-C
    Stream,
}

/// urg-tool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Serial device of the sensor
    pub device: String,

    /// Baud rate to run the sensor at
    pub baud_rate: u32,

    pub mode: CaptureMode,

    /// Request kind for single captures
    pub single_kind: RequestKind,

    /// Log version lines after connecting
    pub show_version: bool,

    /// trace, debug, info, warn or error
    pub log_level: String,

    /// Emit logs as JSON
    pub log_json: bool,

    pub session: SessionConfig,
    pub stream: StreamConfig,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            device: "/dev/ttyACM0".to_string(),
            baud_rate: 115200,
            mode: CaptureMode::Single,
            single_kind: RequestKind::SingleShot,
            show_version: true,
            log_level: "info".to_string(),
            log_json: false,
            session: SessionConfig::default(),
            stream: StreamConfig::default(),
        }
    }
}

impl ToolConfig {
    /// Load from an optional TOML file, then apply `URG_` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Log level, falling back to INFO for unknown names
    pub fn log_level(&self) -> Level {
        self.log_level.parse().unwrap_or(Level::INFO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ToolConfig::default();
        assert_eq!(config.baud_rate, 115200);
        assert_eq!(config.mode, CaptureMode::Single);
        assert_eq!(config.log_level(), Level::INFO);
        assert!(config.session.data_timestamp);
    }

    #[test]
    fn test_unknown_log_level_falls_back() {
        let config = ToolConfig {
            log_level: "loud".to_string(),
            ..Default::default()
        };
        assert_eq!(config.log_level(), Level::INFO);

        let config = ToolConfig {
            log_level: "debug".to_string(),
            ..Default::default()
        };
        assert_eq!(config.log_level(), Level::DEBUG);
    }

    #[test]
    fn test_load_toml_file() {
        let path = std::env::temp_dir().join(format!("urg-tool-config-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
device = "/dev/ttyUSB1"
baud_rate = 19200
mode = "stream"

[session]
first_line_timeout_ms = 2000

[stream]
kind = "continuous_compact"
capture_times = 10
"#
        )
        .unwrap();
        drop(file);

        let config = ToolConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.device, "/dev/ttyUSB1");
        assert_eq!(config.baud_rate, 19200);
        assert_eq!(config.mode, CaptureMode::Stream);
        assert_eq!(config.session.first_line_timeout_ms, 2000);
        assert_eq!(config.session.each_line_timeout_ms, 200);
        assert_eq!(config.stream.kind, RequestKind::ContinuousCompact);
        assert_eq!(config.stream.capture_times, 10);
        assert_eq!(config.stream.max_retries, 3);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let path = std::env::temp_dir().join("urg-tool-does-not-exist.toml");
        assert!(ToolConfig::load(Some(&path)).is_err());
    }
}
