//! Capture request commands ("GD"/"GS"/"MD"/"MS"/"ME")

use scip_protocol::{ScannerParameters, ScipError};
use serde::{Deserialize, Serialize};

/// Largest angular stride the sensor accepts
pub const MAX_SKIP_LINES: u32 = 99;
/// Largest temporal stride for continuous requests
pub const MAX_SKIP_FRAMES: u32 = 9;
/// Largest finite scan count; 0 asks for an endless stream
pub const MAX_CAPTURE_TIMES: u32 = 99;

/// Kind of data request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// One scan, 3-character distances ("GD")
    SingleShot,
    /// One scan with intensities
    SingleShotIntensity,
    /// One scan, 2-character distances ("GS")
    SingleShotCompact,
    /// Stream of scans, 3-character distances ("MD")
    Continuous,
    /// Stream of scans with intensities ("ME" or "MD" with the "FF" cluster)
    ContinuousIntensity,
    /// Stream of scans, 2-character distances ("MS")
    ContinuousCompact,
}

impl RequestKind {
    pub fn is_continuous(&self) -> bool {
        matches!(
            self,
            RequestKind::Continuous | RequestKind::ContinuousIntensity | RequestKind::ContinuousCompact
        )
    }

    pub fn has_intensity(&self) -> bool {
        matches!(self, RequestKind::SingleShotIntensity | RequestKind::ContinuousIntensity)
    }

    /// Data type letter following 'G' or 'M'
    fn encoding(&self) -> char {
        match self {
            RequestKind::SingleShotCompact | RequestKind::ContinuousCompact => 'S',
            _ => 'D',
        }
    }
}

impl Default for RequestKind {
    fn default() -> Self {
        RequestKind::Continuous
    }
}

/// A fully specified data request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub kind: RequestKind,
    pub first: i32,
    pub last: i32,
    pub skip_lines: u32,
    pub skip_frames: u32,
    pub capture_times: u32,
}

impl CaptureRequest {
    /// Request covering the whole measurable area
    pub fn full_scan(kind: RequestKind, parameters: &ScannerParameters) -> Self {
        Self {
            kind,
            first: parameters.area_min,
            last: parameters.area_max,
            skip_lines: 1,
            skip_frames: 0,
            capture_times: 0,
        }
    }

    fn validate(&self, parameters: &ScannerParameters) -> Result<(), ScipError> {
        if self.first < 0 || self.first > self.last || self.last > parameters.area_max {
            return Err(ScipError::InvalidArgument(format!(
                "step range {}..={} outside 0..={}",
                self.first, self.last, parameters.area_max
            )));
        }
        if self.skip_lines == 0 || self.skip_lines > MAX_SKIP_LINES {
            return Err(ScipError::InvalidArgument(format!("skip lines {}", self.skip_lines)));
        }
        if self.skip_frames > MAX_SKIP_FRAMES {
            return Err(ScipError::InvalidArgument(format!("skip frames {}", self.skip_frames)));
        }
        if self.capture_times > MAX_CAPTURE_TIMES {
            return Err(ScipError::InvalidArgument(format!("capture times {}", self.capture_times)));
        }
        Ok(())
    }

    /// Build the command line (without terminator) for `parameters`' model.
    ///
    /// Intensity requests use "ME" with a cluster of 2 on multi-echo models and
    /// the "FF" cluster marker elsewhere. Multi-echo models cannot return
    /// intensities for a single scan.
    pub fn command(&self, parameters: &ScannerParameters) -> Result<String, ScipError> {
        self.validate(parameters)?;

        let mut command = if self.kind.is_continuous() {
            format!(
                "M{}{:04}{:04}{:02}{}{:02}",
                self.kind.encoding(),
                self.first,
                self.last,
                self.skip_lines,
                self.skip_frames,
                self.capture_times
            )
        } else {
            format!(
                "G{}{:04}{:04}{:02}",
                self.kind.encoding(),
                self.first,
                self.last,
                self.skip_lines
            )
        };

        if self.kind.has_intensity() {
            if parameters.has_multi_echo_intensity() {
                if !self.kind.is_continuous() {
                    return Err(ScipError::UnsupportedFeature(format!(
                        "{} has no single-scan intensity",
                        parameters.model
                    )));
                }
                command.replace_range(0..2, "ME");
                command.replace_range(10..12, "02");
            } else {
                command.replace_range(10..12, "FF");
            }
        }
        Ok(command)
    }
}
