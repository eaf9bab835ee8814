//! Sensor Parameters ("PP" reply) and angle/step conversion

use crate::error::ScipError;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Keys of the parameter reply, in the order the sensor sends them
pub const PARAMETER_KEYS: [&str; 8] = ["MODL", "DMIN", "DMAX", "ARES", "AMIN", "AMAX", "AFRT", "SCAN"];

/// Static sensor description fetched once per connection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScannerParameters {
    /// Sensor model, e.g. "URG-04LX"
    pub model: String,
    /// Shortest measurable distance (mm)
    pub distance_min: i64,
    /// Longest measurable distance (mm)
    pub distance_max: i64,
    /// Steps in a full revolution
    pub area_total: i32,
    /// First measurable step
    pub area_min: i32,
    /// Last measurable step
    pub area_max: i32,
    /// Step pointing straight ahead
    pub area_front: i32,
    /// Nominal motor speed (rpm)
    pub scan_rpm: i32,
}

/// Split a `KEY:value;` parameter line
fn split_entry(line: &[u8]) -> Result<(&str, &str), ScipError> {
    let text = std::str::from_utf8(line)
        .map_err(|_| ScipError::InvalidResponse("parameter line is not ASCII".to_string()))?;
    let (key, rest) = text
        .split_once(':')
        .ok_or_else(|| ScipError::InvalidResponse(format!("parameter line without key: {:?}", text)))?;
    let value = rest.split(';').next().unwrap_or(rest);
    Ok((key, value))
}

fn parse_number<N: std::str::FromStr>(key: &str, value: &str) -> Result<N, ScipError> {
    value
        .trim()
        .parse()
        .map_err(|_| ScipError::InvalidResponse(format!("{} is not a number: {:?}", key, value)))
}

impl ScannerParameters {
    /// Parse the eight parameter lines positionally.
    pub fn from_lines<L: AsRef<[u8]>>(lines: &[L]) -> Result<Self, ScipError> {
        if lines.len() < PARAMETER_KEYS.len() {
            return Err(ScipError::InvalidResponse(format!(
                "expected {} parameter lines, got {}",
                PARAMETER_KEYS.len(),
                lines.len()
            )));
        }

        let mut values = Vec::with_capacity(PARAMETER_KEYS.len());
        for (line, expected) in lines.iter().zip(PARAMETER_KEYS) {
            let (key, value) = split_entry(line.as_ref())?;
            if key != expected {
                return Err(ScipError::InvalidResponse(format!(
                    "expected parameter {}, got {}",
                    expected, key
                )));
            }
            values.push(value);
        }

        let model = values[0]
            .split('(')
            .next()
            .unwrap_or(values[0])
            .trim()
            .to_string();

        let parameters = Self {
            model,
            distance_min: parse_number("DMIN", values[1])?,
            distance_max: parse_number("DMAX", values[2])?,
            area_total: parse_number("ARES", values[3])?,
            area_min: parse_number("AMIN", values[4])?,
            area_max: parse_number("AMAX", values[5])?,
            area_front: parse_number("AFRT", values[6])?,
            scan_rpm: parse_number("SCAN", values[7])?,
        };

        if parameters.area_total <= 0 {
            return Err(ScipError::InvalidResponse(
                "sensor reported zero steps per revolution".to_string(),
            ));
        }
        Ok(parameters)
    }

    /// Number of samples in a full scan (`area_max + 1`)
    pub fn data_max(&self) -> usize {
        (self.area_max.max(0) + 1) as usize
    }

    /// Duration of one revolution in milliseconds
    pub fn scan_msec(&self) -> u32 {
        if self.scan_rpm <= 0 {
            1
        } else {
            (60_000 / self.scan_rpm) as u32
        }
    }

    /// TOF models use "ME" for intensity and cannot return it single-shot
    pub fn has_multi_echo_intensity(&self) -> bool {
        self.model.starts_with("UTM-30LX")
    }

    /// Angle of `index` relative to the front step, in radians
    pub fn index_to_radian(&self, index: i32) -> f64 {
        2.0 * PI * f64::from(index - self.area_front) / f64::from(self.area_total)
    }

    /// Angle of `index` rounded to whole degrees
    pub fn index_to_degree(&self, index: i32) -> i32 {
        (self.index_to_radian(index) * 180.0 / PI + 0.5).floor() as i32
    }

    /// Nearest step for `radian`, clamped to `[0, area_max]`
    pub fn radian_to_index(&self, radian: f64) -> i32 {
        let index = (radian * f64::from(self.area_total) / (2.0 * PI) + f64::from(self.area_front) + 0.5).floor();
        index.clamp(0.0, f64::from(self.area_max.max(0))) as i32
    }

    /// Nearest step for `degree`
    pub fn degree_to_index(&self, degree: i32) -> i32 {
        self.radian_to_index(PI * f64::from(degree) / 180.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn urg_04lx() -> ScannerParameters {
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

    #[test]
    fn test_parse_reply_lines() {
        let lines = [
            "MODL:URG-04LX(Hokuyo Automatic Co.,Ltd.);[",
            "DMIN:20;4",
            "DMAX:5600;_",
            "ARES:1024;\\",
            "AMIN:44;7",
            "AMAX:725;o",
            "AFRT:384;6",
            "SCAN:600;e",
        ];
        let params = ScannerParameters::from_lines(&lines).unwrap();
        assert_eq!(params, urg_04lx());
        assert_eq!(params.data_max(), 726);
        assert_eq!(params.scan_msec(), 100);
    }

    #[test]
    fn test_parse_rejects_bad_lines() {
        let mut lines = vec!["MODL:X;", "DMIN:20;", "DMAX:5600;", "ARES:1024;", "AMIN:44;", "AMAX:725;", "AFRT:384;", "SCAN:600;"];
        assert!(ScannerParameters::from_lines(&lines[..7]).is_err());

        lines[2] = "DMAX:lots;";
        assert!(matches!(ScannerParameters::from_lines(&lines), Err(ScipError::InvalidResponse(_))));

        lines[2] = "DMAX:5600;";
        lines[3] = "ARES:0;";
        assert!(ScannerParameters::from_lines(&lines).is_err());

        lines[3] = "AMIN:1024;";
        assert!(ScannerParameters::from_lines(&lines).is_err());
    }

    #[test]
    fn test_angle_conversions() {
        let params = urg_04lx();
        assert_eq!(params.index_to_radian(384), 0.0);
        assert!((params.index_to_radian(640) - PI / 2.0).abs() < 1e-12);
        assert_eq!(params.index_to_degree(640), 90);
        assert_eq!(params.index_to_degree(128), -90);
        assert_eq!(params.degree_to_index(90), 640);
        assert_eq!(params.degree_to_index(0), 384);
    }

    #[test]
    fn test_radian_to_index_clamps() {
        let params = urg_04lx();
        assert_eq!(params.radian_to_index(-10.0), 0);
        assert_eq!(params.radian_to_index(10.0), 725);
    }

    #[test]
    fn test_multi_echo_models() {
        let mut params = urg_04lx();
        assert!(!params.has_multi_echo_intensity());
        params.model = "UTM-30LX".to_string();
        assert!(params.has_multi_echo_intensity());
    }

    proptest! {
        #[test]
        fn prop_index_radian_round_trip(total in 4i32..4096, front_ratio in 0.0f64..1.0, index_ratio in 0.0f64..1.0) {
            let area_max = total - 1;
            let params = ScannerParameters {
                area_total: total,
                area_max,
                area_front: (f64::from(area_max) * front_ratio) as i32,
                ..Default::default()
            };
            let index = (f64::from(area_max) * index_ratio) as i32;
            let back = params.radian_to_index(params.index_to_radian(index));
            prop_assert_eq!(back, index);
        }
    }
}
