//! Decoded scan

use crate::decode::INVALID_RANGE;
use serde::{Deserialize, Serialize};

/// One decoded scan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scan {
    /// Distance per step (mm), `-1` for steps outside the reported window
    pub ranges: Vec<i64>,
    /// Intensity per step, for intensity requests
    pub intensities: Option<Vec<i64>>,
    /// Sensor clock at the scan (ms)
    pub timestamp: Option<u32>,
    /// Scans left in a finite stream
    pub remaining: u32,
}

impl Scan {
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Steps whose distance lies within `[min, max]`
    pub fn valid_count(&self, min: i64, max: i64) -> usize {
        self.ranges
            .iter()
            .filter(|&&r| r != INVALID_RANGE && r >= min && r <= max)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_count_skips_placeholders() {
        let scan = Scan {
            ranges: vec![INVALID_RANGE, 10, 25, 6000],
            ..Default::default()
        };
        assert_eq!(scan.len(), 4);
        assert_eq!(scan.valid_count(20, 5600), 1);
        assert_eq!(scan.valid_count(0, 10_000), 3);
    }
}
