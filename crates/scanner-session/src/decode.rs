//! Data line decoding
//!
//! Samples are fixed-width groups of 6-bit characters packed back to back
//! across the data lines of a reply, so a group may start on one line and end
//! on the next.

use scip_protocol::{decode, ScipError};

/// Placeholder stored for steps before the reported window
pub const INVALID_RANGE: i64 = -1;

/// Widest sample group on the wire
const MAX_WIDTH: usize = 3;

/// Characters of a sample group seen so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartialSample {
    bytes: [u8; MAX_WIDTH],
    len: usize,
}

impl PartialSample {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn push(&mut self, byte: u8) {
        self.bytes[self.len] = byte;
        self.len += 1;
    }

    fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    fn clear(&mut self) {
        self.len = 0;
    }
}

/// Decodes the data lines of one reply into an output slice
#[derive(Debug, Clone)]
pub struct SampleDecoder {
    width: usize,
    stride: usize,
    bound: usize,
    carry: PartialSample,
}

impl SampleDecoder {
    /// `width` characters per sample, each sample repeated `stride` times,
    /// storing at most `bound` values
    pub fn new(width: usize, stride: usize, bound: usize) -> Self {
        Self {
            width: width.clamp(1, MAX_WIDTH),
            stride: stride.max(1),
            bound,
            carry: PartialSample::default(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Characters carried over from the previous line
    pub fn carry(&self) -> &PartialSample {
        &self.carry
    }

    /// Forget any carried characters
    pub fn reset(&mut self) {
        self.carry.clear();
    }

    /// Decode one data payload (checksum removed) into `out`, starting at
    /// `filled`, and return the new fill level.
    ///
    /// Once the bound is reached, further samples are validated but dropped.
    pub fn decode_line(&mut self, payload: &[u8], out: &mut [i64], mut filled: usize) -> Result<usize, ScipError> {
        let bound = self.bound.min(out.len());
        for &byte in payload {
            self.carry.push(byte);
            if self.carry.len() < self.width {
                continue;
            }
            let value = decode(self.carry.as_bytes());
            self.carry.clear();
            let value = i64::from(value?);

            let copies = self.stride.min(bound.saturating_sub(filled));
            for slot in &mut out[filled..filled + copies] {
                *slot = value;
            }
            filled += copies;
        }
        Ok(filled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use scip_protocol::encode;

    fn packed(values: &[u32], width: usize) -> Vec<u8> {
        values.iter().flat_map(|&v| encode(v, width)).collect()
    }

    #[test]
    fn test_decode_three_char_samples() {
        let mut decoder = SampleDecoder::new(3, 1, 8);
        let mut out = [0i64; 8];
        let filled = decoder.decode_line(&packed(&[0, 1, 5432], 3), &mut out, 0).unwrap();
        assert_eq!(filled, 3);
        assert_eq!(&out[..3], &[0, 1, 5432]);
    }

    #[test]
    fn test_stride_replicates_samples() {
        let mut decoder = SampleDecoder::new(3, 2, 100);
        let mut out = [0i64; 100];
        let filled = decoder.decode_line(&packed(&[10, 20, 30, 40, 50], 3), &mut out, 0).unwrap();
        assert_eq!(filled, 10);
        assert_eq!(&out[..10], &[10, 10, 20, 20, 30, 30, 40, 40, 50, 50]);
    }

    #[test]
    fn test_stride_truncated_by_bound() {
        let mut decoder = SampleDecoder::new(3, 2, 7);
        let mut out = [0i64; 10];
        let filled = decoder.decode_line(&packed(&[10, 20, 30, 40, 50], 3), &mut out, 0).unwrap();
        assert_eq!(filled, 7);
        assert_eq!(&out[..7], &[10, 10, 20, 20, 30, 30, 40]);
        assert_eq!(out[7], 0);
    }

    #[test]
    fn test_sample_straddles_lines() {
        let data = packed(&[1000, 2000, 3000], 3);
        let mut decoder = SampleDecoder::new(3, 1, 3);
        let mut out = [0i64; 3];

        let filled = decoder.decode_line(&data[..4], &mut out, 0).unwrap();
        assert_eq!(filled, 1);
        assert_eq!(decoder.carry().len(), 1);

        let filled = decoder.decode_line(&data[4..], &mut out, filled).unwrap();
        assert_eq!(filled, 3);
        assert!(decoder.carry().is_empty());
        assert_eq!(out, [1000, 2000, 3000]);
    }

    #[test]
    fn test_compact_samples() {
        let mut decoder = SampleDecoder::new(2, 1, 4);
        let mut out = [0i64; 4];
        let filled = decoder.decode_line(b"CB00", &mut out, 0).unwrap();
        assert_eq!(filled, 2);
        assert_eq!(&out[..2], &[1234, 0]);
    }

    #[test]
    fn test_out_of_range_character() {
        let mut decoder = SampleDecoder::new(3, 1, 4);
        let mut out = [0i64; 4];
        assert!(matches!(
            decoder.decode_line(b"00~", &mut out, 0),
            Err(ScipError::InvalidResponse(_))
        ));
        assert!(decoder.carry().is_empty());
    }

    #[test]
    fn test_reset_drops_carry() {
        let mut decoder = SampleDecoder::new(3, 1, 4);
        let mut out = [0i64; 4];
        decoder.decode_line(b"00", &mut out, 0).unwrap();
        decoder.reset();
        let filled = decoder.decode_line(b"001", &mut out, 0).unwrap();
        assert_eq!(filled, 1);
        assert_eq!(out[0], 1);
    }

    proptest! {
        #[test]
        fn prop_fill_is_bounded_replication(
            values in prop::collection::vec(0u32..4096, 0..40),
            stride in 1usize..5,
            bound in 0usize..120,
            split in 0usize..120,
        ) {
            let data = packed(&values, 2);
            let split = split.min(data.len());
            let mut decoder = SampleDecoder::new(2, stride, bound);
            let mut out = vec![0i64; 120];

            let filled = decoder.decode_line(&data[..split], &mut out, 0).unwrap();
            let filled = decoder.decode_line(&data[split..], &mut out, filled).unwrap();

            prop_assert_eq!(filled, (values.len() * stride).min(bound));
            prop_assert!(decoder.carry().is_empty());
            for (i, &sample) in out[..filled].iter().enumerate() {
                prop_assert_eq!(sample, i64::from(values[i / stride]));
            }
        }
    }
}
