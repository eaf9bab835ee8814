//! Line checksum and 6-bit character encoding
//!
//! Every data-carrying line ends in one checksum character computed over the
//! preceding bytes. Samples are packed as 2, 3 or 4 characters, each carrying
//! six bits offset from `'0'`.

use crate::error::ScipError;

/// Offset added to every 6-bit digit
pub const DIGIT_OFFSET: u8 = 0x30;

/// Highest valid encoded character (`'0' + 63`)
pub const DIGIT_MAX: u8 = DIGIT_OFFSET + 0x3F;

/// Checksum character for `payload`
pub fn checksum(payload: &[u8]) -> u8 {
    let sum = payload.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    (sum & 0x3F) + DIGIT_OFFSET
}

/// Verify the trailing checksum character of `line` and return the payload
/// in front of it.
pub fn verify_line(line: &[u8]) -> Result<&[u8], ScipError> {
    let (&actual, payload) = line
        .split_last()
        .ok_or_else(|| ScipError::InvalidResponse("empty line has no checksum".to_string()))?;
    let expected = checksum(payload);
    if expected != actual {
        return Err(ScipError::ChecksumMismatch {
            expected: expected as char,
            actual: actual as char,
        });
    }
    Ok(payload)
}

/// Append the checksum character to `payload`
pub fn with_checksum(payload: &[u8]) -> Vec<u8> {
    let mut line = Vec::with_capacity(payload.len() + 1);
    line.extend_from_slice(payload);
    line.push(checksum(payload));
    line
}

/// Decode a group of 6-bit characters into an integer.
///
/// Characters outside `'0'..='o'` are rejected instead of silently producing
/// a corrupted value.
pub fn decode(group: &[u8]) -> Result<u32, ScipError> {
    group.iter().try_fold(0u32, |value, &ch| {
        if !(DIGIT_OFFSET..=DIGIT_MAX).contains(&ch) {
            return Err(ScipError::InvalidResponse(format!(
                "byte {:#04x} outside the 6-bit character range",
                ch
            )));
        }
        Ok((value << 6) | u32::from((ch - DIGIT_OFFSET) & 0x3F))
    })
}

/// Encode `value` into `width` 6-bit characters (most significant first);
/// bits above `6 * width` are discarded.
pub fn encode(value: u32, width: usize) -> Vec<u8> {
    (0..width)
        .rev()
        .map(|i| {
            let digit = if i * 6 >= 32 { 0 } else { (value >> (i * 6)) & 0x3F };
            digit as u8 + DIGIT_OFFSET
        })
        .collect()
}
