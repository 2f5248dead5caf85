//! Little-endian integer encoding for fixed-width file fields
//!
//! Every numeric field in a recording is stored little-endian. The fixed-width
//! helpers take arrays rather than slices, so callers size their buffers once
//! and decoding has no error path.

/// Encode the low `width` bytes of `value` in little-endian order.
///
/// Widths above 8 are zero-extended.
///
/// # Examples
///
/// ```rust
/// use srcreel::codec::int_to_bytes;
///
/// assert_eq!(int_to_bytes(256, 4), vec![0, 1, 0, 0]);
/// assert_eq!(int_to_bytes(1, 2), vec![1, 0]);
/// ```
pub fn int_to_bytes(value: u64, width: usize) -> Vec<u8> {
    let le = value.to_le_bytes();
    let mut bytes = vec![0u8; width];
    let copied = width.min(le.len());
    bytes[..copied].copy_from_slice(&le[..copied]);
    bytes
}

/// Encode a 32-bit field.
pub fn encode_u32(value: u32) -> [u8; 4] {
    value.to_le_bytes()
}

/// Encode a 64-bit field.
pub fn encode_u64(value: u64) -> [u8; 8] {
    value.to_le_bytes()
}

/// Decode a 32-bit little-endian field.
pub fn bytes_to_int(bytes: [u8; 4]) -> u32 {
    u32::from_le_bytes(bytes)
}

/// Decode a 64-bit little-endian field.
pub fn bytes_to_long(bytes: [u8; 8]) -> u64 {
    u64::from_le_bytes(bytes)
}
