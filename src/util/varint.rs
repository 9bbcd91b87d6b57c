//! SQLite varints
//!
//! Big-endian, 7 bits per byte with the high bit as a continuation flag.
//! The ninth byte, when present, contributes all 8 bits.

/// Maximum encoded length of a varint
pub const MAX_VARINT_LEN: usize = 9;

/// Read a varint from the start of `data`.
///
/// Returns the value and the number of bytes consumed, or `None` when the
/// slice ends before the varint does.
pub fn get_varint(data: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    for (i, &byte) in data.iter().take(MAX_VARINT_LEN).enumerate() {
        let byte = byte as u64;
        if i == MAX_VARINT_LEN - 1 {
            value = (value << 8) | byte;
            return Some((value, MAX_VARINT_LEN));
        }
        value = (value << 7) | (byte & 0x7F);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

/// Length in bytes of the encoding of `value`
pub fn varint_len(value: u64) -> usize {
    if value > 0x00FF_FFFF_FFFF_FFFF {
        return MAX_VARINT_LEN;
    }
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

/// Append the encoding of `value` to `buf`, returning the bytes written
pub fn put_varint(buf: &mut Vec<u8>, value: u64) -> usize {
    let len = varint_len(value);
    if len == MAX_VARINT_LEN {
        // Eight 7-bit groups followed by a full trailing byte
        let high = value >> 8;
        for i in (0..8).rev() {
            buf.push((((high >> (7 * i)) & 0x7F) | 0x80) as u8);
        }
        buf.push((value & 0xFF) as u8);
        return len;
    }
    for i in (0..len).rev() {
        let group = ((value >> (7 * i)) & 0x7F) as u8;
        buf.push(if i == 0 { group } else { group | 0x80 });
    }
    len
}
