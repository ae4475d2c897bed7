//! Big-endian wire primitives.
//!
//! ```text
//! String := len:u16 | utf8 bytes
//! ```
//!
//! Readers operate on a frame that has already been buffered in full, so a
//! short read here means the outer length prefix lied.

use bytes::{Buf, BufMut};

use crate::error::{ProtocolError, ProtocolResult};

/// Bytes used by a string length prefix.
pub const STRING_LEN_SIZE: usize = 2;

/// Serialized size of `value` including its length prefix.
pub fn string_size(value: &str) -> usize {
    STRING_LEN_SIZE + value.len()
}

/// Writes a length-prefixed UTF-8 string.
pub fn put_string<B: BufMut>(buf: &mut B, value: &str) -> ProtocolResult<()> {
    let len = u16::try_from(value.len())
        .map_err(|_| ProtocolError::StringTooLong { len: value.len() })?;
    buf.put_u16(len);
    buf.put_slice(value.as_bytes());
    Ok(())
}

fn ensure<B: Buf>(buf: &B, needed: usize) -> ProtocolResult<()> {
    if buf.remaining() < needed {
        return Err(ProtocolError::TruncatedFrame {
            needed,
            available: buf.remaining(),
        });
    }
    Ok(())
}

pub fn get_u16<B: Buf>(buf: &mut B) -> ProtocolResult<u16> {
    ensure(buf, 2)?;
    Ok(buf.get_u16())
}

pub fn get_u32<B: Buf>(buf: &mut B) -> ProtocolResult<u32> {
    ensure(buf, 4)?;
    Ok(buf.get_u32())
}

pub fn get_u64<B: Buf>(buf: &mut B) -> ProtocolResult<u64> {
    ensure(buf, 8)?;
    Ok(buf.get_u64())
}

/// Reads a length-prefixed UTF-8 string.
pub fn get_string<B: Buf>(buf: &mut B) -> ProtocolResult<String> {
    let len = get_u16(buf)? as usize;
    ensure(buf, len)?;
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    Ok(String::from_utf8(bytes)?)
}
