//! Primitive field encoders shared by the packet implementations.

use bytes::{Buf, BufMut};

use crate::error::{Result, SessionError};

/// Largest value representable by the 4-byte remaining-length varint.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

pub fn encode_string<B: BufMut>(buf: &mut B, s: &str) -> Result<()> {
    let len = u16::try_from(s.len())
        .map_err(|_| SessionError::MalformedPacket(format!("string too long: {}", s.len())))?;
    buf.put_u16(len);
    buf.put_slice(s.as_bytes());
    Ok(())
}

pub fn decode_string<B: Buf>(buf: &mut B) -> Result<String> {
    let bytes = decode_bytes(buf)?;
    String::from_utf8(bytes)
        .map_err(|_| SessionError::MalformedPacket("invalid UTF-8 string".to_string()))
}

pub fn encode_bytes<B: BufMut>(buf: &mut B, data: &[u8]) -> Result<()> {
    let len = u16::try_from(data.len()).map_err(|_| {
        SessionError::MalformedPacket(format!("binary field too long: {}", data.len()))
    })?;
    buf.put_u16(len);
    buf.put_slice(data);
    Ok(())
}

pub fn decode_bytes<B: Buf>(buf: &mut B) -> Result<Vec<u8>> {
    if buf.remaining() < 2 {
        return Err(SessionError::MalformedPacket(
            "truncated length prefix".to_string(),
        ));
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(SessionError::MalformedPacket(format!(
            "field claims {len} bytes, {} available",
            buf.remaining()
        )));
    }
    let mut data = vec![0u8; len];
    buf.copy_to_slice(&mut data);
    Ok(data)
}

pub fn encode_remaining_length<B: BufMut>(buf: &mut B, mut len: usize) -> Result<()> {
    if len > MAX_REMAINING_LENGTH {
        return Err(SessionError::MalformedPacket(format!(
            "remaining length {len} exceeds protocol maximum"
        )));
    }
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if len == 0 {
            return Ok(());
        }
    }
}

/// Decodes a remaining-length varint from the front of `data`.
///
/// Returns the value and the number of bytes it occupied, or `None` when the
/// varint is not yet complete.
pub fn decode_remaining_length(data: &[u8]) -> Result<Option<(usize, usize)>> {
    let mut value: usize = 0;
    let mut shift = 0u32;

    for (i, &byte) in data.iter().enumerate() {
        if i >= 4 {
            return Err(SessionError::MalformedPacket(
                "remaining length varint exceeds 4 bytes".to_string(),
            ));
        }
        value |= usize::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
        shift += 7;
    }

    if data.len() >= 4 {
        return Err(SessionError::MalformedPacket(
            "remaining length varint exceeds 4 bytes".to_string(),
        ));
    }
    Ok(None)
}
