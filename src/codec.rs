//! Byte-order conversion and fixed-layout TLV framing (component C1).
//!
//! TLV values on the wire are big-endian. The base frame is
//! `{type: u8, length: u8, value: [u8; length]}`; when `length == 255` an
//! extended form follows: `{type, 255, length_be16, value}`.

use crate::error::{Error, Result};

pub const EXTENDED_LENGTH_MARKER: u8 = 255;

#[inline]
pub const fn swap16(v: u16) -> u16 {
    v.swap_bytes()
}

#[inline]
pub const fn swap32(v: u32) -> u32 {
    v.swap_bytes()
}

#[inline]
pub const fn swap64(v: u64) -> u64 {
    v.swap_bytes()
}

#[inline]
pub const fn host_to_be16(v: u16) -> u16 {
    v.to_be()
}

#[inline]
pub const fn host_to_be32(v: u32) -> u32 {
    v.to_be()
}

#[inline]
pub const fn host_to_be64(v: u64) -> u64 {
    v.to_be()
}

#[inline]
pub const fn be_to_host16(v: u16) -> u16 {
    u16::from_be(v)
}

#[inline]
pub const fn be_to_host32(v: u32) -> u32 {
    u32::from_be(v)
}

#[inline]
pub const fn be_to_host64(v: u64) -> u64 {
    u64::from_be(v)
}

/// Offset and length (of the *value*, excluding the type/length header bytes)
/// of a TLV found within a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlvSpan {
    pub value_offset: usize,
    pub length: usize,
}

/// Linear scan for the first TLV of type `ty` in `message`. Returns the span
/// of its value, not including the type/length header.
pub fn find_tlv(message: &[u8], ty: u8) -> Option<TlvSpan> {
    let mut offset = 0usize;
    while offset + 2 <= message.len() {
        let cur_type = message[offset];
        let len_byte = message[offset + 1];
        let (value_offset, length) = if len_byte == EXTENDED_LENGTH_MARKER {
            if offset + 4 > message.len() {
                return None;
            }
            let len = u16::from_be_bytes([message[offset + 2], message[offset + 3]]) as usize;
            (offset + 4, len)
        } else {
            (offset + 2, len_byte as usize)
        };

        if value_offset + length > message.len() {
            return None;
        }

        if cur_type == ty {
            return Some(TlvSpan {
                value_offset,
                length,
            });
        }

        offset = value_offset + length;
    }
    None
}

/// Bounded copy of a fixed-size TLV value into `out`. Fails with
/// [`Error::Parse`] if the TLV is missing, or its length does not match
/// `out`'s size exactly.
pub fn read_tlv(message: &[u8], ty: u8, out: &mut [u8]) -> Result<()> {
    let span = find_tlv(message, ty).ok_or(Error::Parse)?;
    if span.length != out.len() {
        return Err(Error::Parse);
    }
    out.copy_from_slice(&message[span.value_offset..span.value_offset + span.length]);
    Ok(())
}

/// Like [`read_tlv`] but accepts any length up to `out.len()`, copying into
/// the prefix of `out` and returning the number of bytes copied. Used for
/// variable-length TLVs (e.g. `TlvRequest`, `AddressRegistration`).
pub fn read_tlv_bounded(message: &[u8], ty: u8, out: &mut [u8]) -> Result<usize> {
    let span = find_tlv(message, ty).ok_or(Error::Parse)?;
    if span.length > out.len() {
        return Err(Error::Parse);
    }
    out[..span.length].copy_from_slice(&message[span.value_offset..span.value_offset + span.length]);
    Ok(span.length)
}

/// Cursor-style writer over a fixed `&mut [u8]` buffer, used to build
/// outbound TLV sequences without allocation.
pub struct TlvCursor<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> TlvCursor<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn written(&self) -> &[u8] {
        &self.buf[..self.pos]
    }

    fn push_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let end = self.pos + bytes.len();
        if end > self.buf.len() {
            return Err(Error::NoBufs);
        }
        self.buf[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
        Ok(())
    }

    /// Append one raw byte (used for the MHDR-equivalent command byte).
    pub fn push_u8(&mut self, byte: u8) -> Result<()> {
        self.push_bytes(&[byte])
    }

    /// Append a TLV, choosing the extended form automatically when
    /// `value.len() >= EXTENDED_LENGTH_MARKER as usize`.
    pub fn push_tlv(&mut self, ty: u8, value: &[u8]) -> Result<()> {
        if value.len() >= EXTENDED_LENGTH_MARKER as usize {
            if value.len() > u16::MAX as usize {
                return Err(Error::NoBufs);
            }
            self.push_bytes(&[ty, EXTENDED_LENGTH_MARKER])?;
            self.push_bytes(&(value.len() as u16).to_be_bytes())?;
        } else {
            self.push_bytes(&[ty, value.len() as u8])?;
        }
        self.push_bytes(value)
    }
}
