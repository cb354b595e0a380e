//! PostgreSQL wire protocol encoding and decoding primitives.
//!
//! PostgreSQL uses big-endian (network byte order) for all integers.
//! Readers return the decoded value together with the unread remainder.

use crate::error::{Error, Result};
use zerocopy::FromBytes;

use super::types::{I16BE, I32BE, U16BE, U32BE};

fn too_short(what: &str, have: usize, need: usize) -> Error {
    Error::Protocol(format!("{what}: buffer too short: {have} < {need}"))
}

/// `int16`, as found in counts and format codes.
#[inline]
pub fn read_i16(data: &[u8]) -> Result<(i16, &[u8])> {
    let (head, rest) = data
        .split_at_checked(2)
        .ok_or_else(|| too_short("read_i16", data.len(), 2))?;
    Ok((I16BE::ref_from_bytes(head)?.get(), rest))
}

/// Unsigned 16-bit field.
#[inline]
pub fn read_u16(data: &[u8]) -> Result<(u16, &[u8])> {
    let (head, rest) = data
        .split_at_checked(2)
        .ok_or_else(|| too_short("read_u16", data.len(), 2))?;
    Ok((U16BE::ref_from_bytes(head)?.get(), rest))
}

/// `int32`: lengths and value sizes, -1 meaning NULL.
#[inline]
pub fn read_i32(data: &[u8]) -> Result<(i32, &[u8])> {
    let (head, rest) = data
        .split_at_checked(4)
        .ok_or_else(|| too_short("read_i32", data.len(), 4))?;
    Ok((I32BE::ref_from_bytes(head)?.get(), rest))
}

/// Unsigned 32-bit field, used for OIDs.
#[inline]
pub fn read_u32(data: &[u8]) -> Result<(u32, &[u8])> {
    let (head, rest) = data
        .split_at_checked(4)
        .ok_or_else(|| too_short("read_u32", data.len(), 4))?;
    Ok((U32BE::ref_from_bytes(head)?.get(), rest))
}

/// Split off `len` bytes.
#[inline]
pub fn read_bytes(data: &[u8], len: usize) -> Result<(&[u8], &[u8])> {
    data.split_at_checked(len)
        .ok_or_else(|| too_short("read_bytes", data.len(), len))
}

/// NUL-terminated UTF-8 string.
#[inline]
pub fn read_cstr(data: &[u8]) -> Result<(&str, &[u8])> {
    let pos = memchr::memchr(0, data)
        .ok_or_else(|| Error::Protocol("read_cstr: missing NUL terminator".into()))?;
    let s = simdutf8::compat::from_utf8(&data[..pos])
        .map_err(|e| Error::Protocol(format!("read_cstr: invalid UTF-8: {e}")))?;
    Ok((s, &data[pos + 1..]))
}

#[inline]
pub fn write_i16(out: &mut Vec<u8>, value: i16) {
    out.extend_from_slice(&value.to_be_bytes());
}

#[inline]
pub fn write_i32(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_be_bytes());
}

#[inline]
pub fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Convert a count or length for an `int16` field.
pub fn len_i16(len: usize, what: &str) -> Result<i16> {
    i16::try_from(len)
        .map_err(|err| Error::InvalidUsage(format!("{len} {what} do not fit the wire format: {err}")))
}

/// Convert a length for an `int32` field.
pub fn len_i32(len: usize, what: &str) -> Result<i32> {
    i32::try_from(len)
        .map_err(|err| Error::InvalidUsage(format!("{len} {what} do not fit the wire format: {err}")))
}

/// Convert a count or length for an unsigned 32-bit field.
///
/// Lengths that collide with the NULL sentinel are rejected too.
pub fn len_u32(len: usize, what: &str) -> Result<u32> {
    len_i32(len, what).map(|len| len as u32)
}

/// Append `s` followed by a NUL byte.
#[inline]
pub fn write_cstr(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

/// Appends one frontend message to a buffer.
///
/// A message is a tag byte, then an `int32` length that counts itself and the
/// body but not the tag. The length is patched in by [`finish`](Self::finish).
pub struct MessageBuilder<'a> {
    buf: &'a mut Vec<u8>,
    start: usize,
}

impl<'a> MessageBuilder<'a> {
    /// Write the tag and reserve the length.
    pub fn new(buf: &'a mut Vec<u8>, type_byte: u8) -> Self {
        buf.push(type_byte);
        let start = buf.len();
        buf.extend_from_slice(&[0, 0, 0, 0]);
        Self { buf, start }
    }

    /// Raw access for bodies the helpers below do not cover.
    pub fn buf(&mut self) -> &mut Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_i16(&mut self, value: i16) {
        write_i16(self.buf, value);
    }

    pub fn write_i32(&mut self, value: i32) {
        write_i32(self.buf, value);
    }

    pub fn write_u32(&mut self, value: u32) {
        write_u32(self.buf, value);
    }

    pub fn write_cstr(&mut self, s: &str) {
        write_cstr(self.buf, s);
    }

    /// Patch the length field.
    pub fn finish(self) {
        let len = (self.buf.len() - self.start) as i32;
        self.buf[self.start..self.start + 4].copy_from_slice(&len.to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_integers() {
        let data = [0x00, 0x01, 0xff, 0xff, 0xff, 0xff, 0x07];
        let (a, rest) = read_i16(&data).unwrap();
        assert_eq!(a, 1);
        let (b, rest) = read_u32(rest).unwrap();
        assert_eq!(b, u32::MAX);
        assert_eq!(rest, &[0x07]);
        assert!(read_i32(rest).is_err());
    }

    #[test]
    fn read_cstr_splits_at_nul() {
        let (s, rest) = read_cstr(b"SELECT 1\0tail").unwrap();
        assert_eq!(s, "SELECT 1");
        assert_eq!(rest, b"tail");
        assert!(read_cstr(b"no terminator").is_err());
    }

    #[test]
    fn builder_fills_length() {
        let mut buf = Vec::new();
        let mut msg = MessageBuilder::new(&mut buf, b'Q');
        msg.write_cstr("x");
        msg.finish();
        assert_eq!(buf, [b'Q', 0, 0, 0, 6, b'x', 0]);
    }

    #[test]
    fn oversized_lengths_are_rejected() {
        assert_eq!(len_i16(3, "parameters").unwrap(), 3);
        assert!(matches!(len_i16(40_000, "parameters"), Err(Error::InvalidUsage(_))));
        assert_eq!(len_u32(7, "elements").unwrap(), 7);
        assert!(matches!(len_u32(u32::MAX as usize, "bytes"), Err(Error::InvalidUsage(_))));
    }
}
