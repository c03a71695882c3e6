//! Little-endian field readers and writers for packet bodies.
//!
//! Every variable-length field (UTF-8 strings and binary blocks) carries a
//! uint32 little-endian length prefix. Running out of input is reported as
//! [`ProtocolError::NeedMoreData`]; anything that can never become valid by
//! waiting for more bytes is [`ProtocolError::Corrupt`].

use crate::error::{constants, ProtocolError, Result};
use bytes::BufMut;

/// Cursor over a borrowed byte slice.
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Number of bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(ProtocolError::NeedMoreData);
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    /// Reads a length-prefixed binary block of at most `max_len` bytes.
    ///
    /// The declared length is checked before waiting for the data, so a peer
    /// cannot make us buffer an oversized block.
    pub fn read_block(&mut self, max_len: usize) -> Result<&'a [u8]> {
        let len = self.read_u32()? as usize;
        if len > max_len {
            return Err(ProtocolError::corrupt(constants::ERR_BLOCK_TOO_LONG));
        }
        self.take(len)
    }

    /// Reads a length-prefixed binary block that must be exactly `N` bytes.
    pub fn read_fixed_block<const N: usize>(&mut self) -> Result<[u8; N]> {
        let len = self.read_u32()? as usize;
        if len != N {
            return Err(ProtocolError::corrupt(constants::ERR_BLOCK_WRONG_LENGTH));
        }
        self.read_array()
    }

    /// Reads a length-prefixed UTF-8 string of at most `max_chars` characters.
    pub fn read_utf8(&mut self, max_chars: usize) -> Result<String> {
        let len = self.read_u32()? as usize;
        // a UTF-8 character is at most 4 bytes, anything longer cannot fit
        if len > max_chars.saturating_mul(4) {
            return Err(ProtocolError::corrupt(constants::ERR_STRING_TOO_LONG));
        }
        let raw = self.take(len)?;
        let text = std::str::from_utf8(raw)
            .map_err(|_| ProtocolError::corrupt(constants::ERR_INVALID_UTF8))?;
        if text.chars().count() > max_chars {
            return Err(ProtocolError::corrupt(constants::ERR_STRING_TOO_LONG));
        }
        Ok(text.to_owned())
    }
}

/// Field writer on top of any [`BufMut`].
pub struct WireWriter<'a, B: BufMut> {
    buf: &'a mut B,
}

impl<'a, B: BufMut> WireWriter<'a, B> {
    pub fn new(buf: &'a mut B) -> Self {
        Self { buf }
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn put_u16(&mut self, value: u16) {
        self.buf.put_u16_le(value);
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf.put_u32_le(value);
    }

    pub fn put_raw(&mut self, data: &[u8]) {
        self.buf.put_slice(data);
    }

    /// Writes a length-prefixed binary block, refusing anything over `max_len`.
    pub fn put_block(&mut self, data: &[u8], max_len: usize) -> Result<()> {
        if data.len() > max_len {
            return Err(ProtocolError::InvalidField(
                constants::ERR_BLOCK_TOO_LONG.to_string(),
            ));
        }
        self.buf.put_u32_le(data.len() as u32);
        self.buf.put_slice(data);
        Ok(())
    }

    /// Writes a length-prefixed UTF-8 string, refusing more than `max_chars`.
    pub fn put_utf8(&mut self, text: &str, max_chars: usize) -> Result<()> {
        if text.chars().count() > max_chars {
            return Err(ProtocolError::InvalidField(
                constants::ERR_STRING_TOO_LONG.to_string(),
            ));
        }
        self.buf.put_u32_le(text.len() as u32);
        self.buf.put_slice(text.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_short_integer_needs_more_data() {
        let mut reader = WireReader::new(&[0x01]);
        assert!(matches!(reader.read_u16(), Err(ProtocolError::NeedMoreData)));
    }

    #[test]
    fn test_integers_are_little_endian() {
        let mut reader = WireReader::new(&[0x34, 0x12, 0x78, 0x56, 0x34, 0x12]);
        assert_eq!(reader.read_u16().unwrap(), 0x1234);
        assert_eq!(reader.read_u32().unwrap(), 0x1234_5678);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_string_counts_characters_not_bytes() {
        let mut buf = Vec::new();
        // four characters, twelve bytes
        WireWriter::new(&mut buf).put_utf8("日本語!", 4).unwrap();
        let mut reader = WireReader::new(&buf);
        assert_eq!(reader.read_utf8(4).unwrap(), "日本語!");
    }

    #[test]
    fn test_overlong_string_is_corrupt_before_data_arrives() {
        // declares 1000 bytes for a 32 character field, no data yet
        let buf = 1000u32.to_le_bytes();
        let mut reader = WireReader::new(&buf);
        assert!(matches!(reader.read_utf8(32), Err(ProtocolError::Corrupt(_))));
    }

    #[test]
    fn test_truncated_string_needs_more_data() {
        let mut buf = Vec::new();
        WireWriter::new(&mut buf).put_utf8("warrior", 32).unwrap();
        let mut reader = WireReader::new(&buf[..buf.len() - 2]);
        assert!(matches!(reader.read_utf8(32), Err(ProtocolError::NeedMoreData)));
    }

    #[test]
    fn test_invalid_utf8_is_corrupt() {
        let mut buf = Vec::new();
        WireWriter::new(&mut buf).put_block(&[0xff, 0xfe], 16).unwrap();
        let mut reader = WireReader::new(&buf);
        assert!(matches!(reader.read_utf8(32), Err(ProtocolError::Corrupt(_))));
    }

    #[test]
    fn test_fixed_block_rejects_wrong_length() {
        let mut buf = Vec::new();
        WireWriter::new(&mut buf).put_block(&[1, 2, 3], 16).unwrap();
        let mut reader = WireReader::new(&buf);
        assert!(matches!(
            reader.read_fixed_block::<16>(),
            Err(ProtocolError::Corrupt(_))
        ));
    }

    #[test]
    fn test_writer_refuses_oversized_fields() {
        let mut buf = Vec::new();
        let mut writer = WireWriter::new(&mut buf);
        assert!(writer.put_utf8(&"x".repeat(33), 32).is_err());
        assert!(writer.put_block(&[0u8; 17], 16).is_err());
        assert!(buf.is_empty());
    }
}
