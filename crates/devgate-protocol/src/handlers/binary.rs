//! Shared layout of the vendor binary TCP protocols.
//!
//! Both binary vendors use the same header shape and differ only in magic,
//! version and the width of the device identity field. All integers are
//! little-endian. The frame ends with a CRC-32 over everything before it.
//!
//! ```text
//! magic(2) len(2) version(2) device(N) type(1) cmd(1) seq(4) ts(8) body(..) crc32(4)
//! ```

use bytes::{BufMut, Bytes};
use chrono::{DateTime, Utc};

use crate::checksum::crc32;
use crate::error::{ParseError, ParseErrorCode, ProcessErrorCode, VALIDATION_FAILED};
use crate::framing::Framing;

pub(crate) const TRAILER_LEN: usize = 4;

/// Reply type bytes shared by both binary protocols.
pub(crate) const TYPE_ACK: u8 = 0x10;
pub(crate) const TYPE_NAK: u8 = 0x11;

/// Longest error text carried in a reply body.
const MAX_REPLY_TEXT: usize = 255;

#[derive(Debug, Clone, Copy)]
pub(crate) struct BinaryLayout {
    pub magic: u16,
    pub version: u16,
    pub id_len: usize,
}

/// Decoded common header.
#[derive(Debug, Clone)]
pub(crate) struct Header {
    pub declared_len: usize,
    pub device_code: String,
    pub type_code: u8,
    pub command_code: u8,
    pub sequence: u32,
    pub timestamp: DateTime<Utc>,
}

impl BinaryLayout {
    pub fn header_len(&self) -> usize {
        2 + 2 + 2 + self.id_len + 1 + 1 + 4 + 8
    }

    pub fn min_frame_len(&self) -> usize {
        self.header_len() + TRAILER_LEN
    }

    pub fn framing(&self) -> Framing {
        Framing::LengthPrefixed {
            magic: self.magic.to_le_bytes(),
            length_offset: 2,
            min_len: self.min_frame_len(),
        }
    }

    /// Decode the header and return it with the body slice.
    ///
    /// Trailing bytes beyond the declared length are tolerated here and left
    /// for validation to flag.
    pub fn parse<'a>(&self, raw: &'a [u8]) -> Result<(Header, &'a [u8]), ParseError> {
        if raw.is_empty() {
            return Err(ParseError::new(ParseErrorCode::EmptyFrame, "no bytes", raw));
        }
        if raw.len() < self.min_frame_len() {
            return Err(ParseError::too_short(self.min_frame_len(), raw));
        }

        let magic = u16::from_le_bytes([raw[0], raw[1]]);
        if magic != self.magic {
            return Err(ParseError::new(
                ParseErrorCode::BadMagic,
                format!("expected {:#06x}, got {magic:#06x}", self.magic),
                raw,
            ));
        }

        let declared_len = usize::from(u16::from_le_bytes([raw[2], raw[3]]));
        if declared_len < self.min_frame_len() {
            return Err(ParseError::new(
                ParseErrorCode::LengthMismatch,
                format!("declared length {declared_len} below minimum {}", self.min_frame_len()),
                raw,
            ));
        }
        if declared_len > raw.len() {
            return Err(ParseError::new(
                ParseErrorCode::LengthMismatch,
                format!("declares {declared_len} bytes but only {} arrived", raw.len()),
                raw,
            ));
        }

        let version = u16::from_le_bytes([raw[4], raw[5]]);
        if version != self.version {
            return Err(ParseError::new(
                ParseErrorCode::UnsupportedVersion,
                format!("expected {:#06x}, got {version:#06x}", self.version),
                raw,
            ));
        }

        let frame = &raw[..declared_len];
        let crc_at = declared_len - TRAILER_LEN;
        let actual = u32::from_le_bytes([
            frame[crc_at],
            frame[crc_at + 1],
            frame[crc_at + 2],
            frame[crc_at + 3],
        ]);
        let expected = crc32(&frame[..crc_at]);
        if expected != actual {
            return Err(ParseError::checksum(expected, actual, raw));
        }

        let mut reader = Reader::new(&frame[6..crc_at], raw);
        let device_code = reader.fixed_str("device", self.id_len)?;
        let type_code = reader.u8("message_type")?;
        let command_code = reader.u8("command")?;
        let sequence = reader.u32("sequence")?;
        let secs = reader.i64("timestamp")?;
        let timestamp = DateTime::from_timestamp(secs, 0).ok_or_else(|| {
            ParseError::new(ParseErrorCode::BadTimestamp, format!("{secs} out of range"), raw)
        })?;

        let header = Header {
            declared_len,
            device_code,
            type_code,
            command_code,
            sequence,
            timestamp,
        };
        Ok((header, &frame[self.header_len()..crc_at]))
    }

    /// Encode a complete frame with length and CRC filled in.
    pub fn encode(
        &self,
        device_code: &str,
        type_code: u8,
        command_code: u8,
        sequence: u32,
        timestamp: DateTime<Utc>,
        body: &[u8],
    ) -> Bytes {
        let total = self.min_frame_len() + body.len();
        let mut out = Vec::with_capacity(total);
        out.put_u16_le(self.magic);
        out.put_u16_le(u16::try_from(total).unwrap_or(u16::MAX));
        out.put_u16_le(self.version);
        put_fixed(&mut out, device_code, self.id_len);
        out.put_u8(type_code);
        out.put_u8(command_code);
        out.put_u32_le(sequence);
        out.put_i64_le(timestamp.timestamp());
        out.extend_from_slice(body);
        let crc = crc32(&out);
        out.put_u32_le(crc);
        Bytes::from(out)
    }

    /// True when the CRC trailer matches the declared frame.
    pub fn crc_matches(&self, raw: &[u8]) -> bool {
        if raw.len() < self.min_frame_len() {
            return false;
        }
        let declared = usize::from(u16::from_le_bytes([raw[2], raw[3]]));
        if declared < self.min_frame_len() || declared > raw.len() {
            return false;
        }
        let crc_at = declared - TRAILER_LEN;
        let actual = u32::from_le_bytes([raw[crc_at], raw[crc_at + 1], raw[crc_at + 2], raw[crc_at + 3]]);
        crc32(&raw[..crc_at]) == actual
    }
}

/// Write `text` into a fixed-width NUL padded field, truncating if needed.
pub(crate) fn put_fixed(out: &mut Vec<u8>, text: &str, width: usize) {
    let bytes = text.as_bytes();
    let take = bytes.len().min(width);
    out.extend_from_slice(&bytes[..take]);
    out.resize(out.len() + (width - take), 0);
}

/// Numeric reply code carried in ACK/NAK bodies.
pub(crate) fn reply_code(success: bool, error_code: &str) -> u16 {
    if success {
        return 0;
    }
    match error_code {
        VALIDATION_FAILED => 1,
        c if c == ProcessErrorCode::UnsupportedCommand.as_str() => 2,
        c if c == ProcessErrorCode::DownstreamRejected.as_str() => 3,
        c if c == ProcessErrorCode::UnexpectedMessage.as_str() => 4,
        _ => 0xFFFF,
    }
}

/// Reply body: request type, result, numeric code, length-prefixed text.
pub(crate) fn reply_body(
    request_type: u8,
    success: bool,
    error_code: &str,
    error_message: &str,
) -> Vec<u8> {
    let text = if success {
        String::new()
    } else if error_message.is_empty() {
        error_code.to_string()
    } else {
        format!("{error_code}:{error_message}")
    };
    let text = truncate_utf8(&text, MAX_REPLY_TEXT);

    let mut body = Vec::with_capacity(5 + text.len());
    body.put_u8(request_type);
    body.put_u8(u8::from(!success));
    body.put_u16_le(reply_code(success, error_code));
    body.put_u8(text.len() as u8);
    body.extend_from_slice(text.as_bytes());
    body
}

fn truncate_utf8(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Bounds-checked little-endian reader over a frame body.
///
/// Every read names the field it is after so truncation errors say which
/// field ran off the end.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    frame: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8], frame: &'a [u8]) -> Self {
        Self { buf, pos: 0, frame }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn take(&mut self, field: &str, n: usize) -> Result<&'a [u8], ParseError> {
        if self.remaining() < n {
            return Err(ParseError::new(
                ParseErrorCode::BodyTruncated,
                format!(
                    "{field} needs {n} bytes at offset {}, {} left",
                    self.pos,
                    self.remaining()
                ),
                self.frame,
            ));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn u8(&mut self, field: &str) -> Result<u8, ParseError> {
        Ok(self.take(field, 1)?[0])
    }

    pub fn u16(&mut self, field: &str) -> Result<u16, ParseError> {
        let b = self.take(field, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn i16(&mut self, field: &str) -> Result<i16, ParseError> {
        let b = self.take(field, 2)?;
        Ok(i16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self, field: &str) -> Result<u32, ParseError> {
        let b = self.take(field, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64(&mut self, field: &str) -> Result<u64, ParseError> {
        let b = self.take(field, 8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }

    pub fn i64(&mut self, field: &str) -> Result<i64, ParseError> {
        let b = self.take(field, 8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(i64::from_le_bytes(arr))
    }

    /// Fixed-width text field, NUL and space padding stripped.
    pub fn fixed_str(&mut self, field: &str, n: usize) -> Result<String, ParseError> {
        let b = self.take(field, n)?;
        let end = b.iter().position(|&c| c == 0).unwrap_or(b.len());
        let text = std::str::from_utf8(&b[..end]).map_err(|e| {
            ParseError::new(ParseErrorCode::BadEncoding, format!("{field}: {e}"), self.frame)
        })?;
        Ok(text.trim().to_string())
    }

    /// Length-prefixed (`u16`) text field.
    pub fn text_u16(&mut self, field: &str) -> Result<String, ParseError> {
        let len = usize::from(self.u16(field)?);
        let b = self.take(field, len)?;
        Ok(String::from_utf8_lossy(b).into_owned())
    }

    /// Length-prefixed (`u8`) text field.
    pub fn text_u8(&mut self, field: &str) -> Result<String, ParseError> {
        let len = usize::from(self.u8(field)?);
        let b = self.take(field, len)?;
        Ok(String::from_utf8_lossy(b).into_owned())
    }

    /// Epoch seconds as a timestamp.
    pub fn time(&mut self, field: &str) -> Result<DateTime<Utc>, ParseError> {
        let secs = self.i64(field)?;
        DateTime::from_timestamp(secs, 0).ok_or_else(|| {
            ParseError::new(
                ParseErrorCode::BadTimestamp,
                format!("{field}: {secs} out of range"),
                self.frame,
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAYOUT: BinaryLayout = BinaryLayout {
        magic: 0x1234,
        version: 0x0001,
        id_len: 4,
    };

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn encode_then_parse_header() {
        let frame = LAYOUT.encode("AB", 0x02, 0x09, 77, now(), &[1, 2, 3]);
        assert_eq!(frame.len(), LAYOUT.min_frame_len() + 3);
        let (header, body) = LAYOUT.parse(&frame).unwrap();
        assert_eq!(header.device_code, "AB");
        assert_eq!(header.type_code, 0x02);
        assert_eq!(header.command_code, 0x09);
        assert_eq!(header.sequence, 77);
        assert_eq!(header.timestamp, now());
        assert_eq!(body, &[1, 2, 3]);
        assert!(LAYOUT.crc_matches(&frame));
    }

    #[test]
    fn parse_rejects_bad_crc_and_magic() {
        let frame = LAYOUT.encode("AB", 1, 0, 1, now(), &[]);
        let mut corrupt = frame.to_vec();
        corrupt[10] ^= 0x01;
        assert_eq!(
            LAYOUT.parse(&corrupt).unwrap_err().code,
            ParseErrorCode::ChecksumMismatch
        );
        let mut wrong = frame.to_vec();
        wrong[0] = 0x00;
        assert_eq!(LAYOUT.parse(&wrong).unwrap_err().code, ParseErrorCode::BadMagic);
    }

    #[test]
    fn parse_rejects_truncation() {
        let frame = LAYOUT.encode("AB", 1, 0, 1, now(), &[0; 8]);
        let err = LAYOUT.parse(&frame[..frame.len() - 2]).unwrap_err();
        assert_eq!(err.code, ParseErrorCode::LengthMismatch);
        let err = LAYOUT.parse(&frame[..5]).unwrap_err();
        assert_eq!(err.code, ParseErrorCode::FrameTooShort);
    }

    #[test]
    fn fixed_field_truncates_and_pads() {
        let mut out = Vec::new();
        put_fixed(&mut out, "ABCDEFG", 4);
        put_fixed(&mut out, "Z", 3);
        assert_eq!(out, b"ABCDZ\0\0");
    }

    #[test]
    fn reply_body_layout() {
        let body = reply_body(0x07, false, VALIDATION_FAILED, "crc");
        assert_eq!(body[0], 0x07);
        assert_eq!(body[1], 1);
        assert_eq!(u16::from_le_bytes([body[2], body[3]]), 1);
        assert_eq!(&body[5..], b"VALIDATION_FAILED:crc");
        assert_eq!(usize::from(body[4]), body.len() - 5);

        let ok = reply_body(0x07, true, "", "");
        assert_eq!(ok, vec![0x07, 0, 0, 0, 0]);
    }

    #[test]
    fn reader_reports_field_on_truncation() {
        let data = [1u8, 2];
        let mut reader = Reader::new(&data, &data);
        assert_eq!(reader.u8("a").unwrap(), 1);
        let err = reader.u32("amount").unwrap_err();
        assert_eq!(err.code, ParseErrorCode::BodyTruncated);
        assert!(err.detail.contains("amount"));
    }
}
