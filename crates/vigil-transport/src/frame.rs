//! Netstring framing: `<decimal length>:<payload>,`.
//!
//! The same framing is used on the wire ([`NetstringCodec`], async) and in
//! the cluster log segments ([`write_netstring`] / [`read_netstring`], sync).

use std::io::{self, Read, Write};

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::TransportError;

/// Default upper bound for a single frame (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Longest accepted length prefix (digits).
const MAX_LEN_DIGITS: usize = 10;

/// Codec for netstring-framed UTF-8 payloads.
#[derive(Debug, Clone)]
pub struct NetstringCodec {
    max_frame_size: usize,
}

impl NetstringCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for NetstringCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

fn parse_len(prefix: &[u8]) -> Result<usize, TransportError> {
    if prefix.is_empty() || !prefix.iter().all(u8::is_ascii_digit) {
        return Err(TransportError::MalformedFrame(format!(
            "invalid length prefix {:?}",
            String::from_utf8_lossy(prefix)
        )));
    }
    std::str::from_utf8(prefix)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| TransportError::MalformedFrame("length prefix overflow".into()))
}

impl Decoder for NetstringCodec {
    type Item = String;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, TransportError> {
        let Some(colon) = src.iter().take(MAX_LEN_DIGITS + 1).position(|b| *b == b':') else {
            if src.len() > MAX_LEN_DIGITS || src.iter().any(|b| !b.is_ascii_digit()) {
                return Err(TransportError::MalformedFrame(
                    "missing length separator".into(),
                ));
            }
            return Ok(None);
        };

        let len = parse_len(&src[..colon])?;
        if len > self.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                size: len,
                max: self.max_frame_size,
            });
        }

        let total = colon + 1 + len + 1;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }
        if src[total - 1] != b',' {
            return Err(TransportError::MalformedFrame("missing trailing comma".into()));
        }

        let frame = src.split_to(total);
        let payload = frame[colon + 1..colon + 1 + len].to_vec();
        String::from_utf8(payload)
            .map(Some)
            .map_err(|e| TransportError::MalformedFrame(format!("payload is not UTF-8: {e}")))
    }
}

impl<T: AsRef<str>> Encoder<T> for NetstringCodec {
    type Error = TransportError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), TransportError> {
        let payload = item.as_ref().as_bytes();
        let prefix = payload.len().to_string();
        dst.reserve(prefix.len() + payload.len() + 2);
        dst.put_slice(prefix.as_bytes());
        dst.put_u8(b':');
        dst.put_slice(payload);
        dst.put_u8(b',');
        Ok(())
    }
}

/// Write one netstring to a blocking writer.
pub fn write_netstring<W: Write>(writer: &mut W, payload: &str) -> io::Result<()> {
    write!(writer, "{}:", payload.len())?;
    writer.write_all(payload.as_bytes())?;
    writer.write_all(b",")
}

/// Read one netstring from a blocking reader.
///
/// Returns `Ok(None)` on a clean end of stream (no bytes of a new frame read).
/// A stream that ends inside a frame yields `UnexpectedEof`.
pub fn read_netstring<R: Read>(reader: &mut R, max_frame_size: usize) -> io::Result<Option<String>> {
    let mut prefix = Vec::with_capacity(MAX_LEN_DIGITS);
    let mut byte = [0u8; 1];

    loop {
        if reader.read(&mut byte)? == 0 {
            if prefix.is_empty() {
                return Ok(None);
            }
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        if byte[0] == b':' {
            break;
        }
        if prefix.len() == MAX_LEN_DIGITS {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "length prefix too long"));
        }
        prefix.push(byte[0]);
    }

    let len = parse_len(&prefix).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if len > max_frame_size {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds {max_frame_size}"),
        ));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    reader.read_exact(&mut byte)?;
    if byte[0] != b',' {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "missing trailing comma"));
    }

    String::from_utf8(payload)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_produces_netstring() {
        let mut codec = NetstringCodec::default();
        let mut buf = BytesMut::new();
        codec.encode("hello", &mut buf).unwrap();
        assert_eq!(&buf[..], b"5:hello,");
    }

    #[test]
    fn decode_waits_for_complete_frame() {
        let mut codec = NetstringCodec::default();
        let mut buf = BytesMut::from(&b"11:hello"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b" world,3:abc,");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("hello world"));
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("abc"));
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_rejects_oversized_frame() {
        let mut codec = NetstringCodec::new(4);
        let mut buf = BytesMut::from(&b"5:hello,"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(TransportError::FrameTooLarge { size: 5, max: 4 })
        ));
    }

    #[test]
    fn decode_rejects_missing_comma() {
        let mut codec = NetstringCodec::default();
        let mut buf = BytesMut::from(&b"2:abX"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(TransportError::MalformedFrame(_))
        ));
    }

    #[test]
    fn decode_rejects_garbage_prefix() {
        let mut codec = NetstringCodec::default();
        let mut buf = BytesMut::from(&b"{\"jsonrpc\""[..]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn empty_payload() {
        let mut codec = NetstringCodec::default();
        let mut buf = BytesMut::from(&b"0:,"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some(""));
    }

    #[test]
    fn sync_helpers_read_what_was_written() {
        let mut out = Vec::new();
        write_netstring(&mut out, "first").unwrap();
        write_netstring(&mut out, "{\"a\":1}").unwrap();

        let mut reader = &out[..];
        assert_eq!(read_netstring(&mut reader, 1024).unwrap().as_deref(), Some("first"));
        assert_eq!(read_netstring(&mut reader, 1024).unwrap().as_deref(), Some("{\"a\":1}"));
        assert!(read_netstring(&mut reader, 1024).unwrap().is_none());
    }

    #[test]
    fn sync_reader_reports_truncation() {
        let mut reader = &b"10:short"[..];
        let err = read_netstring(&mut reader, 1024).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
