//! Frame layer: the 9-byte header, opcodes, and a tokio_util codec.
//!
//! Every message is one frame: `{version, flags, stream id, opcode, body
//! length}` followed by the body. Requests carry version 0x04; responses
//! carry the same version with the high bit set.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CqlError;

/// Protocol version sent in request headers.
pub const REQUEST_VERSION: u8 = 0x04;

/// Protocol version expected in response headers (request version with the
/// direction bit set).
pub const RESPONSE_VERSION: u8 = REQUEST_VERSION | 0x80;

/// Size of the fixed frame header.
pub const HEADER_SIZE: usize = 9;

/// Upper bound on a frame body; anything larger is a protocol violation.
pub const MAX_BODY_SIZE: usize = 256 * 1024 * 1024;

/// Frame opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Server error report.
    Error = 0x00,
    /// Request: open a connection with chosen options.
    Startup = 0x01,
    /// Server is ready for queries.
    Ready = 0x02,
    /// Server demands authentication.
    Authenticate = 0x03,
    /// Request: ask for supported options.
    Options = 0x05,
    /// Server's supported options multimap.
    Supported = 0x06,
    /// Request: execute a query.
    Query = 0x07,
    /// Query result.
    Result = 0x08,
    /// Request: answer an authentication challenge.
    AuthResponse = 0x0F,
    /// Authentication accepted.
    AuthSuccess = 0x10,
}

impl Opcode {
    /// Map a header byte to an opcode.
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Error),
            0x01 => Some(Self::Startup),
            0x02 => Some(Self::Ready),
            0x03 => Some(Self::Authenticate),
            0x05 => Some(Self::Options),
            0x06 => Some(Self::Supported),
            0x07 => Some(Self::Query),
            0x08 => Some(Self::Result),
            0x0F => Some(Self::AuthResponse),
            0x10 => Some(Self::AuthSuccess),
            _ => None,
        }
    }
}

/// One complete protocol message.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Protocol version byte as it appeared on the wire.
    pub version: u8,
    /// Header flags (compression, tracing; always 0 here).
    pub flags: u8,
    /// Per-connection request identifier.
    pub stream: i16,
    /// Message purpose.
    pub opcode: Opcode,
    /// Frame body; its length always matches the header length field.
    pub body: Bytes,
}

impl Frame {
    /// Build a request frame.
    pub fn request(stream: i16, opcode: Opcode, body: Bytes) -> Self {
        Self {
            version: REQUEST_VERSION,
            flags: 0,
            stream,
            opcode,
            body,
        }
    }
}

/// Frame codec for tokio_util.
///
/// Decoding returns `Ok(None)` until a full header and body are buffered, so
/// short reads are absorbed by the caller's read loop. Encoding writes the
/// header and body in one pass.
#[derive(Debug, Default)]
pub struct FrameCodec;

impl FrameCodec {
    /// Create a new codec.
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = CqlError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        // Peek at the header without consuming it; the body may not have
        // arrived yet.
        let body_len = u32::from_be_bytes([src[5], src[6], src[7], src[8]]) as usize;
        if body_len > MAX_BODY_SIZE {
            return Err(CqlError::internal(format!(
                "frame body of {body_len} bytes exceeds the {MAX_BODY_SIZE} byte limit"
            )));
        }
        if src.len() < HEADER_SIZE + body_len {
            return Ok(None);
        }

        let version = src.get_u8();
        let flags = src.get_u8();
        let stream = src.get_i16();
        let opcode_byte = src.get_u8();
        let _length = src.get_u32();
        let body = src.split_to(body_len).freeze();

        let opcode = Opcode::from_u8(opcode_byte).ok_or_else(|| {
            CqlError::internal(format!("unknown opcode {opcode_byte:#04x}"))
        })?;

        Ok(Some(Frame {
            version,
            flags,
            stream,
            opcode,
            body,
        }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = CqlError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if frame.body.len() > MAX_BODY_SIZE {
            return Err(CqlError::interface(format!(
                "frame body of {} bytes exceeds the {MAX_BODY_SIZE} byte limit",
                frame.body.len()
            )));
        }
        dst.reserve(HEADER_SIZE + frame.body.len());
        dst.put_u8(frame.version);
        dst.put_u8(frame.flags);
        dst.put_i16(frame.stream);
        dst.put_u8(frame.opcode as u8);
        dst.put_u32(frame.body.len() as u32);
        dst.put_slice(&frame.body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_round_trip() {
        for opcode in [
            Opcode::Error,
            Opcode::Startup,
            Opcode::Ready,
            Opcode::Authenticate,
            Opcode::Options,
            Opcode::Supported,
            Opcode::Query,
            Opcode::Result,
            Opcode::AuthResponse,
            Opcode::AuthSuccess,
        ] {
            assert_eq!(Opcode::from_u8(opcode as u8), Some(opcode));
        }
        assert_eq!(Opcode::from_u8(0x04), None);
        assert_eq!(Opcode::from_u8(0xFF), None);
    }

    #[test]
    fn test_response_version_differs_by_direction_bit() {
        assert_eq!(RESPONSE_VERSION, 0x84);
        assert_eq!(RESPONSE_VERSION & 0x7F, REQUEST_VERSION);
    }

    #[test]
    fn test_encode_header_layout() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        let frame = Frame::request(7, Opcode::Query, Bytes::from_static(b"body"));
        codec.encode(frame, &mut buf).unwrap();

        assert_eq!(buf.len(), HEADER_SIZE + 4);
        assert_eq!(buf[0], REQUEST_VERSION);
        assert_eq!(buf[1], 0); // flags
        assert_eq!(&buf[2..4], &[0, 7]); // stream id, big-endian
        assert_eq!(buf[4], Opcode::Query as u8);
        assert_eq!(&buf[5..9], &[0, 0, 0, 4]); // body length
        assert_eq!(&buf[9..], b"body");
    }

    #[test]
    fn test_decode_round_trip() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        let frame = Frame::request(1, Opcode::Options, Bytes::new());
        codec.encode(frame, &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.opcode, Opcode::Options);
        assert_eq!(decoded.stream, 1);
        assert!(decoded.body.is_empty());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_waits_for_full_frame() {
        let mut codec = FrameCodec::new();
        let mut full = BytesMut::new();
        codec
            .encode(
                Frame::request(0, Opcode::Query, Bytes::from_static(b"SELECT")),
                &mut full,
            )
            .unwrap();

        // Header only
        let mut partial = BytesMut::from(&full[..HEADER_SIZE]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        // Header + half the body
        let mut partial = BytesMut::from(&full[..HEADER_SIZE + 3]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        // Everything
        let decoded = codec.decode(&mut full).unwrap().unwrap();
        assert_eq!(&decoded.body[..], b"SELECT");
    }

    #[test]
    fn test_decode_multiple_frames() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        for stream in 0..3 {
            codec
                .encode(Frame::request(stream, Opcode::Options, Bytes::new()), &mut buf)
                .unwrap();
        }
        for stream in 0..3 {
            let frame = codec.decode(&mut buf).unwrap().unwrap();
            assert_eq!(frame.stream, stream);
        }
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_unknown_opcode() {
        let mut buf = BytesMut::new();
        buf.put_u8(RESPONSE_VERSION);
        buf.put_u8(0);
        buf.put_i16(0);
        buf.put_u8(0x42);
        buf.put_u32(0);

        let mut codec = FrameCodec::new();
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, CqlError::Internal(_)));
    }

    #[test]
    fn test_decode_oversized_body_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u8(RESPONSE_VERSION);
        buf.put_u8(0);
        buf.put_i16(0);
        buf.put_u8(Opcode::Result as u8);
        buf.put_u32((MAX_BODY_SIZE + 1) as u32);

        let mut codec = FrameCodec::new();
        assert!(codec.decode(&mut buf).is_err());
    }
}
