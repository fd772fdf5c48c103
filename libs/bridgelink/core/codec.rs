//! Wire framing for the direct and relay transports
//!
//! # Direct transport
//!
//! ```text
//! +----------------+------------------+------------------+
//! | type (i32 BE)  | length (u32 BE)  | payload (length) |
//! +----------------+------------------+------------------+
//! ```
//!
//! # Relay transport (one WebSocket binary message)
//!
//! ```text
//! +---------------------+-----------------------------------+
//! | envelope (i32 BE)   | body (rest of the message)        |
//! +---------------------+-----------------------------------+
//! ```
//!
//! A `ClientProxy` body is itself a frame without an explicit length:
//! `type (i32 BE) || payload`.
//!
//! Declared lengths are checked against the allocation ceiling before any
//! payload buffer is allocated.

use std::io::{self, Read, Write};
use thiserror::Error;

/// Bytes in a direct frame header (type + length)
pub const DIRECT_HEADER_LEN: usize = 8;

/// Bytes in a relay envelope header, and in a proxied frame's type prefix
pub const RELAY_HEADER_LEN: usize = 4;

/// Default ceiling for a single payload (50 MiB)
pub const DEFAULT_MAX_PACKET_ALLOCATION: usize = 50 * 1024 * 1024;

/// Relay envelope type codes
pub mod envelope {
    /// The relay accepted the connection (connect -> client)
    pub const CONNECTION_OK: i32 = 0;
    /// Proxied session data (both directions between client and relay)
    pub const CLIENT_PROXY: i32 = 100;
    /// Register a push token (client -> connect)
    pub const CLIENT_ADD_PUSH_TOKEN: i32 = 110;
    /// Deregister a push token (client -> connect)
    pub const CLIENT_REMOVE_PUSH_TOKEN: i32 = 111;
    /// New client connection (connect -> server)
    pub const SERVER_OPEN: i32 = 200;
    /// Closed client connection (server <-> connect)
    pub const SERVER_CLOSE: i32 = 201;
    /// Proxied data for one client (server <-> connect)
    pub const SERVER_PROXY: i32 = 210;
    /// Proxied data for all clients (server -> connect)
    pub const SERVER_PROXY_BROADCAST: i32 = 211;
    /// Notify offline clients of a new message (server -> connect)
    pub const SERVER_NOTIFY_PUSH: i32 = 212;
}

/// Framing errors
#[derive(Error, Debug)]
pub enum FrameError {
    /// Not enough bytes for the header or the declared payload
    #[error("Truncated frame: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    /// Declared length exceeds the allocation ceiling
    #[error("Oversized packet: declared {declared} bytes (max {max})")]
    OversizedPacket { declared: usize, max: usize },

    /// The stream ended mid-frame or before a header
    #[error("Connection closed")]
    ConnectionClosed,

    /// Underlying stream error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// One decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub message_type: i32,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(message_type: i32, payload: Vec<u8>) -> Self {
        Self {
            message_type,
            payload,
        }
    }
}

/// Encode a direct frame: `type || length || payload`
///
/// The length field is 32 bits wide. Transports never pass payloads above
/// `max_packet_allocation`, which configuration caps at `u32::MAX`.
pub fn encode_direct(message_type: i32, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(DIRECT_HEADER_LEN + payload.len());
    buf.extend_from_slice(&message_type.to_be_bytes());
    debug_assert!(u32::try_from(payload.len()).is_ok());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Encode a proxied relay frame: `envelope || type || payload`
pub fn encode_relay(envelope_type: i32, message_type: i32, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 * RELAY_HEADER_LEN + payload.len());
    buf.extend_from_slice(&envelope_type.to_be_bytes());
    buf.extend_from_slice(&message_type.to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Encode a bare relay envelope: `envelope || body`
pub fn encode_envelope(envelope_type: i32, body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(RELAY_HEADER_LEN + body.len());
    buf.extend_from_slice(&envelope_type.to_be_bytes());
    buf.extend_from_slice(body);
    buf
}

fn read_i32(bytes: &[u8]) -> i32 {
    i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Decode a complete direct frame held in memory
pub fn decode_direct(bytes: &[u8], max_packet_allocation: usize) -> Result<Frame, FrameError> {
    if bytes.len() < DIRECT_HEADER_LEN {
        return Err(FrameError::Truncated {
            needed: DIRECT_HEADER_LEN,
            available: bytes.len(),
        });
    }

    let message_type = read_i32(&bytes[..4]);
    let declared = read_u32(&bytes[4..8]) as usize;
    if declared > max_packet_allocation {
        return Err(FrameError::OversizedPacket {
            declared,
            max: max_packet_allocation,
        });
    }

    let body = &bytes[DIRECT_HEADER_LEN..];
    if body.len() < declared {
        return Err(FrameError::Truncated {
            needed: DIRECT_HEADER_LEN + declared,
            available: bytes.len(),
        });
    }

    Ok(Frame::new(message_type, body[..declared].to_vec()))
}

/// Split a relay message into its envelope type and body
pub fn decode_envelope(bytes: &[u8]) -> Result<(i32, &[u8]), FrameError> {
    if bytes.len() < RELAY_HEADER_LEN {
        return Err(FrameError::Truncated {
            needed: RELAY_HEADER_LEN,
            available: bytes.len(),
        });
    }
    Ok((read_i32(&bytes[..4]), &bytes[RELAY_HEADER_LEN..]))
}

/// Decode a proxied frame body: `type || payload`, length implied
pub fn decode_relay(body: &[u8], max_packet_allocation: usize) -> Result<Frame, FrameError> {
    if body.len() < RELAY_HEADER_LEN {
        return Err(FrameError::Truncated {
            needed: RELAY_HEADER_LEN,
            available: body.len(),
        });
    }

    let payload = &body[RELAY_HEADER_LEN..];
    if payload.len() > max_packet_allocation {
        return Err(FrameError::OversizedPacket {
            declared: payload.len(),
            max: max_packet_allocation,
        });
    }

    Ok(Frame::new(read_i32(&body[..4]), payload.to_vec()))
}

/// Write a direct frame without flushing
///
/// Fails with `InvalidInput` when the payload length does not fit the
/// 32-bit length field; nothing is written in that case.
pub fn write_frame<W: Write>(writer: &mut W, message_type: i32, payload: &[u8]) -> io::Result<()> {
    let length = u32::try_from(payload.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("payload of {} bytes exceeds the frame length field", payload.len()),
        )
    })?;
    writer.write_all(&message_type.to_be_bytes())?;
    writer.write_all(&length.to_be_bytes())?;
    writer.write_all(payload)
}

/// Fill `buf` completely, treating a zero-byte read as a closed stream
fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), FrameError> {
    let mut offset = 0;
    while offset < buf.len() {
        match reader.read(&mut buf[offset..]) {
            Ok(0) => return Err(FrameError::ConnectionClosed),
            Ok(count) => offset += count,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(FrameError::Io(e)),
        }
    }
    Ok(())
}

/// Read one direct frame from a blocking stream
///
/// The header is validated before the payload buffer is allocated; an
/// oversized declaration returns [`FrameError::OversizedPacket`] without
/// consuming any payload bytes.
pub fn read_frame<R: Read>(reader: &mut R, max_packet_allocation: usize) -> Result<Frame, FrameError> {
    let mut header = [0u8; DIRECT_HEADER_LEN];
    fill(reader, &mut header)?;

    let message_type = read_i32(&header[..4]);
    let declared = read_u32(&header[4..8]) as usize;
    if declared > max_packet_allocation {
        return Err(FrameError::OversizedPacket {
            declared,
            max: max_packet_allocation,
        });
    }

    let mut payload = vec![0u8; declared];
    fill(reader, &mut payload)?;

    Ok(Frame::new(message_type, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_direct_round_trip() {
        for payload in [Vec::new(), b"hello".to_vec(), vec![7u8; 4096]] {
            let bytes = encode_direct(42, &payload);
            let frame = decode_direct(&bytes, DEFAULT_MAX_PACKET_ALLOCATION).unwrap();
            assert_eq!(frame, Frame::new(42, payload));
        }
    }

    #[test]
    fn test_direct_header_layout() {
        let bytes = encode_direct(-2, &[0xAA, 0xBB]);
        assert_eq!(bytes, vec![0xFF, 0xFF, 0xFF, 0xFE, 0, 0, 0, 2, 0xAA, 0xBB]);
    }

    #[test]
    fn test_payload_at_ceiling_is_accepted() {
        let bytes = encode_direct(1, &[1, 2, 3, 4]);
        assert!(decode_direct(&bytes, 4).is_ok());
    }

    #[test]
    fn test_direct_truncated_header() {
        let err = decode_direct(&[0, 0, 0, 1, 0, 0], 1024).unwrap_err();
        assert!(matches!(err, FrameError::Truncated { needed: 8, available: 6 }));
    }

    #[test]
    fn test_direct_truncated_payload() {
        let mut bytes = encode_direct(1, b"abcdef");
        bytes.truncate(10);
        assert!(matches!(
            decode_direct(&bytes, 1024),
            Err(FrameError::Truncated { .. })
        ));
    }

    #[test]
    fn test_oversized_declaration_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1i32.to_be_bytes());
        bytes.extend_from_slice(&(1025u32).to_be_bytes());
        let err = decode_direct(&bytes, 1024).unwrap_err();
        assert!(matches!(
            err,
            FrameError::OversizedPacket { declared: 1025, max: 1024 }
        ));
    }

    #[test]
    fn test_read_frame_rejects_oversize_before_reading_payload() {
        // Header claims u32::MAX bytes; nothing follows
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&5i32.to_be_bytes());
        bytes.extend_from_slice(&u32::MAX.to_be_bytes());
        let mut cursor = Cursor::new(bytes);

        let err = read_frame(&mut cursor, DEFAULT_MAX_PACKET_ALLOCATION).unwrap_err();
        assert!(matches!(err, FrameError::OversizedPacket { .. }));
        assert_eq!(cursor.position(), DIRECT_HEADER_LEN as u64);
    }

    #[test]
    fn test_read_frame_partial_reads() {
        struct Trickle(Cursor<Vec<u8>>);
        impl Read for Trickle {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                let len = buf.len().min(3);
                self.0.read(&mut buf[..len])
            }
        }

        let mut stream = Trickle(Cursor::new(encode_direct(9, b"partial reads")));
        let frame = read_frame(&mut stream, 1024).unwrap();
        assert_eq!(frame, Frame::new(9, b"partial reads".to_vec()));
    }

    #[test]
    fn test_read_frame_eof_mid_payload() {
        let mut bytes = encode_direct(1, b"0123456789");
        bytes.truncate(12);
        let err = read_frame(&mut Cursor::new(bytes), 1024).unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn test_relay_round_trip() {
        let bytes = encode_relay(envelope::CLIENT_PROXY, 7, b"proxied");
        let (envelope_type, body) = decode_envelope(&bytes).unwrap();
        assert_eq!(envelope_type, envelope::CLIENT_PROXY);
        let frame = decode_relay(body, 1024).unwrap();
        assert_eq!(frame, Frame::new(7, b"proxied".to_vec()));
    }

    #[test]
    fn test_relay_truncated() {
        assert!(matches!(
            decode_envelope(&[0, 0, 0]),
            Err(FrameError::Truncated { needed: 4, available: 3 })
        ));
        assert!(matches!(
            decode_relay(&[0, 1], 1024),
            Err(FrameError::Truncated { .. })
        ));
    }

    #[test]
    fn test_relay_oversized() {
        let body = encode_envelope(3, &[0u8; 16]);
        assert!(matches!(
            decode_relay(&body, 8),
            Err(FrameError::OversizedPacket { declared: 16, max: 8 })
        ));
    }

    #[test]
    fn test_write_frame_matches_encode() {
        let mut out = Vec::new();
        write_frame(&mut out, 12, b"abc").unwrap();
        assert_eq!(out, encode_direct(12, b"abc"));
    }
}
