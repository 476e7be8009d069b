//! The fixed 6-byte frame header.
//!
//! ```text
//! offset  size  field
//!      0     1  sync byte 0xAA
//!      1     1  sync byte 0xAA
//!      2     1  command code
//!      3     3  payload length, u24 big-endian
//! ```

use crate::error::PairError;

/// Both leading bytes of every frame.
pub const SYNC_BYTE: u8 = 0xAA;

/// Encoded header size on the wire.
pub const HEADER_SIZE: usize = 6;

/// Largest payload the 24-bit length field can describe.
pub const MAX_PAYLOAD_SIZE: usize = 0xFF_FFFF;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Raw command code; validated separately so that an unknown code
    /// can still be skipped by length.
    pub command: u8,
    pub payload_length: usize,
}

impl FrameHeader {
    pub fn new(command: u8, payload_length: usize) -> Result<Self, PairError> {
        if payload_length > MAX_PAYLOAD_SIZE {
            return Err(PairError::PayloadTooLarge {
                size: payload_length,
                max: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(Self {
            command,
            payload_length,
        })
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let len = (self.payload_length as u32).to_be_bytes();
        [SYNC_BYTE, SYNC_BYTE, self.command, len[1], len[2], len[3]]
    }

    /// Parse the first [`HEADER_SIZE`] bytes of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self, PairError> {
        if bytes.len() < HEADER_SIZE {
            return Err(PairError::ProtocolFraming(format!(
                "buffer too short for header: {} < {HEADER_SIZE}",
                bytes.len()
            )));
        }
        if bytes[0] != SYNC_BYTE || bytes[1] != SYNC_BYTE {
            return Err(PairError::ProtocolFraming(format!(
                "bad sync bytes {:#04x} {:#04x}",
                bytes[0], bytes[1]
            )));
        }
        let payload_length = u32::from_be_bytes([0, bytes[3], bytes[4], bytes[5]]) as usize;
        Ok(Self {
            command: bytes[2],
            payload_length,
        })
    }

    /// Total frame length (header + declared payload).
    pub fn frame_length(&self) -> usize {
        HEADER_SIZE + self.payload_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_layout_is_big_endian() {
        let header = FrameHeader::new(6, 0x01_02_03).unwrap();
        assert_eq!(header.encode(), [0xAA, 0xAA, 6, 0x01, 0x02, 0x03]);
    }

    #[test]
    fn decode_reads_u24_length() {
        let header = FrameHeader::decode(&[0xAA, 0xAA, 7, 0xFF, 0xFF, 0xFF, 9, 9]).unwrap();
        assert_eq!(header.command, 7);
        assert_eq!(header.payload_length, MAX_PAYLOAD_SIZE);
        assert_eq!(header.frame_length(), MAX_PAYLOAD_SIZE + HEADER_SIZE);
    }

    #[test]
    fn rejects_oversized_payload() {
        assert!(matches!(
            FrameHeader::new(1, MAX_PAYLOAD_SIZE + 1),
            Err(PairError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn rejects_bad_sync() {
        assert!(FrameHeader::decode(&[0xAA, 0xAB, 1, 0, 0, 0]).is_err());
        assert!(FrameHeader::decode(&[0x00, 0xAA, 1, 0, 0, 0]).is_err());
    }

    #[test]
    fn rejects_short_buffer() {
        assert!(FrameHeader::decode(&[0xAA, 0xAA, 1, 0, 0]).is_err());
        assert!(FrameHeader::decode(&[]).is_err());
    }
}
