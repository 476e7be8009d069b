//! Message framing.
//!
//! [`encode`] and [`decode`] work on whole transport payloads, which is
//! what a message-oriented transport hands us. [`FrameCodec`] adapts the
//! same framing to byte streams through `tokio_util`, using the header's
//! length field to reassemble frames.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::error::PairError;
use crate::header::{FrameHeader, HEADER_SIZE, SYNC_BYTE};
use crate::message::{Command, Message};

/// Frame `payload` behind a header for `command`.
pub fn encode(command: Command, payload: &[u8]) -> Result<Bytes, PairError> {
    let header = FrameHeader::new(command as u8, payload.len())?;
    let mut buf = BytesMut::with_capacity(header.frame_length());
    buf.put_slice(&header.encode());
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Decode one whole transport payload.
///
/// A trailing length that disagrees with the header is tolerated: the
/// message is returned with the bytes actually present.
pub fn decode(bytes: &[u8]) -> Result<Message, PairError> {
    let header = FrameHeader::decode(bytes)?;
    let command = Command::try_from(header.command)
        .map_err(|e| PairError::ProtocolFraming(e.to_string()))?;

    let present = bytes.len() - HEADER_SIZE;
    if present != header.payload_length {
        warn!(
            %command,
            declared = header.payload_length,
            present,
            "payload length mismatch; using bytes present"
        );
    }
    Ok(Message::new(
        command,
        Bytes::copy_from_slice(&bytes[HEADER_SIZE..]),
    ))
}

// ── FrameCodec ───────────────────────────────────────────────────

/// Stream codec for transports that deliver arbitrary byte chunks.
///
/// Decoding yields one complete raw frame (header included) per
/// message, ready for [`decode`]. Encoding writes already-framed bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = PairError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, PairError> {
        loop {
            if src.len() < 2 {
                return Ok(None);
            }
            if src[0] != SYNC_BYTE || src[1] != SYNC_BYTE {
                // Lost framing: slide forward until a sync pair lines up.
                let skip = src[1..]
                    .windows(2)
                    .position(|w| w == [SYNC_BYTE, SYNC_BYTE])
                    .map(|p| p + 1)
                    .unwrap_or(src.len() - 1);
                warn!(skipped = skip, "discarding bytes before next sync pair");
                src.advance(skip);
                continue;
            }
            if src.len() < HEADER_SIZE {
                return Ok(None);
            }

            let header = FrameHeader::decode(&src[..HEADER_SIZE])?;
            if src.len() < header.frame_length() {
                src.reserve(header.frame_length() - src.len());
                return Ok(None);
            }
            return Ok(Some(src.split_to(header.frame_length()).freeze()));
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = PairError;

    fn encode(&mut self, frame: Bytes, dst: &mut BytesMut) -> Result<(), PairError> {
        FrameHeader::decode(&frame)?;
        dst.extend_from_slice(&frame);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_every_command() {
        let payload = b"frame-bytes";
        for code in 1u8..=9 {
            let cmd = Command::try_from(code).unwrap();
            let wire = encode(cmd, payload).unwrap();
            assert_eq!(wire.len(), HEADER_SIZE + payload.len());
            let msg = decode(&wire).unwrap();
            assert_eq!(msg, Message::new(cmd, &payload[..]));
        }
    }

    #[test]
    fn roundtrip_empty_payload() {
        let wire = encode(Command::Hello, &[]).unwrap();
        assert_eq!(&wire[..], &[0xAA, 0xAA, 1, 0, 0, 0]);
        assert_eq!(decode(&wire).unwrap(), Message::bare(Command::Hello));
    }

    #[test]
    fn rejects_short_and_unsynced_buffers() {
        for bad in [
            &[][..],
            &[0xAA][..],
            &[0xAA, 0xAA, 1, 0, 0][..],
            &[0xAB, 0xAA, 1, 0, 0, 0][..],
            &[0xAA, 0x00, 1, 0, 0, 0][..],
        ] {
            assert!(matches!(decode(bad), Err(PairError::ProtocolFraming(_))));
        }
    }

    #[test]
    fn rejects_unknown_command() {
        assert!(matches!(
            decode(&[0xAA, 0xAA, 0x42, 0, 0, 0]),
            Err(PairError::ProtocolFraming(_))
        ));
    }

    #[test]
    fn tolerates_length_mismatch() {
        // Declares 4 bytes, carries 2.
        let msg = decode(&[0xAA, 0xAA, 3, 0, 0, 4, 7, 8]).unwrap();
        assert_eq!(msg.command, Command::PreviewFrame);
        assert_eq!(&msg.payload[..], &[7, 8]);

        // Declares 1 byte, carries 3.
        let msg = decode(&[0xAA, 0xAA, 3, 0, 0, 1, 7, 8, 9]).unwrap();
        assert_eq!(&msg.payload[..], &[7, 8, 9]);
    }

    #[test]
    fn stream_codec_reassembles_split_frames() {
        let mut codec = FrameCodec;
        let wire = encode(Command::ClockReading, &42i64.to_be_bytes()).unwrap();
        let mut buf = BytesMut::new();

        buf.extend_from_slice(&wire[..4]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&wire[4..10]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&wire[10..]);

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame, wire);
        assert_eq!(decode(&frame).unwrap().ticks().unwrap(), 42);
        assert!(buf.is_empty());
    }

    #[test]
    fn stream_codec_resynchronises_after_garbage() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0x01, 0xAA, 0x02]);
        buf.extend_from_slice(&encode(Command::Hello, &[]).unwrap());
        buf.extend_from_slice(&encode(Command::Sync, &5i64.to_be_bytes()).unwrap());

        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decode(&first).unwrap().command, Command::Hello);
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decode(&second).unwrap().ticks().unwrap(), 5);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn stream_codec_encoder_rejects_unframed_bytes() {
        let mut codec = FrameCodec;
        let mut dst = BytesMut::new();
        let frame = encode(Command::PreviewFrame, &[1, 2, 3]).unwrap();
        codec.encode(frame.clone(), &mut dst).unwrap();
        assert_eq!(&dst[..], &frame[..]);

        assert!(codec.encode(Bytes::from_static(b"raw"), &mut dst).is_err());
    }
}
