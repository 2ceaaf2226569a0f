//! Minimal WebSocket (RFC 6455) frame codec
//!
//! Covers exactly what the gateway needs: the handshake accept key, single
//! final text frames in all three length classes, and payload masking.
//! No fragmentation, no extensions, no compression. Pure functions only; the
//! buffered socket reader lives in the gateway.
//!
//! Frame layout:
//! ```text
//! [FIN|RSV|OPCODE][MASK|LEN7][LEN16 | LEN64]?[MASK KEY x4]?[PAYLOAD]
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha1::{Digest, Sha1};
use thiserror::Error;

/// Fixed GUID appended to the client key during the handshake
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Default bound on a decoded payload
pub const DEFAULT_MAX_PAYLOAD: usize = 1024 * 1024;

const FIN_BIT: u8 = 0x80;
const RSV_BITS: u8 = 0x70;
const OPCODE_BITS: u8 = 0x0F;
const MASK_BIT: u8 = 0x80;
const LEN_BITS: u8 = 0x7F;
const LEN_16: u8 = 126;
const LEN_64: u8 = 127;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    fn from_bits(bits: u8) -> Result<Self, FrameError> {
        match bits {
            0x0 => Ok(Opcode::Continuation),
            0x1 => Ok(Opcode::Text),
            0x2 => Ok(Opcode::Binary),
            0x8 => Ok(Opcode::Close),
            0x9 => Ok(Opcode::Ping),
            0xA => Ok(Opcode::Pong),
            other => Err(FrameError::UnknownOpcode(other)),
        }
    }

    fn bits(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("incomplete frame: need {needed} bytes, have {available}")]
    Incomplete { needed: usize, available: usize },

    #[error("payload of {len} bytes exceeds limit of {limit}")]
    PayloadTooLarge { len: u64, limit: usize },

    #[error("reserved bits set")]
    ReservedBits,

    #[error("unknown opcode {0:#x}")]
    UnknownOpcode(u8),

    #[error("fragmented messages are not supported")]
    Fragmented,

    #[error("expected a text frame, got {0:?}")]
    NotText(Opcode),

    #[error("text payload is not valid UTF-8")]
    InvalidUtf8,
}

/// One decoded frame, payload already unmasked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

/// `Sec-WebSocket-Accept` value for a client's `Sec-WebSocket-Key`
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.trim().as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Encode one final, unmasked text frame (server to browser)
pub fn encode_text_frame(message: &str) -> Vec<u8> {
    encode_frame(Opcode::Text, message.as_bytes(), None)
}

/// Encode one final frame. Browsers always send with `mask` set.
pub fn encode_frame(opcode: Opcode, payload: &[u8], mask: Option<[u8; 4]>) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 14);
    out.push(FIN_BIT | opcode.bits());

    let mask_bit = if mask.is_some() { MASK_BIT } else { 0 };
    let len = payload.len();
    if len < LEN_16 as usize {
        out.push(mask_bit | len as u8);
    } else if len <= u16::MAX as usize {
        out.push(mask_bit | LEN_16);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(mask_bit | LEN_64);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }

    match mask {
        Some(key) => {
            out.extend_from_slice(&key);
            let start = out.len();
            out.extend_from_slice(payload);
            apply_mask(&mut out[start..], key);
        }
        None => out.extend_from_slice(payload),
    }
    out
}

/// XOR `payload` with `key` repeated cyclically. Masking and unmasking are
/// the same operation.
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

fn require(buf: &[u8], needed: usize) -> Result<(), FrameError> {
    if buf.len() < needed {
        return Err(FrameError::Incomplete {
            needed,
            available: buf.len(),
        });
    }
    Ok(())
}

/// Frame decoder with a payload bound
#[derive(Debug, Clone, Copy)]
pub struct FrameDecoder {
    max_payload: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD)
    }
}

impl FrameDecoder {
    pub fn new(max_payload: usize) -> Self {
        Self { max_payload }
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Decode the frame at the start of `buf`.
    /// Returns the frame and the number of bytes it occupied.
    pub fn decode(&self, buf: &[u8]) -> Result<(Frame, usize), FrameError> {
        require(buf, 2)?;
        let (b0, b1) = (buf[0], buf[1]);

        if b0 & RSV_BITS != 0 {
            return Err(FrameError::ReservedBits);
        }
        let opcode = Opcode::from_bits(b0 & OPCODE_BITS)?;
        let fin = b0 & FIN_BIT != 0;
        let masked = b1 & MASK_BIT != 0;

        let mut offset = 2;
        let len = match b1 & LEN_BITS {
            LEN_16 => {
                require(buf, 4)?;
                offset = 4;
                u16::from_be_bytes([buf[2], buf[3]]) as u64
            }
            LEN_64 => {
                require(buf, 10)?;
                offset = 10;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&buf[2..10]);
                u64::from_be_bytes(raw)
            }
            short => short as u64,
        };
        if len > self.max_payload as u64 {
            return Err(FrameError::PayloadTooLarge {
                len,
                limit: self.max_payload,
            });
        }
        let len = len as usize;

        let mask = if masked {
            require(buf, offset + 4)?;
            let key = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
            offset += 4;
            Some(key)
        } else {
            None
        };

        let end = offset + len;
        require(buf, end)?;

        if !fin || opcode == Opcode::Continuation {
            return Err(FrameError::Fragmented);
        }

        let mut payload = buf[offset..end].to_vec();
        if let Some(key) = mask {
            apply_mask(&mut payload, key);
        }
        Ok((Frame { opcode, payload }, end))
    }
}

/// Decode one text frame from `buf`, returning the message and the bytes used
pub fn decode_text_frame(buf: &[u8]) -> Result<(String, usize), FrameError> {
    let (frame, consumed) = FrameDecoder::default().decode(buf)?;
    Ok((frame_text(frame)?, consumed))
}

/// Extract the UTF-8 text of a text frame
pub fn frame_text(frame: Frame) -> Result<String, FrameError> {
    if frame.opcode != Opcode::Text {
        return Err(FrameError::NotText(frame.opcode));
    }
    String::from_utf8(frame.payload).map_err(|_| FrameError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASK: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

    #[test]
    fn test_accept_key_rfc_vector() {
        assert_eq!(
            compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_encode_unmasked_hello() {
        assert_eq!(
            encode_text_frame("Hello"),
            vec![0x81, 0x05, 0x48, 0x65, 0x6c, 0x6c, 0x6f]
        );
    }

    #[test]
    fn test_decode_rfc_masked_hello() {
        let bytes = [
            0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58,
        ];
        let (text, consumed) = decode_text_frame(&bytes).unwrap();
        assert_eq!(text, "Hello");
        assert_eq!(consumed, bytes.len());
        assert_eq!(encode_frame(Opcode::Text, b"Hello", Some(MASK)), bytes);
    }

    #[test]
    fn test_length_classes() {
        let header = |n: usize| encode_text_frame(&"a".repeat(n))[..2].to_vec();
        assert_eq!(header(125), vec![0x81, 125]);
        assert_eq!(header(126), vec![0x81, 126]);
        assert_eq!(header(65535), vec![0x81, 126]);
        assert_eq!(header(65536), vec![0x81, 127]);

        let frame = encode_text_frame(&"a".repeat(65536));
        assert_eq!(&frame[2..10], &65536u64.to_be_bytes());
        assert_eq!(frame.len(), 10 + 65536);
    }

    #[test]
    fn test_multibyte_text_roundtrip() {
        let message = "résumé ✓ 文档";
        let bytes = encode_frame(Opcode::Text, message.as_bytes(), Some(MASK));
        let (decoded, _) = decode_text_frame(&bytes).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_exact_byte_lengths_roundtrip() {
        for len in [0usize, 1, 125, 126, 65535, 65536] {
            let message = "z".repeat(len);
            let bytes = encode_frame(Opcode::Text, message.as_bytes(), Some(MASK));
            let (decoded, _) = decode_text_frame(&bytes).unwrap();
            assert_eq!(decoded.len(), len);
            assert_eq!(decoded, message);
        }
    }

    #[test]
    fn test_truncated_frame_is_incomplete() {
        let bytes = encode_frame(Opcode::Text, "some command".as_bytes(), Some(MASK));
        for cut in 0..bytes.len() {
            match decode_text_frame(&bytes[..cut]) {
                Err(FrameError::Incomplete { needed, available }) => {
                    assert_eq!(available, cut);
                    assert!(needed > cut);
                }
                other => panic!("prefix of {} bytes decoded as {:?}", cut, other),
            }
        }
    }

    #[test]
    fn test_declared_length_beyond_buffer() {
        // claims 200 bytes, carries 3
        let bytes = [0x81, 126, 0x00, 0xC8, b'a', b'b', b'c'];
        assert_eq!(
            decode_text_frame(&bytes),
            Err(FrameError::Incomplete {
                needed: 204,
                available: 7
            })
        );
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let mut bytes = vec![0x81, 0x80 | 127];
        bytes.extend_from_slice(&(1u64 << 40).to_be_bytes());
        assert!(matches!(
            decode_text_frame(&bytes),
            Err(FrameError::PayloadTooLarge { .. })
        ));

        let small = FrameDecoder::new(4);
        let frame = encode_frame(Opcode::Text, b"hello", Some(MASK));
        assert_eq!(
            small.decode(&frame),
            Err(FrameError::PayloadTooLarge { len: 5, limit: 4 })
        );
    }

    #[test]
    fn test_fragmented_rejected() {
        let mut bytes = encode_frame(Opcode::Text, b"part", Some(MASK));
        bytes[0] &= !FIN_BIT;
        assert_eq!(decode_text_frame(&bytes), Err(FrameError::Fragmented));
    }

    #[test]
    fn test_control_frames() {
        let close = encode_frame(Opcode::Close, &[0x03, 0xE8], Some(MASK));
        let (frame, _) = FrameDecoder::default().decode(&close).unwrap();
        assert_eq!(frame.opcode, Opcode::Close);
        assert_eq!(frame.payload, vec![0x03, 0xE8]);
        assert_eq!(
            decode_text_frame(&close),
            Err(FrameError::NotText(Opcode::Close))
        );
    }

    #[test]
    fn test_invalid_utf8() {
        let bytes = encode_frame(Opcode::Text, &[0xff, 0xfe], Some(MASK));
        assert_eq!(decode_text_frame(&bytes), Err(FrameError::InvalidUtf8));
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut bytes = encode_frame(Opcode::Text, b"LIST", Some(MASK));
        let first_len = bytes.len();
        bytes.extend(encode_frame(Opcode::Text, b"VIEW a.txt", Some(MASK)));

        let (first, used) = decode_text_frame(&bytes).unwrap();
        assert_eq!(first, "LIST");
        assert_eq!(used, first_len);
        let (second, _) = decode_text_frame(&bytes[used..]).unwrap();
        assert_eq!(second, "VIEW a.txt");
    }
}
