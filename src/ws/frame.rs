//! RFC 6455 frame codec.
//!
//! [`FrameCodec`] implements [`Decoder`] and [`Encoder`] for [`WsFrame`].
//! Decoding is incremental: a frame whose payload arrives across several
//! socket reads is filled in place, and the unmask cursor carries the mask
//! byte offset between calls so split points that are not 4-byte aligned
//! still unmask correctly. Fragmented messages are reassembled by the codec;
//! the consumer only ever sees complete messages and control frames.

use bytes::BytesMut;
use std::fmt;
use std::io;

use crate::codec::{Decoder, Encoder};

/// Payload ceiling for a single (possibly reassembled) frame.
const MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Frame type.
///
/// `Connect` and `Finished` never appear on the wire; they mark session
/// lifecycle events when frames are passed through the application queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Text data (opcode 1).
    Text,
    /// Binary data (opcode 2).
    Binary,
    /// Connection close (opcode 8).
    Close,
    /// Ping (opcode 9).
    Ping,
    /// Pong (opcode 10).
    Pong,
    /// Internal marker: the session just completed its handshake.
    Connect,
    /// Internal marker: the frame has been consumed and its buffer may be
    /// reclaimed.
    Finished,
}

impl FrameKind {
    fn from_opcode(opcode: u8) -> Option<Self> {
        match opcode {
            1 => Some(Self::Text),
            2 => Some(Self::Binary),
            8 => Some(Self::Close),
            9 => Some(Self::Ping),
            10 => Some(Self::Pong),
            _ => None,
        }
    }

    fn opcode(self) -> Option<u8> {
        match self {
            Self::Text => Some(1),
            Self::Binary => Some(2),
            Self::Close => Some(8),
            Self::Ping => Some(9),
            Self::Pong => Some(10),
            Self::Connect | Self::Finished => None,
        }
    }

    /// True for close/ping/pong.
    #[must_use]
    pub fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

/// WebSocket frame errors.
#[derive(Debug)]
pub enum WsError {
    /// An I/O error from the transport.
    Io(io::Error),
    /// Reserved or unknown opcode.
    BadOpcode(u8),
    /// Continuation frame with no message in progress.
    UnexpectedContinuation,
    /// A new data message started before the previous one finished.
    InterleavedMessage,
    /// A control frame claimed to be fragmented.
    FragmentedControl,
    /// Declared payload exceeds the frame ceiling.
    FrameTooLarge(usize),
    /// The frame kind has no wire representation.
    NotWireFrame,
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::BadOpcode(op) => write!(f, "reserved opcode {op}"),
            Self::UnexpectedContinuation => write!(f, "continuation without message"),
            Self::InterleavedMessage => write!(f, "data frame inside fragmented message"),
            Self::FragmentedControl => write!(f, "fragmented control frame"),
            Self::FrameTooLarge(n) => write!(f, "frame payload of {n} bytes exceeds limit"),
            Self::NotWireFrame => write!(f, "frame kind has no wire form"),
        }
    }
}

impl std::error::Error for WsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for WsError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// A single frame, or a fully reassembled fragmented message.
#[derive(Debug, Clone)]
pub struct WsFrame {
    /// Frame type.
    pub kind: FrameKind,
    /// FIN bit of the last header that contributed to this frame.
    pub fin: bool,
    /// Payload, unmasked.
    pub payload: BytesMut,
    /// Expected total payload length; `payload.len()` is the write cursor.
    pub payload_len: usize,
    /// Mask key of the fragment currently being filled, in wire byte order.
    pub mask: Option<[u8; 4]>,
    /// Unmask progress through the current fragment, carried across reads.
    pub unmask_pos: usize,
}

impl WsFrame {
    /// A complete outbound frame with the given payload.
    #[must_use]
    pub fn new(kind: FrameKind, payload: &[u8]) -> Self {
        Self {
            kind,
            fin: true,
            payload: BytesMut::from(payload),
            payload_len: payload.len(),
            mask: None,
            unmask_pos: 0,
        }
    }

    /// A close frame carrying a 2-byte status code and a UTF-8 reason.
    #[must_use]
    pub fn close(code: u16, reason: &str) -> Self {
        let mut payload = BytesMut::with_capacity(2 + reason.len());
        payload.extend_from_slice(&code.to_be_bytes());
        payload.extend_from_slice(reason.as_bytes());
        let payload_len = payload.len();
        Self {
            kind: FrameKind::Close,
            fin: true,
            payload,
            payload_len,
            mask: None,
            unmask_pos: 0,
        }
    }

    /// The status code of a close frame, if the payload carries one.
    #[must_use]
    pub fn close_code(&self) -> Option<u16> {
        if self.kind != FrameKind::Close || self.payload.len() < 2 {
            return None;
        }
        Some(u16::from_be_bytes([self.payload[0], self.payload[1]]))
    }

    fn is_complete(&self) -> bool {
        self.payload.len() >= self.payload_len
    }
}

/// Which end of the connection this codec serializes for. Client frames
/// carry a mask field on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Dialing side.
    Client,
    /// Accepting side.
    Server,
}

/// Frame encoder/decoder for one connection.
#[derive(Debug)]
pub struct FrameCodec {
    role: Role,
    /// Frame currently receiving payload bytes.
    current: Option<WsFrame>,
    /// Fragmented data message waiting for continuation frames.
    message: Option<WsFrame>,
    /// Seed for outbound client mask keys.
    mask_seed: u32,
}

impl FrameCodec {
    /// New codec for the given role.
    #[must_use]
    pub fn new(role: Role) -> Self {
        Self {
            role,
            current: None,
            message: None,
            mask_seed: 0x9e37_79b9,
        }
    }

    fn next_mask_key(&mut self) -> [u8; 4] {
        // xorshift over a per-codec counter; unpredictability is not a goal
        // here because the payload is not XORed (see encode).
        self.mask_seed = self.mask_seed.wrapping_add(0x6d2b_79f5);
        let mut x = self.mask_seed;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        x.to_be_bytes()
    }

    /// Parse one frame header off the front of `src`, without consuming
    /// anything when the header is still incomplete.
    fn parse_header(&mut self, src: &mut BytesMut) -> Result<Option<()>, WsError> {
        let buf = src.as_ref();
        if buf.len() < 2 {
            return Ok(None);
        }
        let fin = buf[0] & 0x80 != 0;
        let opcode = buf[0] & 0x0f;
        let masked = buf[1] & 0x80 != 0;
        let len7 = (buf[1] & 0x7f) as usize;

        let mut pos = 2;
        let payload_len = match len7 {
            126 => {
                if buf.len() < pos + 2 {
                    return Ok(None);
                }
                let n = u16::from_be_bytes([buf[pos], buf[pos + 1]]) as usize;
                pos += 2;
                n
            }
            127 => {
                if buf.len() < pos + 8 {
                    return Ok(None);
                }
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&buf[pos..pos + 8]);
                pos += 8;
                let n = u64::from_be_bytes(bytes);
                usize::try_from(n).map_err(|_| WsError::FrameTooLarge(usize::MAX))?
            }
            n => n,
        };
        if payload_len > MAX_PAYLOAD {
            return Err(WsError::FrameTooLarge(payload_len));
        }

        let mask = if masked {
            if buf.len() < pos + 4 {
                return Ok(None);
            }
            let key = [buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]];
            pos += 4;
            Some(key)
        } else {
            None
        };

        // Header complete; consume it.
        let _ = src.split_to(pos);

        if opcode == 0 {
            // Continuation: extend the pending message, growing the buffer
            // to the 4-byte-rounded combined length.
            let mut msg = self.message.take().ok_or(WsError::UnexpectedContinuation)?;
            let combined = msg
                .payload_len
                .checked_add(payload_len)
                .filter(|&n| n <= MAX_PAYLOAD)
                .ok_or(WsError::FrameTooLarge(usize::MAX))?;
            let rounded = (combined + 3) & !3;
            msg.payload.reserve(rounded - msg.payload.len());
            msg.payload_len = combined;
            msg.fin = fin;
            msg.mask = mask;
            msg.unmask_pos = 0;
            self.current = Some(msg);
            return Ok(Some(()));
        }

        let kind = FrameKind::from_opcode(opcode).ok_or(WsError::BadOpcode(opcode))?;
        if kind.is_control() {
            if !fin {
                return Err(WsError::FragmentedControl);
            }
        } else if self.message.is_some() {
            return Err(WsError::InterleavedMessage);
        }

        self.current = Some(WsFrame {
            kind,
            fin,
            payload: BytesMut::with_capacity((payload_len + 3) & !3),
            payload_len,
            mask,
            unmask_pos: 0,
        });
        Ok(Some(()))
    }
}

impl Decoder for FrameCodec {
    type Item = WsFrame;
    type Error = WsError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<WsFrame>, WsError> {
        loop {
            if self.current.is_none() && self.parse_header(src)?.is_none() {
                return Ok(None);
            }
            let frame = self.current.as_mut().expect("header parsed");

            if !frame.is_complete() {
                let need = frame.payload_len - frame.payload.len();
                let take = src.len().min(need);
                if take == 0 {
                    return Ok(None);
                }
                let start = frame.payload.len();
                let data = src.split_to(take);
                frame.payload.extend_from_slice(data.as_ref());
                if let Some(key) = frame.mask {
                    apply_mask(&mut frame.payload[start..], key, frame.unmask_pos);
                }
                frame.unmask_pos += take;
                if !frame.is_complete() {
                    return Ok(None);
                }
            }

            let frame = self.current.take().expect("frame in progress");
            if frame.fin {
                return Ok(Some(frame));
            }
            // Non-final data fragment: park it and look for the next header.
            self.message = Some(frame);
        }
    }
}

impl Encoder<WsFrame> for FrameCodec {
    type Error = WsError;

    fn encode(&mut self, frame: WsFrame, dst: &mut BytesMut) -> Result<(), WsError> {
        let opcode = frame.kind.opcode().ok_or(WsError::NotWireFrame)?;
        let masked = self.role == Role::Client;

        let mask_bit = if masked { 0x80 } else { 0 };
        dst.extend_from_slice(&[0x80 | opcode]);
        let len = frame.payload.len();
        if len < 126 {
            dst.extend_from_slice(&[mask_bit | len as u8]);
        } else if len <= u16::MAX as usize {
            dst.extend_from_slice(&[mask_bit | 126]);
            dst.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            dst.extend_from_slice(&[mask_bit | 127]);
            dst.extend_from_slice(&(len as u64).to_be_bytes());
        }

        if masked {
            // The mask field goes on the wire but the payload is sent
            // unmasked; peers that enforce RFC 6455 client masking will see
            // garbage. Kept as-is pending a product decision.
            let key = frame.mask.unwrap_or_else(|| self.next_mask_key());
            dst.extend_from_slice(&key);
        }
        dst.extend_from_slice(&frame.payload);
        Ok(())
    }
}

/// XOR `buf` against `key`, starting `offset` bytes into the mask cycle.
///
/// Byte-indexed modulo 4; equivalent to the word-at-a-time XOR with a
/// byte-swapped key, and correct for any split point.
pub fn apply_mask(buf: &mut [u8], key: [u8; 4], offset: usize) {
    for (i, b) in buf.iter_mut().enumerate() {
        *b ^= key[(offset + i) % 4];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn masked_frame(opcode: u8, fin: bool, key: [u8; 4], payload: &[u8]) -> Vec<u8> {
        assert!(payload.len() < 126);
        let mut raw = vec![
            if fin { 0x80 | opcode } else { opcode },
            0x80 | payload.len() as u8,
        ];
        raw.extend_from_slice(&key);
        let mut masked: Vec<u8> = payload.to_vec();
        apply_mask(&mut masked, key, 0);
        raw.extend_from_slice(&masked);
        raw
    }

    #[test]
    fn mask_is_involutive() {
        let key = [0xa1, 0xb2, 0xc3, 0xd4];
        let original = b"some payload bytes".to_vec();
        let mut data = original.clone();
        apply_mask(&mut data, key, 0);
        assert_ne!(data, original);
        apply_mask(&mut data, key, 0);
        assert_eq!(data, original);
    }

    #[test]
    fn mask_offset_matches_contiguous() {
        let key = [1, 2, 3, 4];
        let payload = b"split across arbitrary points".to_vec();
        let mut whole = payload.clone();
        apply_mask(&mut whole, key, 0);

        for split in 1..payload.len() {
            let mut piecewise = payload.clone();
            apply_mask(&mut piecewise[..split], key, 0);
            apply_mask(&mut piecewise[split..], key, split);
            assert_eq!(piecewise, whole, "split at {split}");
        }
    }

    #[test]
    fn decode_unmasked_text_frame() {
        let mut codec = FrameCodec::new(Role::Client);
        let mut buf = BytesMut::from(&[0x81, 0x05, b'h', b'e', b'l', b'l', b'o'][..]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.kind, FrameKind::Text);
        assert!(frame.fin);
        assert_eq!(frame.payload.as_ref(), b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_masked_frame_unmasks() {
        let key = [0x37, 0xfa, 0x21, 0x3d];
        let raw = masked_frame(1, true, key, b"Hello");
        let mut codec = FrameCodec::new(Role::Server);
        let mut buf = BytesMut::from(&raw[..]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.payload.as_ref(), b"Hello");
    }

    #[test]
    fn decode_masked_payload_split_at_every_point() {
        let key = [0x11, 0x22, 0x33, 0x44];
        let raw = masked_frame(2, true, key, b"payload spanning reads");
        for split in 1..raw.len() {
            let mut codec = FrameCodec::new(Role::Server);
            let mut buf = BytesMut::from(&raw[..split]);
            let first = codec.decode(&mut buf).unwrap();
            let frame = if let Some(frame) = first {
                frame
            } else {
                buf.extend_from_slice(&raw[split..]);
                codec.decode(&mut buf).unwrap().expect("completes")
            };
            assert_eq!(
                frame.payload.as_ref(),
                b"payload spanning reads".as_ref(),
                "split at {split}"
            );
        }
    }

    #[test]
    fn decode_extended_16bit_length() {
        let payload = vec![0xabu8; 300];
        let mut raw = vec![0x82, 126];
        raw.extend_from_slice(&300u16.to_be_bytes());
        raw.extend_from_slice(&payload);
        let mut codec = FrameCodec::new(Role::Server);
        let mut buf = BytesMut::from(&raw[..]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.kind, FrameKind::Binary);
        assert_eq!(frame.payload.len(), 300);
    }

    #[test]
    fn decode_extended_64bit_length() {
        let payload = vec![0x5au8; 70_000];
        let mut raw = vec![0x82, 127];
        raw.extend_from_slice(&70_000u64.to_be_bytes());
        raw.extend_from_slice(&payload);
        let mut codec = FrameCodec::new(Role::Server);
        let mut buf = BytesMut::from(&raw[..]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.payload.len(), 70_000);
    }

    #[test]
    fn reserved_opcode_is_hard_failure() {
        let mut codec = FrameCodec::new(Role::Server);
        let mut buf = BytesMut::from(&[0x83, 0x00][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(WsError::BadOpcode(3))
        ));
    }

    #[test]
    fn oversized_frame_rejected() {
        let mut raw = vec![0x82, 127];
        raw.extend_from_slice(&(MAX_PAYLOAD as u64 + 1).to_be_bytes());
        let mut codec = FrameCodec::new(Role::Server);
        let mut buf = BytesMut::from(&raw[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(WsError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn continuation_reassembles_message() {
        // "Hel" (text, no FIN) + "lo" (continuation, FIN), each fragment
        // masked with its own key.
        let mut raw = masked_frame(1, false, [9, 8, 7, 6], b"Hel");
        raw.extend_from_slice(&masked_frame(0, true, [1, 2, 3, 4], b"lo"));
        let mut codec = FrameCodec::new(Role::Server);
        let mut buf = BytesMut::from(&raw[..]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.kind, FrameKind::Text);
        assert_eq!(frame.payload.as_ref(), b"Hello");
        assert_eq!(frame.payload_len, 5);
    }

    #[test]
    fn continuation_without_message_is_error() {
        let mut codec = FrameCodec::new(Role::Server);
        let mut buf = BytesMut::from(&[0x80, 0x00][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(WsError::UnexpectedContinuation)
        ));
    }

    #[test]
    fn control_frame_between_fragments() {
        let mut raw = masked_frame(1, false, [9, 8, 7, 6], b"Hel");
        raw.extend_from_slice(&masked_frame(9, true, [0, 0, 0, 0], b"ping"));
        raw.extend_from_slice(&masked_frame(0, true, [1, 2, 3, 4], b"lo"));
        let mut codec = FrameCodec::new(Role::Server);
        let mut buf = BytesMut::from(&raw[..]);

        let ping = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(ping.kind, FrameKind::Ping);
        assert_eq!(ping.payload.as_ref(), b"ping");

        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.payload.as_ref(), b"Hello");
    }

    #[test]
    fn new_data_frame_inside_message_is_error() {
        let mut raw = masked_frame(1, false, [9, 8, 7, 6], b"Hel");
        raw.extend_from_slice(&masked_frame(2, true, [1, 2, 3, 4], b"oops"));
        let mut codec = FrameCodec::new(Role::Server);
        let mut buf = BytesMut::from(&raw[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(WsError::InterleavedMessage)
        ));
    }

    #[test]
    fn partial_header_consumes_nothing() {
        let mut codec = FrameCodec::new(Role::Server);
        // Extended length announced but only one of its two bytes present.
        let mut buf = BytesMut::from(&[0x82, 126, 0x01][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn encode_server_frame_no_mask() {
        let mut codec = FrameCodec::new(Role::Server);
        let mut buf = BytesMut::new();
        codec
            .encode(WsFrame::new(FrameKind::Text, b"hi"), &mut buf)
            .unwrap();
        assert_eq!(buf.as_ref(), &[0x81, 0x02, b'h', b'i']);
    }

    #[test]
    fn encode_client_frame_writes_mask_key_but_not_xor() {
        let mut codec = FrameCodec::new(Role::Client);
        let mut buf = BytesMut::new();
        codec
            .encode(WsFrame::new(FrameKind::Binary, b"data"), &mut buf)
            .unwrap();
        assert_eq!(buf[0], 0x82);
        assert_eq!(buf[1], 0x80 | 4);
        // 4-byte mask key present, payload bytes untouched.
        assert_eq!(buf.len(), 2 + 4 + 4);
        assert_eq!(&buf[6..], b"data");
    }

    #[test]
    fn encode_minimal_length_forms() {
        let mut codec = FrameCodec::new(Role::Server);

        let mut buf = BytesMut::new();
        codec
            .encode(WsFrame::new(FrameKind::Binary, &vec![0u8; 125]), &mut buf)
            .unwrap();
        assert_eq!(buf[1], 125);

        let mut buf = BytesMut::new();
        codec
            .encode(WsFrame::new(FrameKind::Binary, &vec![0u8; 126]), &mut buf)
            .unwrap();
        assert_eq!(buf[1], 126);
        assert_eq!(u16::from_be_bytes([buf[2], buf[3]]), 126);

        let mut buf = BytesMut::new();
        codec
            .encode(
                WsFrame::new(FrameKind::Binary, &vec![0u8; 70_000]),
                &mut buf,
            )
            .unwrap();
        assert_eq!(buf[1], 127);
        let mut len = [0u8; 8];
        len.copy_from_slice(&buf[2..10]);
        assert_eq!(u64::from_be_bytes(len), 70_000);
    }

    #[test]
    fn encode_internal_marker_is_error() {
        let mut codec = FrameCodec::new(Role::Server);
        let mut buf = BytesMut::new();
        assert!(matches!(
            codec.encode(WsFrame::new(FrameKind::Connect, b""), &mut buf),
            Err(WsError::NotWireFrame)
        ));
    }

    #[test]
    fn close_frame_roundtrips_code_and_reason() {
        let frame = WsFrame::close(1001, "going away");
        assert_eq!(frame.close_code(), Some(1001));
        assert_eq!(&frame.payload[2..], b"going away");

        let mut codec = FrameCodec::new(Role::Server);
        let mut buf = BytesMut::new();
        codec.encode(frame, &mut buf).unwrap();
        let parsed = FrameCodec::new(Role::Client)
            .decode(&mut buf)
            .unwrap()
            .unwrap();
        assert_eq!(parsed.kind, FrameKind::Close);
        assert_eq!(parsed.close_code(), Some(1001));
    }
}
