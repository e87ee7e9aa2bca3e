//! MTU frame codec.
//!
//! A message larger than one write is split into a *package* of frames.
//! Every frame carries a 4-byte header:
//!
//! ```text
//! ┌──────────────┬──────────┬──────────────┬─────────────────────┐
//! │ Type | Flags │ Sequence │ Length (2B)  │ Payload             │
//! │ hi 4 | lo 4  │ u8, wraps│ LE u16       │ (frame_size bytes)  │
//! └──────────────┴──────────┴──────────────┴─────────────────────┘
//! ```
//!
//! Package boundaries: one `Single` frame, or `Sop`, zero or more `Frag`,
//! then `Eop`.  The `Sop` length field carries the *total* message length;
//! every other frame carries its own payload length.
//!
//! Frames arrive in order (one notify characteristic), so the assembler
//! only appends; it never reorders or fills gaps.

extern crate alloc;
use alloc::vec::Vec;

use crate::error::FrameError;

// ── Constants ────────────────────────────────────────────────

/// Frame header size: type byte, sequence byte, 16-bit length.
pub const HEADER_SIZE: usize = 4;

/// MTU assumed until the SORC answers the MTU request.
pub const DEFAULT_MTU: usize = 20;

/// Payload bytes per frame for a given MTU.
pub const fn frame_size_for_mtu(mtu: usize) -> usize {
    mtu.saturating_sub(HEADER_SIZE)
}

// ── Frame type ───────────────────────────────────────────────

/// High nibble of the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Frag = 0x0,
    Sop = 0x1,
    Eop = 0x2,
    Single = 0x3,
    NoAck = 0x7,
    Ack = 0xB,
}

impl FrameType {
    pub fn from_nibble(nibble: u8) -> Option<Self> {
        match nibble {
            0x0 => Some(Self::Frag),
            0x1 => Some(Self::Sop),
            0x2 => Some(Self::Eop),
            0x3 => Some(Self::Single),
            0x7 => Some(Self::NoAck),
            0xB => Some(Self::Ack),
            _ => None,
        }
    }

    /// Whether a frame of this type closes a package.
    pub fn ends_package(self) -> bool {
        matches!(self, Self::Single | Self::Eop)
    }
}

// ── Frame ────────────────────────────────────────────────────

/// One frame as it travels over a single characteristic write or notify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    pub frame_type: FrameType,
    /// Low nibble of the type byte; always zero on frames we build.
    pub flags: u8,
    pub sequence: u8,
    pub length: u16,
    pub payload: Vec<u8>,
}

impl DataFrame {
    /// Serialise header and payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        out.push(((self.frame_type as u8) << 4) | (self.flags & 0x0F));
        out.push(self.sequence);
        out.extend_from_slice(&self.length.to_le_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parse a received frame.
    pub fn parse(raw: &[u8]) -> Result<Self, FrameError> {
        if raw.len() < HEADER_SIZE {
            return Err(FrameError::Truncated);
        }
        let frame_type = FrameType::from_nibble(raw[0] >> 4).ok_or(FrameError::UnknownType)?;
        Ok(Self {
            frame_type,
            flags: raw[0] & 0x0F,
            sequence: raw[1],
            length: u16::from_le_bytes([raw[2], raw[3]]),
            payload: raw[HEADER_SIZE..].to_vec(),
        })
    }
}

// ── Outbound package ─────────────────────────────────────────

/// A message split into frames, plus a cursor over the frame being sent.
///
/// The cursor only advances once the radio confirms the previous write.
#[derive(Debug, Clone)]
pub struct FramePackage {
    message: Vec<u8>,
    frames: Vec<DataFrame>,
    current_index: usize,
}

impl FramePackage {
    /// Split `message` into frames of at most `frame_size` payload bytes.
    ///
    /// An empty message still produces one (empty) `Single` frame.
    pub fn new(message: &[u8], frame_size: usize) -> Result<Self, FrameError> {
        if frame_size == 0 {
            return Err(FrameError::EmptyFrameSize);
        }
        let total = u16::try_from(message.len()).map_err(|_| FrameError::MessageTooLarge)?;

        let count = message.len().div_ceil(frame_size).max(1);
        let mut frames = Vec::with_capacity(count);

        if count == 1 {
            frames.push(DataFrame {
                frame_type: FrameType::Single,
                flags: 0,
                sequence: 0,
                length: total,
                payload: message.to_vec(),
            });
        } else {
            for (i, chunk) in message.chunks(frame_size).enumerate() {
                let (frame_type, length) = match i {
                    0 => (FrameType::Sop, total),
                    n if n == count - 1 => (FrameType::Eop, chunk.len() as u16),
                    _ => (FrameType::Frag, chunk.len() as u16),
                };
                frames.push(DataFrame {
                    frame_type,
                    flags: 0,
                    sequence: i as u8,
                    length,
                    payload: chunk.to_vec(),
                });
            }
        }

        Ok(Self {
            message: message.to_vec(),
            frames,
            current_index: 0,
        })
    }

    /// The frame waiting to be written, or `None` once all are confirmed.
    pub fn current_frame(&self) -> Option<&DataFrame> {
        self.frames.get(self.current_index)
    }

    /// Mark the current frame as written.
    pub fn advance(&mut self) {
        self.current_index += 1;
    }

    pub fn frames(&self) -> &[DataFrame] {
        &self.frames
    }

    pub fn into_message(self) -> Vec<u8> {
        self.message
    }
}

// ── Inbound assembly ─────────────────────────────────────────

/// Accumulates frame payloads until a package-closing frame arrives.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: Vec<u8>,
    frames: usize,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame; yields the full message when the package closes.
    pub fn push(&mut self, frame: DataFrame) -> Option<Vec<u8>> {
        self.buffer.extend_from_slice(&frame.payload);
        self.frames += 1;

        if frame.frame_type.ends_package() {
            self.frames = 0;
            return Some(core::mem::take(&mut self.buffer));
        }
        None
    }

    /// A package has started but not finished.
    pub fn is_active(&self) -> bool {
        self.frames > 0
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.frames = 0;
    }
}

/// Reassemble a complete list of frames, as the receiver would.
pub fn reassemble(frames: &[DataFrame]) -> Option<Vec<u8>> {
    let mut assembler = FrameAssembler::new();
    frames
        .iter()
        .cloned()
        .find_map(|frame| assembler.push(frame))
}

// ── Tests ────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_message_is_single_frame() {
        let pkg = FramePackage::new(b"hello", 16).unwrap();
        assert_eq!(pkg.frames().len(), 1);

        let frame = &pkg.frames()[0];
        assert_eq!(frame.frame_type, FrameType::Single);
        assert_eq!(frame.length, 5);
        assert_eq!(frame.to_bytes(), [0x30, 0x00, 0x05, 0x00, b'h', b'e', b'l', b'l', b'o']);
    }

    #[test]
    fn empty_message_still_sends_one_frame() {
        let pkg = FramePackage::new(&[], 16).unwrap();
        assert_eq!(pkg.frames().len(), 1);
        assert_eq!(pkg.frames()[0].to_bytes(), [0x30, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn long_message_uses_sop_frag_eop() {
        let data: Vec<u8> = (0..40).collect();
        let pkg = FramePackage::new(&data, 16).unwrap();
        let types: Vec<_> = pkg.frames().iter().map(|f| f.frame_type).collect();
        assert_eq!(types, [FrameType::Sop, FrameType::Frag, FrameType::Eop]);

        // Sop carries the total length, the others their own.
        assert_eq!(pkg.frames()[0].length, 40);
        assert_eq!(pkg.frames()[1].length, 16);
        assert_eq!(pkg.frames()[2].length, 8);
        assert_eq!(pkg.frames()[2].sequence, 2);
    }

    #[test]
    fn exact_multiple_has_no_empty_tail() {
        let data = [0xAA; 32];
        let pkg = FramePackage::new(&data, 16).unwrap();
        assert_eq!(pkg.frames().len(), 2);
        assert_eq!(pkg.frames()[1].frame_type, FrameType::Eop);
        assert_eq!(pkg.frames()[1].payload.len(), 16);
    }

    #[test]
    fn cursor_walks_frames_then_finishes() {
        let mut pkg = FramePackage::new(&[1; 20], 16).unwrap();
        assert_eq!(pkg.current_frame().unwrap().frame_type, FrameType::Sop);
        pkg.advance();
        assert_eq!(pkg.current_frame().unwrap().frame_type, FrameType::Eop);
        pkg.advance();
        assert!(pkg.current_frame().is_none());
    }

    #[test]
    fn rejects_zero_frame_size_and_oversized_messages() {
        assert_eq!(FramePackage::new(b"x", 0).unwrap_err(), FrameError::EmptyFrameSize);
        let big = vec![0; usize::from(u16::MAX) + 1];
        assert_eq!(FramePackage::new(&big, 16).unwrap_err(), FrameError::MessageTooLarge);
    }

    #[test]
    fn parse_reads_header_fields() {
        let frame = DataFrame::parse(&[0x12, 0x07, 0x2A, 0x01, 9, 9]).unwrap();
        assert_eq!(frame.frame_type, FrameType::Sop);
        assert_eq!(frame.flags, 0x02);
        assert_eq!(frame.sequence, 7);
        assert_eq!(frame.length, 0x012A);
        assert_eq!(frame.payload, [9, 9]);
    }

    #[test]
    fn parse_rejects_short_and_unknown_frames() {
        assert_eq!(DataFrame::parse(&[0x30, 0x00]), Err(FrameError::Truncated));
        assert_eq!(DataFrame::parse(&[0x50, 0, 0, 0]), Err(FrameError::UnknownType));
    }

    #[test]
    fn assembler_yields_on_eop_and_resets() {
        let data: Vec<u8> = (0..50).collect();
        let pkg = FramePackage::new(&data, 16).unwrap();
        let mut asm = FrameAssembler::new();

        let mut out = None;
        for frame in pkg.frames() {
            assert!(out.is_none());
            let wire = frame.to_bytes();
            out = asm.push(DataFrame::parse(&wire).unwrap());
        }
        assert_eq!(out.unwrap(), data);
        assert!(!asm.is_active());
    }

    #[test]
    fn frame_size_follows_mtu() {
        assert_eq!(frame_size_for_mtu(DEFAULT_MTU), 16);
        assert_eq!(frame_size_for_mtu(3), 0);
    }
}
