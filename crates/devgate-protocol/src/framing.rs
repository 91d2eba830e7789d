//! Frame boundary detection for streaming transports.
//!
//! TCP delivers a byte stream with no message boundaries. Each handler
//! declares a [`Framing`] policy and the [`FrameParser`] applies it, buffering
//! partial data until a complete frame is available.
//!
//! # Policies
//!
//! | Policy | Boundary | Used by |
//! |--------|----------|---------|
//! | [`Framing::LengthPrefixed`] | 2-byte magic, then a little-endian `u16` total length | binary TCP protocols |
//! | [`Framing::Delimited`] | a terminator byte (not included in the frame) | line-oriented text |
//! | [`Framing::Whole`] | every chunk handed in is one frame | HTTP bodies, RS485 replies |
//!
//! A handler that declares `Whole` is frame-boundary-ignorant and relies on the
//! transport to deliver complete frames.
//!
//! # State Machine
//!
//! ```text
//! ┌──────────────┐  magic found   ┌──────────────┐  len bytes buffered  ┌─────────────┐
//! │ WaitingMagic │──────────────> │ ReadingFrame │────────────────────> │ Frame ready │
//! └──────────────┘                └──────────────┘                      └─────────────┘
//!      ^   │ garbage discarded          │ implausible length                   │
//!      │   └────────────────────────────┘ (skip one byte, resync)              │
//!      └───────────────────────────────────────────────────────────────────────┘
//! ```

use bytes::{Buf, Bytes, BytesMut};
use devgate_core::constants::MAX_FRAME_SIZE;
use std::collections::VecDeque;
use tracing::{debug, trace};

const INITIAL_BUFFER_CAPACITY: usize = 4 * 1024;

/// How a handler's frames are delimited on a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Frames start with `magic` and carry their total length as a
    /// little-endian `u16` at `length_offset`.
    LengthPrefixed {
        magic: [u8; 2],
        length_offset: usize,
        min_len: usize,
    },

    /// Frames end with `delimiter`; the delimiter is stripped.
    Delimited { delimiter: u8 },

    /// The transport already delivers complete frames.
    Whole,
}

impl Framing {
    /// True when the handler relies on the transport for frame boundaries.
    pub fn is_boundary_ignorant(&self) -> bool {
        matches!(self, Self::Whole)
    }
}

/// Parser state for length-prefixed framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    WaitingMagic,
    ReadingFrame { expected_len: usize },
}

/// Stateful frame extractor.
#[derive(Debug)]
pub struct FrameParser {
    framing: Framing,
    buffer: BytesMut,
    state: ParserState,
    frames: VecDeque<Bytes>,
    max_frame_size: usize,
    discarded: u64,
}

impl FrameParser {
    pub fn new(framing: Framing) -> Self {
        Self::with_max_frame_size(framing, MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(framing: Framing, max_frame_size: usize) -> Self {
        Self {
            framing,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            state: ParserState::WaitingMagic,
            frames: VecDeque::new(),
            max_frame_size,
            discarded: 0,
        }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Total bytes dropped while resynchronizing.
    pub fn discarded_bytes(&self) -> u64 {
        self.discarded
    }

    /// Bytes buffered but not yet part of a complete frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Append stream bytes and extract every frame they complete.
    pub fn feed(&mut self, bytes: &[u8]) {
        match self.framing {
            Framing::Whole => {
                if !bytes.is_empty() {
                    self.frames.push_back(Bytes::copy_from_slice(bytes));
                }
            }
            Framing::Delimited { delimiter } => {
                self.buffer.extend_from_slice(bytes);
                self.extract_delimited(delimiter);
            }
            Framing::LengthPrefixed {
                magic,
                length_offset,
                min_len,
            } => {
                self.buffer.extend_from_slice(bytes);
                while self.extract_length_prefixed(magic, length_offset, min_len) {}
            }
        }
    }

    pub fn next_frame(&mut self) -> Option<Bytes> {
        self.frames.pop_front()
    }

    pub fn drain_frames(&mut self) -> Vec<Bytes> {
        self.frames.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.frames.clear();
        self.state = ParserState::WaitingMagic;
    }

    fn discard(&mut self, count: usize) {
        self.buffer.advance(count);
        self.discarded += count as u64;
    }

    fn extract_delimited(&mut self, delimiter: u8) {
        while let Some(pos) = self.buffer.iter().position(|&b| b == delimiter) {
            let frame = self.buffer.split_to(pos).freeze();
            self.buffer.advance(1);
            if !frame.is_empty() {
                self.frames.push_back(frame);
            }
        }
        if self.buffer.len() > self.max_frame_size {
            debug!(
                buffered = self.buffer.len(),
                max = self.max_frame_size,
                "delimiter not found within frame limit, discarding buffer"
            );
            let len = self.buffer.len();
            self.discard(len);
        }
    }

    /// Returns true when progress was made and another pass may find more.
    fn extract_length_prefixed(
        &mut self,
        magic: [u8; 2],
        length_offset: usize,
        min_len: usize,
    ) -> bool {
        match self.state {
            ParserState::WaitingMagic => {
                let Some(start) = find_magic(&self.buffer, magic) else {
                    // Keep a trailing first magic byte; the second may follow.
                    let keep = usize::from(self.buffer.last() == Some(&magic[0]));
                    let drop = self.buffer.len() - keep;
                    if drop > 0 {
                        trace!(bytes = drop, "discarding bytes before frame magic");
                        self.discard(drop);
                    }
                    return false;
                };
                if start > 0 {
                    trace!(bytes = start, "discarding bytes before frame magic");
                    self.discard(start);
                }
                if self.buffer.len() < length_offset + 2 {
                    return false;
                }
                let declared = usize::from(u16::from_le_bytes([
                    self.buffer[length_offset],
                    self.buffer[length_offset + 1],
                ]));
                if declared < min_len || declared > self.max_frame_size {
                    debug!(declared, min_len, "implausible frame length, resyncing");
                    self.discard(1);
                    return true;
                }
                self.state = ParserState::ReadingFrame {
                    expected_len: declared,
                };
                true
            }
            ParserState::ReadingFrame { expected_len } => {
                if self.buffer.len() < expected_len {
                    return false;
                }
                let frame = self.buffer.split_to(expected_len).freeze();
                self.frames.push_back(frame);
                self.state = ParserState::WaitingMagic;
                true
            }
        }
    }
}

fn find_magic(buffer: &[u8], magic: [u8; 2]) -> Option<usize> {
    buffer.windows(2).position(|w| w == magic)
}
