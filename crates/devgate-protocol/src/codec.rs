//! Tokio codec over [`FrameParser`].
//!
//! `FrameCodec` lets transports wrap a socket in `Framed<TcpStream, FrameCodec>`
//! and read complete raw frames with `StreamExt::next`. Decoding yields the raw
//! frame bytes; turning them into a [`crate::ProtocolMessage`] is left to the
//! handler so parse failures stay per-frame instead of tearing down the stream.
//!
//! ```rust,no_run
//! use devgate_protocol::{FrameCodec, Framing};
//! use futures::StreamExt;
//! use tokio::net::TcpStream;
//! use tokio_util::codec::Framed;
//!
//! # async fn example() -> std::io::Result<()> {
//! let stream = TcpStream::connect("127.0.0.1:4370").await?;
//! let mut framed = Framed::new(stream, FrameCodec::new(Framing::Delimited { delimiter: b'\n' }));
//! while let Some(Ok(frame)) = framed.next().await {
//!     println!("{} bytes", frame.len());
//! }
//! # Ok(())
//! # }
//! ```

use bytes::{Bytes, BytesMut};
use devgate_core::constants::MAX_FRAME_SIZE;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CodecError;
use crate::framing::{FrameParser, Framing};

#[derive(Debug)]
pub struct FrameCodec {
    parser: FrameParser,
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new(framing: Framing) -> Self {
        Self::with_max_frame_size(framing, MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(framing: Framing, max_frame_size: usize) -> Self {
        Self {
            parser: FrameParser::with_max_frame_size(framing, max_frame_size),
            max_frame_size,
        }
    }

    pub fn framing(&self) -> Framing {
        self.parser.framing()
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Bytes the parser dropped while looking for frame boundaries.
    pub fn discarded_bytes(&self) -> u64 {
        self.parser.discarded_bytes()
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if !src.is_empty() {
            let chunk = src.split();
            self.parser.feed(&chunk);
        }
        Ok(self.parser.next_frame())
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > self.max_frame_size {
            return Err(CodecError::FrameTooLarge {
                size: item.len(),
                max: self.max_frame_size,
            });
        }
        dst.reserve(item.len() + 1);
        dst.extend_from_slice(&item);
        if let Framing::Delimited { delimiter } = self.parser.framing() {
            dst.extend_from_slice(&[delimiter]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_returns_queued_frames_one_at_a_time() {
        let mut codec = FrameCodec::new(Framing::Delimited { delimiter: b'\n' });
        let mut buf = BytesMut::from(&b"a\nb\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().as_ref(), b"a");
        assert!(buf.is_empty());
        // Second frame is still queued inside the parser.
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().as_ref(), b"b");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn encode_appends_delimiter() {
        let mut codec = FrameCodec::new(Framing::Delimited { delimiter: b'\n' });
        let mut dst = BytesMut::new();
        codec.encode(Bytes::from_static(b"OK:1"), &mut dst).unwrap();
        assert_eq!(dst.as_ref(), b"OK:1\n");
    }

    #[test]
    fn encode_rejects_oversized_frames() {
        let mut codec = FrameCodec::with_max_frame_size(Framing::Whole, 4);
        let mut dst = BytesMut::new();
        let err = codec
            .encode(Bytes::from_static(b"12345"), &mut dst)
            .unwrap_err();
        assert!(matches!(err, CodecError::FrameTooLarge { size: 5, max: 4 }));
    }
}
