use bytes::{Buf, BytesMut};
use std::io::{self, Cursor};
use thiserror::Error as ThisError;
use tokio_util::codec::{Decoder, Encoder};

use crate::config::DEFAULT_MAX_FRAME_SIZE;
use crate::frame::{self, Frame};

#[derive(Debug, ThisError)]
pub enum Error {
    /// Malformed input. The offending bytes were already discarded, reading may go on.
    #[error(transparent)]
    Frame(#[from] frame::Error),
    #[error("ERR Protocol error: frame size exceeds limit of {0} bytes")]
    FrameTooLarge(usize),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Whether the connection the error came from can still be used.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Frame(_))
    }
}

/// RESP codec. Decoding is resumable: a partial frame leaves the buffer untouched until
/// more data arrives.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> FrameCodec {
        FrameCodec { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        FrameCodec::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let mut cursor = Cursor::new(&src[..]);
        let result = Frame::parse(&mut cursor);
        let position = cursor.position() as usize;

        match result {
            Ok(frame) => {
                // Remove the parsed frame from the buffer.
                src.advance(position);
                Ok(Some(frame))
            }
            // Not enough data to parse a frame. Check the frame size here to prevent a
            // client from making us buffer without bound.
            Err(frame::Error::Incomplete) if src.len() > self.max_frame_size => {
                Err(Error::FrameTooLarge(self.max_frame_size))
            }
            Err(frame::Error::Incomplete) => Ok(None),
            Err(err) => {
                resync(src, position);
                Err(err.into())
            }
        }
    }
}

impl Encoder<&Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, frame: &Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        frame.encode(dst)?;
        Ok(())
    }
}

/// Drops the input consumed by a failed parse. When the failure happened in the middle of
/// a line, the rest of that line goes too, so a single malformed line yields one error.
fn resync(src: &mut BytesMut, position: usize) {
    let position = position.min(src.len());

    if position >= 2 && &src[position - 2..position] == b"\r\n" {
        src.advance(position);
        return;
    }

    match src[position..].windows(2).position(|window| window == b"\r\n") {
        Some(offset) => src.advance(position + offset + 2),
        None => src.clear(),
    }
}
