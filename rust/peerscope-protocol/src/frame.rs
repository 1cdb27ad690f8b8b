//! Splitting RPC messages into frames and putting them back together.
//!
//! Each message is written as a LEB128 length prefix followed by its
//! DAG-CBOR body. The result is cut into frames of at most
//! `max_frame_size` bytes; a frame never carries bytes of two messages.
//! Frames must be pushed into a [`FrameReader`] in arrival order.

use base64::{Engine, engine::general_purpose::STANDARD};
use bytes::{Buf, Bytes, BytesMut};

use crate::{ProtocolError, RpcMessage};

/// Default upper bound for a single frame.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024;

/// Default upper bound for a reassembled message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// One fragment of the RPC byte stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RpcFrame(Bytes);

impl RpcFrame {
    /// Wrap raw frame bytes.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// The frame's bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The frame's size in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the frame carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The envelope encoding of this frame.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }

    /// Decode a frame from its envelope encoding.
    pub fn from_base64(text: &str) -> Result<Self, ProtocolError> {
        STANDARD
            .decode(text)
            .map(|bytes| Self(bytes.into()))
            .map_err(|error| ProtocolError::FrameEncoding(error.to_string()))
    }
}

/// Encodes messages into frames.
#[derive(Clone, Debug)]
pub struct FrameWriter {
    max_frame_size: usize,
    max_message_size: usize,
}

impl Default for FrameWriter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_MESSAGE_SIZE)
    }
}

impl FrameWriter {
    /// A writer with explicit limits. A zero frame size is treated as one.
    pub fn new(max_frame_size: usize, max_message_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.max(1),
            max_message_size,
        }
    }

    /// Encode `message` and split it into frames.
    pub fn encode(&self, message: &RpcMessage) -> Result<Vec<RpcFrame>, ProtocolError> {
        let body = serde_ipld_dagcbor::to_vec(message)
            .map_err(|error| ProtocolError::Encode(error.to_string()))?;
        if body.len() > self.max_message_size {
            return Err(ProtocolError::MessageTooLarge {
                size: body.len() as u64,
                limit: self.max_message_size,
            });
        }
        self.split(&body)
    }

    /// Like [`FrameWriter::encode`], ignoring the message size limit. Meant
    /// for short error answers that must reach the caller even when the
    /// limit is tiny.
    pub fn encode_unbounded(&self, message: &RpcMessage) -> Result<Vec<RpcFrame>, ProtocolError> {
        let body = serde_ipld_dagcbor::to_vec(message)
            .map_err(|error| ProtocolError::Encode(error.to_string()))?;
        self.split(&body)
    }

    fn split(&self, body: &[u8]) -> Result<Vec<RpcFrame>, ProtocolError> {
        let mut stream = Vec::with_capacity(body.len() + 10);
        leb128::write::unsigned(&mut stream, body.len() as u64)
            .map_err(|error| ProtocolError::Encode(error.to_string()))?;
        stream.extend_from_slice(body);

        let stream = Bytes::from(stream);
        Ok((0..stream.len())
            .step_by(self.max_frame_size)
            .map(|start| {
                let end = (start + self.max_frame_size).min(stream.len());
                RpcFrame(stream.slice(start..end))
            })
            .collect())
    }
}

/// Reassembles frames into messages.
#[derive(Debug)]
pub struct FrameReader {
    buffer: BytesMut,
    max_message_size: usize,
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

impl FrameReader {
    /// A reader that rejects messages larger than `max_message_size`.
    pub fn new(max_message_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_message_size,
        }
    }

    /// Append a frame to the stream.
    pub fn push(&mut self, frame: &RpcFrame) {
        self.buffer.extend_from_slice(frame.as_bytes());
    }

    /// Number of buffered bytes not yet consumed by a message.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partially received message.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Take the next complete message off the stream.
    ///
    /// Returns `Ok(None)` until enough frames have arrived. An error means
    /// the stream is corrupt; callers should [`reset`](Self::reset) it.
    pub fn next_message(&mut self) -> Result<Option<RpcMessage>, ProtocolError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        let mut cursor: &[u8] = &self.buffer;
        let length = match leb128::read::unsigned(&mut cursor) {
            Ok(length) => length,
            Err(leb128::read::Error::IoError(error))
                if error.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                return Ok(None);
            }
            Err(_) => return Err(ProtocolError::LengthPrefix),
        };
        let prefix = self.buffer.len() - cursor.len();
        let available = cursor.len();

        if length > self.max_message_size as u64 {
            return Err(ProtocolError::MessageTooLarge {
                size: length,
                limit: self.max_message_size,
            });
        }
        let length = length as usize;
        if available < length {
            return Ok(None);
        }

        self.buffer.advance(prefix);
        let body = self.buffer.split_to(length);
        serde_ipld_dagcbor::from_slice(&body)
            .map(Some)
            .map_err(|error| ProtocolError::Decode(error.to_string()))
    }
}
