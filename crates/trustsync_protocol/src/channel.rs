//! Ordered message channels.
//!
//! The protocol exchanges whole messages. `FramedChannel` delimits them on
//! a byte stream with a 4-byte big-endian length prefix; `MemoryChannel`
//! connects two endpoints inside one process.

use crate::error::{ProtocolError, ProtocolResult};
use crate::messages::Response;
use std::io::{self, Read, Write};
use std::sync::mpsc::{self, Receiver, Sender};

/// Default upper bound for a single frame (16 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const HEADER_LEN: usize = 4;

/// An ordered, reliable channel of byte messages.
pub trait Channel: Send {
    /// Sends one message.
    fn send(&mut self, frame: &[u8]) -> ProtocolResult<()>;

    /// Blocks until the next message arrives.
    ///
    /// Returns [`ProtocolError::Disconnected`] once the peer is gone.
    fn recv(&mut self) -> ProtocolResult<Vec<u8>>;

    /// Encodes and sends a response.
    fn send_response(&mut self, response: &Response) -> ProtocolResult<()> {
        let bytes = response.encode()?;
        self.send(&bytes)
    }

    /// Receives and decodes a response.
    fn recv_response(&mut self) -> ProtocolResult<Response> {
        let bytes = self.recv()?;
        Response::decode(&bytes)
    }
}

/// Length-prefixed framing over a byte stream.
#[derive(Debug)]
pub struct FramedChannel<S> {
    stream: S,
    max_frame_len: usize,
}

impl<S: Read + Write> FramedChannel<S> {
    /// Wraps a stream using the default frame limit.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    /// Sets the maximum accepted frame length.
    pub fn with_max_frame_len(mut self, max: usize) -> Self {
        self.max_frame_len = max;
        self
    }

    /// Returns the maximum accepted frame length.
    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    /// Returns a reference to the underlying stream.
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Unwraps the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }

    fn read_header(&mut self) -> ProtocolResult<usize> {
        let mut header = [0u8; HEADER_LEN];
        match self.stream.read_exact(&mut header) {
            Ok(()) => Ok(u32::from_be_bytes(header) as usize),
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                Err(ProtocolError::Disconnected)
            }
            Err(err) => Err(err.into()),
        }
    }
}

impl<S: Read + Write + Send> Channel for FramedChannel<S> {
    fn send(&mut self, frame: &[u8]) -> ProtocolResult<()> {
        if frame.len() > self.max_frame_len {
            return Err(ProtocolError::FrameTooLarge {
                len: frame.len(),
                max: self.max_frame_len,
            });
        }
        let len = u32::try_from(frame.len()).map_err(|_| ProtocolError::FrameTooLarge {
            len: frame.len(),
            max: u32::MAX as usize,
        })?;
        self.stream.write_all(&len.to_be_bytes())?;
        self.stream.write_all(frame)?;
        self.stream.flush()?;
        Ok(())
    }

    fn recv(&mut self) -> ProtocolResult<Vec<u8>> {
        let len = self.read_header()?;
        if len > self.max_frame_len {
            return Err(ProtocolError::FrameTooLarge {
                len,
                max: self.max_frame_len,
            });
        }
        let mut frame = vec![0u8; len];
        match self.stream.read_exact(&mut frame) {
            Ok(()) => Ok(frame),
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                Err(ProtocolError::Disconnected)
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// One end of an in-process channel pair.
#[derive(Debug)]
pub struct MemoryChannel {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

impl MemoryChannel {
    /// Creates two connected endpoints.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel();
        let (b_tx, a_rx) = mpsc::channel();
        (
            Self { tx: a_tx, rx: a_rx },
            Self { tx: b_tx, rx: b_rx },
        )
    }
}

impl Channel for MemoryChannel {
    fn send(&mut self, frame: &[u8]) -> ProtocolResult<()> {
        self.tx
            .send(frame.to_vec())
            .map_err(|_| ProtocolError::Disconnected)
    }

    fn recv(&mut self) -> ProtocolResult<Vec<u8>> {
        self.rx.recv().map_err(|_| ProtocolError::Disconnected)
    }
}
