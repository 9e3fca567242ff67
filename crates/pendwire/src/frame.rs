// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Length-prefix framing for request and response payloads.
//!
//! ```text
//! +----------------+-------------------+
//! | Length (2B BE) | Payload           |
//! +----------------+-------------------+
//! ```
//!
//! A received buffer is accepted only when its size is exactly `length + 2`.
//! Anything else is a malformed frame and is dropped by the channel without
//! a match attempt or push delivery.
//!
//! Datagram transports hand whole buffers to [`parse_frame`]. Stream
//! transports first cut the byte stream into raw frames with [`FrameReader`].

use crate::config::{FRAME_HEADER_SIZE, MAX_PAYLOAD_SIZE};
use crate::error::{ChannelError, Result};
use std::io::{self, Read};

/// Wrap a payload in a length-prefixed frame.
///
/// Returns `[length: u16 BE][payload]`.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(ChannelError::FrameTooLarge { len: payload.len() });
    }
    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Unwrap a received frame, returning its payload.
///
/// Returns `None` when the buffer is shorter than the header or the declared
/// length disagrees with the bytes that follow it.
#[inline]
pub fn parse_frame(raw: &[u8]) -> Option<&[u8]> {
    if raw.len() < FRAME_HEADER_SIZE {
        return None;
    }
    let declared = u16::from_be_bytes([raw[0], raw[1]]) as usize;
    if declared + FRAME_HEADER_SIZE != raw.len() {
        return None;
    }
    Some(&raw[FRAME_HEADER_SIZE..])
}

#[derive(Debug, Clone, Copy)]
enum ReadState {
    ReadingLength { bytes_read: usize },
    ReadingBody { expected_len: usize, bytes_read: usize },
}

impl Default for ReadState {
    fn default() -> Self {
        ReadState::ReadingLength { bytes_read: 0 }
    }
}

/// Incremental deframer for stream transports.
///
/// Keeps partial header/body state across reads that time out, so a socket
/// with a short read timeout can be polled without losing stream alignment.
#[derive(Debug, Default)]
pub struct FrameReader {
    state: ReadState,
    /// Raw frame under construction (header + body)
    buffer: Vec<u8>,
    frames_read: u64,
}

impl FrameReader {
    pub fn new() -> Self {
        Self {
            state: ReadState::default(),
            buffer: vec![0u8; FRAME_HEADER_SIZE],
            frames_read: 0,
        }
    }

    /// Number of complete frames produced so far.
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// True while a frame has been started but not finished.
    pub fn is_partial(&self) -> bool {
        match self.state {
            ReadState::ReadingLength { bytes_read } => bytes_read > 0,
            ReadState::ReadingBody { .. } => true,
        }
    }

    /// Discard any partial frame (e.g. after reconnect).
    pub fn reset(&mut self) {
        self.state = ReadState::default();
        self.buffer.clear();
        self.buffer.resize(FRAME_HEADER_SIZE, 0);
    }

    /// Try to read one complete raw frame (header included).
    ///
    /// - `Ok(Some(frame))` - a frame was completed
    /// - `Ok(None)` - the read timed out or would block; call again later
    /// - `Err(e)` - EOF or I/O failure; the stream is unusable
    pub fn read_frame<R: Read + ?Sized>(&mut self, reader: &mut R) -> io::Result<Option<Vec<u8>>> {
        if self.buffer.len() < FRAME_HEADER_SIZE {
            self.buffer.resize(FRAME_HEADER_SIZE, 0);
        }
        loop {
            let (filled, target) = match self.state {
                ReadState::ReadingLength { bytes_read } => (bytes_read, FRAME_HEADER_SIZE),
                ReadState::ReadingBody {
                    expected_len,
                    bytes_read,
                } => (FRAME_HEADER_SIZE + bytes_read, FRAME_HEADER_SIZE + expected_len),
            };

            match reader.read(&mut self.buffer[filled..target]) {
                Ok(0) => {
                    let what = if self.is_partial() {
                        "connection closed mid-frame"
                    } else {
                        "connection closed"
                    };
                    return Err(io::Error::new(io::ErrorKind::UnexpectedEof, what));
                }
                Ok(n) => self.advance(n),
                Err(e) if is_timeout(&e) => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }

            if let ReadState::ReadingBody {
                expected_len,
                bytes_read,
            } = self.state
            {
                if bytes_read == expected_len {
                    return Ok(Some(self.finish(FRAME_HEADER_SIZE + expected_len)));
                }
            }
        }
    }

    fn advance(&mut self, n: usize) {
        self.state = match self.state {
            ReadState::ReadingLength { bytes_read } => {
                let total = bytes_read + n;
                if total < FRAME_HEADER_SIZE {
                    ReadState::ReadingLength { bytes_read: total }
                } else {
                    let len = u16::from_be_bytes([self.buffer[0], self.buffer[1]]) as usize;
                    self.buffer.resize(FRAME_HEADER_SIZE + len, 0);
                    ReadState::ReadingBody {
                        expected_len: len,
                        bytes_read: 0,
                    }
                }
            }
            ReadState::ReadingBody {
                expected_len,
                bytes_read,
            } => ReadState::ReadingBody {
                expected_len,
                bytes_read: bytes_read + n,
            },
        };
    }

    fn finish(&mut self, total: usize) -> Vec<u8> {
        let frame = self.buffer[..total].to_vec();
        self.frames_read += 1;
        self.reset();
        frame
    }
}

/// Socket read timeouts surface as `WouldBlock` on Unix and `TimedOut` on Windows.
pub(crate) fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
