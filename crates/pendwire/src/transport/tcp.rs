// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP stream transport.
//!
//! One outbound connection per channel. The stream is split into a writer
//! handle (sender loop) and a cloned reader handle (listener loop) so a
//! blocked read never stalls a transmit. Inbound bytes are cut into frames
//! by [`FrameReader`], which survives read timeouts mid-frame.

use super::Transport;
use crate::config::TcpConfig;
use crate::error::Result;
use crate::frame::{is_timeout, FrameReader};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};

struct ReadHalf {
    stream: TcpStream,
    frames: FrameReader,
}

/// Client-side TCP transport.
pub struct TcpTransport {
    config: TcpConfig,
    writer: Mutex<Option<TcpStream>>,
    reader: Mutex<Option<ReadHalf>>,
}

impl TcpTransport {
    pub fn new(config: TcpConfig) -> Self {
        Self {
            config,
            writer: Mutex::new(None),
            reader: Mutex::new(None),
        }
    }

    /// Local address of the connected socket, if open.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.writer.lock().as_ref().and_then(|s| s.local_addr().ok())
    }

    pub fn peer(&self) -> SocketAddr {
        self.config.peer
    }

    fn connect(&self) -> io::Result<TcpStream> {
        let peer = self.config.peer;
        let socket = Socket::new(Domain::for_address(peer), Type::STREAM, Some(Protocol::TCP))?;
        socket.connect_timeout(&peer.into(), self.config.connect_timeout)?;
        let stream: TcpStream = socket.into();
        stream.set_nodelay(self.config.nodelay)?;
        stream.set_read_timeout(Some(self.config.read_timeout))?;
        stream.set_write_timeout(Some(self.config.write_timeout))?;
        Ok(stream)
    }
}

impl Transport for TcpTransport {
    fn open(&self) -> Result<()> {
        let stream = self.connect()?;
        let read_stream = stream.try_clone()?;
        log::info!(
            "[tcp] connected {} -> {}",
            stream
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "?".into()),
            self.config.peer
        );
        *self.reader.lock() = Some(ReadHalf {
            stream: read_stream,
            frames: FrameReader::new(),
        });
        *self.writer.lock() = Some(stream);
        Ok(())
    }

    fn transmit(&self, frame: &[u8]) -> bool {
        let mut writer = self.writer.lock();
        let Some(stream) = writer.as_mut() else {
            return false;
        };
        match stream.write_all(frame).and_then(|()| stream.flush()) {
            Ok(()) => true,
            Err(e) if is_timeout(&e) => {
                // A partial frame may be on the wire; the stream is no longer framed
                log::warn!(
                    "[tcp] {} stopped reading (write timed out after {:?}), dropping connection",
                    self.config.peer,
                    self.config.write_timeout
                );
                let _ = stream.shutdown(Shutdown::Both);
                *writer = None;
                false
            }
            Err(e) => {
                log::warn!("[tcp] write to {} failed: {}", self.config.peer, e);
                false
            }
        }
    }

    fn receive_once(&self, deliver: &mut dyn FnMut(&[u8])) -> bool {
        let mut reader = self.reader.lock();
        let Some(half) = reader.as_mut() else {
            return false;
        };
        match half.frames.read_frame(&mut half.stream) {
            Ok(Some(frame)) => {
                deliver(&frame);
                true
            }
            Ok(None) => true,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                log::info!("[tcp] {} closed the connection", self.config.peer);
                *reader = None;
                false
            }
            Err(e) => {
                log::warn!("[tcp] read from {} failed: {}", self.config.peer, e);
                *reader = None;
                false
            }
        }
    }

    fn close(&self) {
        if let Some(stream) = self.writer.lock().take() {
            // Unblocks the read half too; both handles share one socket
            let _ = stream.shutdown(Shutdown::Both);
            log::debug!("[tcp] closed connection to {}", self.config.peer);
        }
        // Held by the listener while it delivers; it clears the half itself
        // once the shutdown surfaces as EOF
        if let Some(mut reader) = self.reader.try_lock() {
            reader.take();
        }
    }
}
