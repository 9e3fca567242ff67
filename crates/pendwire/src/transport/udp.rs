// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UDP datagram transport.
//!
//! One datagram carries exactly one frame. The socket is left unconnected so
//! it can also serve [`Transport::transmit_to`] for immediate sends to an
//! explicit destination.

use super::Transport;
use crate::config::{UdpConfig, FRAME_HEADER_SIZE, MAX_PAYLOAD_SIZE};
use crate::error::Result;
use crate::frame::is_timeout;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;

/// Largest datagram a well-formed frame can occupy.
const RECV_BUFFER_LEN: usize = FRAME_HEADER_SIZE + MAX_PAYLOAD_SIZE;

/// Connectionless UDP transport.
pub struct UdpTransport {
    config: UdpConfig,
    socket: Mutex<Option<Arc<UdpSocket>>>,
    recv_buf: Mutex<Vec<u8>>,
}

impl UdpTransport {
    pub fn new(config: UdpConfig) -> Self {
        Self {
            config,
            socket: Mutex::new(None),
            recv_buf: Mutex::new(vec![0u8; RECV_BUFFER_LEN]),
        }
    }

    /// Bound local address, if open.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.current().and_then(|s| s.local_addr().ok())
    }

    pub fn peer(&self) -> SocketAddr {
        self.config.peer
    }

    fn current(&self) -> Option<Arc<UdpSocket>> {
        self.socket.lock().clone()
    }

    fn bind(&self) -> io::Result<UdpSocket> {
        let bind = self.config.bind;
        let socket = Socket::new(Domain::for_address(bind), Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        if self.config.recv_buffer_size > 0 {
            socket.set_recv_buffer_size(self.config.recv_buffer_size)?;
        }
        socket.bind(&bind.into())?;
        let socket: UdpSocket = socket.into();
        socket.set_read_timeout(Some(self.config.read_timeout))?;
        Ok(socket)
    }

    fn send(&self, frame: &[u8], dest: SocketAddr) -> bool {
        let Some(socket) = self.current() else {
            return false;
        };
        match socket.send_to(frame, dest) {
            Ok(n) if n == frame.len() => true,
            Ok(n) => {
                log::warn!("[udp] short send to {}: {}/{} bytes", dest, n, frame.len());
                false
            }
            Err(e) => {
                log::warn!("[udp] send to {} failed: {}", dest, e);
                false
            }
        }
    }
}

impl Transport for UdpTransport {
    fn open(&self) -> Result<()> {
        let socket = self.bind()?;
        log::info!(
            "[udp] bound {} (peer {})",
            socket
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "?".into()),
            self.config.peer
        );
        *self.socket.lock() = Some(Arc::new(socket));
        Ok(())
    }

    fn transmit(&self, frame: &[u8]) -> bool {
        self.send(frame, self.config.peer)
    }

    fn receive_once(&self, deliver: &mut dyn FnMut(&[u8])) -> bool {
        let Some(socket) = self.current() else {
            return false;
        };
        let mut buf = self.recv_buf.lock();
        match socket.recv_from(&mut buf) {
            Ok((n, from)) => {
                log::trace!("[udp] {} bytes from {}", n, from);
                deliver(&buf[..n]);
                true
            }
            Err(e) if is_timeout(&e) => true,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => true,
            // ICMP port unreachable from an earlier send; the socket is still usable
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => true,
            Err(e) => {
                log::warn!("[udp] receive failed: {}", e);
                false
            }
        }
    }

    fn close(&self) {
        if self.socket.lock().take().is_some() {
            log::debug!("[udp] socket closed");
        }
    }

    fn is_connectionless(&self) -> bool {
        true
    }

    fn transmit_to(&self, frame: &[u8], dest: SocketAddr) -> bool {
        self.send(frame, dest)
    }
}
