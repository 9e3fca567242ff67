// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Duplex byte transports underneath a [`crate::Channel`].
//!
//! A transport moves opaque frames. It knows nothing about requests or
//! matching; the channel drives it from three places:
//!
//! | Caller | Method |
//! |--------|--------|
//! | `Channel::initialize` | [`Transport::open`] |
//! | sender loop | [`Transport::transmit`] |
//! | listener loop | [`Transport::receive_once`] |
//! | `Channel::send_immediately` | [`Transport::transmit_to`] |
//! | `Channel::tear_down` | [`Transport::close`] |
//!
//! # Implementations
//!
//! - [`TcpTransport`] - stream, deframed with [`crate::frame::FrameReader`]
//! - [`UdpTransport`] - datagram, one frame per datagram, connectionless
//! - [`MemoryTransport`] - in-process, for tests and demos

mod memory;
mod tcp;
mod udp;

pub use memory::{MemoryPeer, MemoryTransport};
pub use tcp::TcpTransport;
pub use udp::UdpTransport;

use crate::error::Result;
use std::net::SocketAddr;

/// Byte transport contract used by the channel workers.
pub trait Transport: Send + Sync {
    /// Open the local endpoint (connect, bind). Called once per initialize.
    fn open(&self) -> Result<()>;

    /// Send one complete frame. `false` means the frame was not sent.
    fn transmit(&self, frame: &[u8]) -> bool;

    /// Perform one receive attempt, passing each raw frame to `deliver`.
    ///
    /// Must return within a bounded time when idle so the listener can notice
    /// a stop request. Returning `false` stops the listener for good.
    fn receive_once(&self, deliver: &mut dyn FnMut(&[u8])) -> bool;

    /// Release the local endpoint.
    fn close(&self);

    /// Whether [`transmit_to`](Transport::transmit_to) is meaningful.
    fn is_connectionless(&self) -> bool {
        false
    }

    /// Send one frame to an explicit destination (connectionless only).
    fn transmit_to(&self, _frame: &[u8], _dest: SocketAddr) -> bool {
        false
    }
}
