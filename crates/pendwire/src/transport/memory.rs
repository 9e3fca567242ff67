// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process transport.
//!
//! Defines the reference behaviour the socket transports approximate: every
//! transmitted frame is recorded in order, injected frames are received in
//! order, and nothing is lost to timing. The [`MemoryPeer`] half plays the
//! remote side in tests: it injects inbound frames, inspects what was sent,
//! installs a responder, and can fail transmits or hang up on demand.

use super::Transport;
use crate::error::Result;
use crate::frame::encode_frame;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Idle bound for one `receive_once` call.
const RECEIVE_POLL: Duration = Duration::from_millis(10);

type Responder = Box<dyn Fn(&[u8]) -> Option<Vec<u8>> + Send>;

struct Shared {
    connectionless: bool,
    open: AtomicBool,
    hung_up: AtomicBool,
    fail_transmits: AtomicBool,
    opens: AtomicUsize,
    closes: AtomicUsize,
    inbound_tx: Sender<Vec<u8>>,
    inbound_rx: Receiver<Vec<u8>>,
    sent: Mutex<Vec<Vec<u8>>>,
    sent_to: Mutex<Vec<(Vec<u8>, SocketAddr)>>,
    sent_events_tx: Sender<()>,
    sent_events_rx: Receiver<()>,
    responder: Mutex<Option<Responder>>,
}

/// Transport half handed to the channel.
pub struct MemoryTransport {
    shared: Arc<Shared>,
}

/// Remote half kept by the test or demo.
#[derive(Clone)]
pub struct MemoryPeer {
    shared: Arc<Shared>,
}

impl MemoryTransport {
    /// Connection-oriented in-memory pair.
    pub fn pair() -> (MemoryTransport, MemoryPeer) {
        Self::build(false)
    }

    /// Connectionless pair (supports `transmit_to`).
    pub fn connectionless_pair() -> (MemoryTransport, MemoryPeer) {
        Self::build(true)
    }

    fn build(connectionless: bool) -> (MemoryTransport, MemoryPeer) {
        let (inbound_tx, inbound_rx) = channel::unbounded();
        let (sent_events_tx, sent_events_rx) = channel::unbounded();
        let shared = Arc::new(Shared {
            connectionless,
            open: AtomicBool::new(false),
            hung_up: AtomicBool::new(false),
            fail_transmits: AtomicBool::new(false),
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            inbound_tx,
            inbound_rx,
            sent: Mutex::new(Vec::new()),
            sent_to: Mutex::new(Vec::new()),
            sent_events_tx,
            sent_events_rx,
            responder: Mutex::new(None),
        });
        (
            MemoryTransport {
                shared: shared.clone(),
            },
            MemoryPeer { shared },
        )
    }
}

impl Shared {
    fn record(&self, frame: &[u8]) {
        self.sent.lock().push(frame.to_vec());
        let _ = self.sent_events_tx.send(());
        let reply = self.responder.lock().as_ref().and_then(|respond| respond(frame));
        if let Some(reply) = reply {
            let _ = self.inbound_tx.send(reply);
        }
    }
}

impl Transport for MemoryTransport {
    fn open(&self) -> Result<()> {
        self.shared.open.store(true, Ordering::Release);
        self.shared.opens.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn transmit(&self, frame: &[u8]) -> bool {
        if !self.shared.open.load(Ordering::Acquire)
            || self.shared.fail_transmits.load(Ordering::Acquire)
        {
            return false;
        }
        self.shared.record(frame);
        true
    }

    fn receive_once(&self, deliver: &mut dyn FnMut(&[u8])) -> bool {
        if self.shared.hung_up.load(Ordering::Acquire) || !self.shared.open.load(Ordering::Acquire)
        {
            return false;
        }
        match self.shared.inbound_rx.recv_timeout(RECEIVE_POLL) {
            Ok(frame) => {
                deliver(&frame);
                true
            }
            Err(RecvTimeoutError::Timeout) => true,
            Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    fn close(&self) {
        self.shared.open.store(false, Ordering::Release);
        self.shared.closes.fetch_add(1, Ordering::Relaxed);
    }

    fn is_connectionless(&self) -> bool {
        self.shared.connectionless
    }

    fn transmit_to(&self, frame: &[u8], dest: SocketAddr) -> bool {
        if !self.shared.connectionless || self.shared.fail_transmits.load(Ordering::Acquire) {
            return false;
        }
        self.shared.sent_to.lock().push((frame.to_vec(), dest));
        true
    }
}

impl MemoryPeer {
    /// Queue a raw inbound buffer exactly as given.
    pub fn inject(&self, raw: impl Into<Vec<u8>>) {
        let _ = self.shared.inbound_tx.send(raw.into());
    }

    /// Frame `payload` and queue it as inbound.
    pub fn inject_payload(&self, payload: &[u8]) {
        match encode_frame(payload) {
            Ok(frame) => self.inject(frame),
            Err(e) => log::warn!("[memory] cannot inject payload: {}", e),
        }
    }

    /// Reply to each transmitted frame with whatever `respond` returns.
    pub fn set_responder(&self, respond: impl Fn(&[u8]) -> Option<Vec<u8>> + Send + 'static) {
        *self.shared.responder.lock() = Some(Box::new(respond));
    }

    /// Reflect every transmitted frame back unchanged.
    pub fn echo(&self) {
        self.set_responder(|frame| Some(frame.to_vec()));
    }

    pub fn clear_responder(&self) {
        *self.shared.responder.lock() = None;
    }

    pub fn set_fail_transmits(&self, fail: bool) {
        self.shared.fail_transmits.store(fail, Ordering::Release);
    }

    /// Make the next `receive_once` report a closed connection.
    pub fn hang_up(&self) {
        self.shared.hung_up.store(true, Ordering::Release);
    }

    /// Frames accepted by `transmit`, in order.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.shared.sent.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.shared.sent.lock().len()
    }

    /// Frames accepted by `transmit_to`, with their destinations.
    pub fn sent_to(&self) -> Vec<(Vec<u8>, SocketAddr)> {
        self.shared.sent_to.lock().clone()
    }

    /// Block until at least `count` frames were transmitted or `timeout` passes.
    pub fn wait_for_sent(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.sent_count() >= count {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let _ = self.shared.sent_events_rx.recv_timeout(remaining);
        }
    }

    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::Acquire)
    }

    pub fn open_count(&self) -> usize {
        self.shared.opens.load(Ordering::Relaxed)
    }

    pub fn close_count(&self) -> usize {
        self.shared.closes.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::parse_frame;

    #[test]
    fn transmit_requires_open() {
        let (transport, peer) = MemoryTransport::pair();
        assert!(!transport.transmit(b"\x00\x01a"));
        transport.open().expect("open");
        assert!(transport.transmit(b"\x00\x01a"));
        assert_eq!(peer.sent(), vec![b"\x00\x01a".to_vec()]);
    }

    #[test]
    fn echo_reflects_into_receive() {
        let (transport, peer) = MemoryTransport::pair();
        transport.open().expect("open");
        peer.echo();
        let frame = encode_frame(b"hi").expect("encode");
        assert!(transport.transmit(&frame));

        let mut got = Vec::new();
        assert!(transport.receive_once(&mut |raw| got.push(raw.to_vec())));
        assert_eq!(got.len(), 1);
        assert_eq!(parse_frame(&got[0]), Some(&b"hi"[..]));
    }

    #[test]
    fn receive_is_bounded_when_idle() {
        let (transport, _peer) = MemoryTransport::pair();
        transport.open().expect("open");
        let start = Instant::now();
        assert!(transport.receive_once(&mut |_| panic!("no inbound data")));
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn hang_up_stops_receiving() {
        let (transport, peer) = MemoryTransport::pair();
        transport.open().expect("open");
        peer.hang_up();
        assert!(!transport.receive_once(&mut |_| {}));
    }

    #[test]
    fn transmit_to_only_when_connectionless() {
        let dest: SocketAddr = "127.0.0.1:9".parse().expect("addr");
        let (stream, _) = MemoryTransport::pair();
        assert!(!stream.is_connectionless());
        assert!(!stream.transmit_to(b"x", dest));

        let (datagram, peer) = MemoryTransport::connectionless_pair();
        assert!(datagram.is_connectionless());
        assert!(datagram.transmit_to(b"x", dest));
        assert_eq!(peer.sent_to(), vec![(b"x".to_vec(), dest)]);
    }

    #[test]
    fn fail_transmits_rejects_frames() {
        let (transport, peer) = MemoryTransport::pair();
        transport.open().expect("open");
        peer.set_fail_transmits(true);
        assert!(!transport.transmit(b"\x00\x00"));
        assert_eq!(peer.sent_count(), 0);
    }
}
