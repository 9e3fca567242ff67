// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(dead_code)] // Each test binary uses a different subset

//! Shared helpers for the integration tests.

use crossbeam::channel::{self, Receiver, Sender};
use pendwire::frame::{encode_frame, parse_frame};
use pendwire::transport::{MemoryPeer, MemoryTransport};
use pendwire::{
    Channel, ChannelConfig, InlineCompletions, Message, Outcome, Request, StampedMessage,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const WAIT: Duration = Duration::from_secs(3);

/// One completion callback invocation.
#[derive(Debug, Clone)]
pub struct Event {
    pub stamp: u64,
    pub outcome: Outcome,
    pub reply: Option<Vec<u8>>,
    pub at: Instant,
}

/// Builds requests whose callbacks report into one channel.
pub struct Recorder {
    tx: Sender<Event>,
    rx: Receiver<Event>,
}

impl Recorder {
    pub fn new() -> Self {
        let (tx, rx) = channel::unbounded();
        Self { tx, rx }
    }

    pub fn request(&self, stamp: u64, ticks: u32) -> Arc<Request> {
        let on_ok = self.tx.clone();
        let on_err = self.tx.clone();
        Request::builder(StampedMessage::with_stamp(stamp, format!("req-{}", stamp)))
            .timeout_ticks(ticks)
            .on_response(move |msg| {
                let reply = msg
                    .downcast_ref::<StampedMessage>()
                    .and_then(|m| m.reply().map(<[u8]>::to_vec));
                let _ = on_ok.send(Event {
                    stamp,
                    outcome: Outcome::Response,
                    reply,
                    at: Instant::now(),
                });
            })
            .on_error(move |_| {
                let _ = on_err.send(Event {
                    stamp,
                    outcome: Outcome::NetworkError,
                    reply: None,
                    at: Instant::now(),
                });
            })
            .build()
    }

    pub fn next(&self, timeout: Duration) -> Option<Event> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Everything that arrives within `window`.
    pub fn collect_for(&self, window: Duration) -> Vec<Event> {
        let deadline = Instant::now() + window;
        let mut events = Vec::new();
        while let Some(event) = self.next(deadline.saturating_duration_since(Instant::now())) {
            events.push(event);
        }
        events
    }

    pub fn drain_now(&self) -> Vec<Event> {
        self.rx.try_iter().collect()
    }
}

pub fn fast_config() -> ChannelConfig {
    ChannelConfig::default()
        .with_grace_period(Duration::from_millis(20))
        .with_sweep_interval(Duration::from_millis(50))
}

pub fn memory_channel(config: ChannelConfig) -> (Channel, MemoryPeer) {
    let (transport, peer) = MemoryTransport::pair();
    let channel = Channel::new(Arc::new(transport), Arc::new(InlineCompletions), config);
    (channel, peer)
}

/// Framed response echoing `stamp`.
pub fn reply_frame(stamp: u64, body: &[u8]) -> Vec<u8> {
    encode_frame(&StampedMessage::with_stamp(stamp, body.to_vec()).encode()).expect("small reply")
}

/// Stamps of every frame the channel transmitted, in order.
pub fn sent_stamps(peer: &MemoryPeer) -> Vec<u64> {
    peer.sent()
        .iter()
        .filter_map(|raw| parse_frame(raw).and_then(StampedMessage::peek_stamp))
        .collect()
}

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}
