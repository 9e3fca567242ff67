// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message capability consumed by the request engine.
//!
//! The engine never looks inside a payload. It asks the message to encode
//! itself, to recognise its own response, and to absorb that response.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

/// Application message carried by a [`crate::Request`].
pub trait Message: Any + Send {
    /// Serialize the outbound payload (without frame header).
    fn encode(&self) -> Vec<u8>;

    /// Absorb a matched inbound payload.
    fn decode(&mut self, payload: &[u8]);

    /// Whether `payload` is the response to this message.
    fn matches(&self, payload: &[u8]) -> bool;

    /// Upcast for [`downcast_ref`](trait.Message.html#method.downcast_ref).
    fn as_any(&self) -> &dyn Any;
}

impl<'a> dyn Message + 'a {
    /// Access the concrete message type inside a completion callback.
    pub fn downcast_ref<T: Message>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// Size of the correlation stamp at the front of a [`StampedMessage`] payload.
pub const STAMP_SIZE: usize = 8;

/// Message correlated by an 8-byte big-endian stamp.
///
/// ```text
/// +----------------+----------------------+
/// | Stamp (8B BE)  | Body                 |
/// +----------------+----------------------+
/// ```
///
/// A responder echoes the stamp in front of its reply body. Stamps are unique
/// within a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StampedMessage {
    stamp: u64,
    body: Vec<u8>,
    reply: Option<Vec<u8>>,
}

impl StampedMessage {
    /// Create a message with a fresh stamp.
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self::with_stamp(next_stamp(), body)
    }

    /// Create a message with an explicit stamp (responders, tests).
    pub fn with_stamp(stamp: u64, body: impl Into<Vec<u8>>) -> Self {
        Self {
            stamp,
            body: body.into(),
            reply: None,
        }
    }

    pub fn stamp(&self) -> u64 {
        self.stamp
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Reply body (stamp stripped), once a response has been decoded.
    pub fn reply(&self) -> Option<&[u8]> {
        self.reply.as_deref()
    }

    /// Read the stamp of any stamped payload.
    pub fn peek_stamp(payload: &[u8]) -> Option<u64> {
        let head: [u8; STAMP_SIZE] = payload.get(..STAMP_SIZE)?.try_into().ok()?;
        Some(u64::from_be_bytes(head))
    }
}

impl Message for StampedMessage {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(STAMP_SIZE + self.body.len());
        out.extend_from_slice(&self.stamp.to_be_bytes());
        out.extend_from_slice(&self.body);
        out
    }

    fn decode(&mut self, payload: &[u8]) {
        self.reply = payload.get(STAMP_SIZE..).map(<[u8]>::to_vec);
    }

    fn matches(&self, payload: &[u8]) -> bool {
        Self::peek_stamp(payload) == Some(self.stamp)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Process-wide stamp source, seeded from the wall clock.
fn next_stamp() -> u64 {
    static NEXT: OnceLock<AtomicU64> = OnceLock::new();
    NEXT.get_or_init(|| {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        AtomicU64::new(seed)
    })
    .fetch_add(1, Ordering::Relaxed)
}
