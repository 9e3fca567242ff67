// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Outbound queue and in-flight registry.
//!
//! ```text
//! submit() --> OutboundQueue --> sender loop --> InFlightRegistry
//!                                                  ^          ^
//!                                        sweeper (tick/evict) |
//!                                             listener (take_match)
//! ```
//!
//! A request lives in at most one of the two structures and is never
//! re-inserted once removed.

use crate::request::Request;
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::Arc;

/// FIFO of submitted, not yet transmitted requests.
///
/// Multi-producer (callers), single consumer (sender loop).
#[derive(Debug)]
pub struct OutboundQueue {
    tx: Sender<Arc<Request>>,
    rx: Receiver<Arc<Request>>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        let (tx, rx) = channel::unbounded();
        Self { tx, rx }
    }

    /// Append a request; wakes the sender loop if it is waiting.
    pub fn push(&self, request: Arc<Request>) {
        // Cannot fail: `self` keeps the receiver alive.
        let _ = self.tx.send(request);
    }

    /// Consumer endpoint for the sender loop.
    pub(crate) fn receiver(&self) -> Receiver<Arc<Request>> {
        self.rx.clone()
    }

    /// Remove everything still queued, oldest first.
    pub fn drain(&self) -> Vec<Arc<Request>> {
        self.rx.try_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Transmitted requests awaiting a response or timeout.
///
/// All removals (match, eviction, drain) happen under one lock, so a request
/// is removed exactly once and therefore completed at most once.
#[derive(Debug)]
pub struct InFlightRegistry {
    entries: Mutex<Vec<Arc<Request>>>,
    /// Signalled on the empty -> non-empty transition
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        let (wake_tx, wake_rx) = channel::bounded(1);
        Self {
            entries: Mutex::new(Vec::new()),
            wake_tx,
            wake_rx,
        }
    }

    /// Register a transmitted request, waking the sweeper if it was idle.
    pub fn insert(&self, request: Arc<Request>) {
        let mut entries = self.entries.lock();
        entries.push(request);
        if entries.len() == 1 {
            match self.wake_tx.try_send(()) {
                Ok(()) | Err(TrySendError::Full(())) => {}
                Err(TrySendError::Disconnected(())) => {
                    log::debug!("[registry] wake channel disconnected");
                }
            }
        }
    }

    /// Wake-up endpoint for the sweeper.
    pub(crate) fn wake_receiver(&self) -> Receiver<()> {
        self.wake_rx.clone()
    }

    /// Remove and return the first request (front to back) whose message
    /// matches `payload`.
    pub fn take_match(&self, payload: &[u8]) -> Option<Arc<Request>> {
        let mut entries = self.entries.lock();
        let index = entries.iter().position(|r| r.matches(payload))?;
        Some(entries.remove(index))
    }

    /// Remove `request` by identity. False if it was already taken.
    pub fn remove(&self, request: &Arc<Request>) -> bool {
        let mut entries = self.entries.lock();
        match entries.iter().position(|r| Request::same(r, request)) {
            Some(index) => {
                entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Advance every entry by one tick and evict those past their threshold.
    ///
    /// Scans back to front so removals do not shift unvisited entries. The
    /// evicted requests are returned newest first.
    pub fn sweep(&self) -> Vec<Arc<Request>> {
        let mut entries = self.entries.lock();
        let mut expired = Vec::new();
        for i in (0..entries.len()).rev() {
            if entries[i].tick() {
                expired.push(entries.remove(i));
            }
        }
        expired
    }

    /// Remove everything, oldest first.
    pub fn drain(&self) -> Vec<Arc<Request>> {
        std::mem::take(&mut *self.entries.lock())
    }

    pub fn contains(&self, request: &Arc<Request>) -> bool {
        self.entries.lock().iter().any(|r| Request::same(r, request))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for InFlightRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, StampedMessage};

    fn stamped(stamp: u64, ticks: u32) -> Arc<Request> {
        Request::builder(StampedMessage::with_stamp(stamp, b"req".to_vec()))
            .timeout_ticks(ticks)
            .build()
    }

    fn reply(stamp: u64) -> Vec<u8> {
        StampedMessage::with_stamp(stamp, b"resp".to_vec()).encode()
    }

    #[test]
    fn outbound_preserves_submission_order() {
        let queue = OutboundQueue::new();
        let a = stamped(1, 10);
        let b = stamped(2, 10);
        queue.push(a.clone());
        queue.push(b.clone());
        assert_eq!(queue.len(), 2);

        let drained = queue.drain();
        assert!(Request::same(&drained[0], &a));
        assert!(Request::same(&drained[1], &b));
        assert!(queue.is_empty());
    }

    #[test]
    fn insert_into_empty_registry_signals_wake_once() {
        let registry = InFlightRegistry::new();
        let wake = registry.wake_receiver();

        registry.insert(stamped(1, 10));
        registry.insert(stamped(2, 10));
        assert_eq!(wake.try_iter().count(), 1);

        registry.drain();
        registry.insert(stamped(3, 10));
        assert_eq!(wake.try_iter().count(), 1);
    }

    #[test]
    fn take_match_removes_only_the_matching_entry() {
        let registry = InFlightRegistry::new();
        let requests: Vec<_> = (0..5).map(|i| stamped(100 + i, 10)).collect();
        for r in &requests {
            registry.insert(r.clone());
        }

        let hit = registry.take_match(&reply(102)).expect("position 2 matches");
        assert!(Request::same(&hit, &requests[2]));
        assert_eq!(registry.len(), 4);
        for (i, r) in requests.iter().enumerate() {
            assert_eq!(registry.contains(r), i != 2);
        }
        assert!(registry.take_match(&reply(102)).is_none());
        assert!(registry.take_match(&reply(999)).is_none());
    }

    #[test]
    fn take_match_prefers_oldest_duplicate() {
        let registry = InFlightRegistry::new();
        let first = stamped(7, 10);
        let second = stamped(7, 10);
        registry.insert(first.clone());
        registry.insert(second.clone());

        let hit = registry.take_match(&reply(7)).expect("match");
        assert!(Request::same(&hit, &first));
        assert!(registry.contains(&second));
    }

    #[test]
    fn sweep_evicts_after_threshold_exceeded() {
        let registry = InFlightRegistry::new();
        let short = stamped(1, 1);
        let long = stamped(2, 3);
        registry.insert(short.clone());
        registry.insert(long.clone());

        assert!(registry.sweep().is_empty());

        let evicted = registry.sweep();
        assert_eq!(evicted.len(), 1);
        assert!(Request::same(&evicted[0], &short));

        assert!(registry.sweep().is_empty());
        let evicted = registry.sweep();
        assert_eq!(evicted.len(), 1);
        assert!(Request::same(&evicted[0], &long));
        assert!(registry.is_empty());
    }

    #[test]
    fn sweep_evicts_adjacent_entries_without_skipping() {
        let registry = InFlightRegistry::new();
        for i in 0..4 {
            registry.insert(stamped(i, 0));
        }
        assert_eq!(registry.sweep().len(), 4);
        assert!(registry.is_empty());
    }

    #[test]
    fn remove_is_by_identity_and_single_shot() {
        let registry = InFlightRegistry::new();
        let a = stamped(1, 10);
        let twin = stamped(1, 10);
        registry.insert(a.clone());
        assert!(!registry.remove(&twin));
        assert!(registry.remove(&a));
        assert!(!registry.remove(&a));
        assert!(registry.is_empty());
    }

    #[test]
    fn drain_returns_insertion_order() {
        let registry = InFlightRegistry::new();
        let a = stamped(1, 10);
        let b = stamped(2, 10);
        registry.insert(a.clone());
        registry.insert(b.clone());
        let drained = registry.drain();
        assert!(Request::same(&drained[0], &a));
        assert!(Request::same(&drained[1], &b));
        assert!(registry.is_empty());
    }
}
