// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Request/response channel.
//!
//! # Architecture
//!
//! ```text
//!  caller threads                         owner thread
//!       |                                      ^
//!   submit()                          CompletionSink::deliver()
//!       v                                      |
//!  +----------+  grace  +----------+   +---------------+
//!  | outbound |-------->|  sender  |-->| in-flight     |<-- sweeper (tick/evict)
//!  |  queue   |         |  thread  |   | registry      |
//!  +----------+         +----------+   +---------------+
//!                            |                ^
//!                         transmit        take_match
//!                            v                |
//!                      +---------------------------+
//!                      |         Transport         |--> listener thread
//!                      +---------------------------+      |
//!                                                    unmatched -> PushHandler
//! ```
//!
//! Three named worker threads (`<prefix>-sender`, `<prefix>-sweeper`,
//! `<prefix>-listener`) run between [`Channel::initialize`] and
//! [`Channel::tear_down`]. They share one stop channel; dropping its sender
//! disconnects it and every loop exits at its next wait.
//!
//! # Example
//!
//! ```
//! use pendwire::completion::InlineCompletions;
//! use pendwire::transport::MemoryTransport;
//! use pendwire::{Channel, ChannelConfig, Request, StampedMessage};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let (transport, peer) = MemoryTransport::pair();
//! peer.echo();
//!
//! let config = ChannelConfig::default().with_grace_period(Duration::from_millis(10));
//! let channel = Channel::new(Arc::new(transport), Arc::new(InlineCompletions), config);
//! channel.initialize().expect("memory transport opens");
//!
//! let (tx, rx) = crossbeam::channel::bounded(1);
//! channel.submit(
//!     Request::builder(StampedMessage::new("ping"))
//!         .on_response(move |msg| {
//!             let reply = msg.downcast_ref::<StampedMessage>().and_then(|m| m.reply());
//!             let _ = tx.send(reply.map(<[u8]>::to_vec));
//!         })
//!         .build(),
//! );
//!
//! let reply = rx.recv_timeout(Duration::from_secs(2)).expect("echo reply");
//! assert_eq!(reply.as_deref(), Some(&b"ping"[..]));
//! channel.tear_down();
//! ```

use crate::completion::{CompletionSink, Outcome};
use crate::config::{ChannelConfig, DrainPolicy, TransmitFailurePolicy};
use crate::error::{ChannelError, Result};
use crate::frame::parse_frame;
use crate::registry::{InFlightRegistry, OutboundQueue};
use crate::request::Request;
use crate::transport::Transport;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use crossbeam::select;
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

/// Receives inbound payloads that match no in-flight request.
pub trait PushHandler: Send + Sync {
    fn handle_push(&self, payload: &[u8]);
}

impl<F> PushHandler for F
where
    F: Fn(&[u8]) + Send + Sync,
{
    fn handle_push(&self, payload: &[u8]) {
        self(payload)
    }
}

/// Channel counters.
///
/// Updated with relaxed atomics from the worker threads; read them through
/// [`snapshot`](Self::snapshot).
#[derive(Debug, Default)]
pub struct ChannelMetrics {
    pub submitted: AtomicU64,
    pub transmitted: AtomicU64,
    pub transmit_failures: AtomicU64,
    /// Dropped by the sender after a cancel inside the grace window
    pub cancelled_before_send: AtomicU64,
    pub responses: AtomicU64,
    /// Matched or evicted after the caller cancelled
    pub cancelled_after_send: AtomicU64,
    pub timeouts: AtomicU64,
    pub malformed_frames: AtomicU64,
    pub pushes: AtomicU64,
    /// Unmatched payloads with no push handler installed
    pub pushes_dropped: AtomicU64,
    /// Requests still pending when the channel was torn down
    pub drained: AtomicU64,
}

/// Point-in-time copy of [`ChannelMetrics`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub submitted: u64,
    pub transmitted: u64,
    pub transmit_failures: u64,
    pub cancelled_before_send: u64,
    pub responses: u64,
    pub cancelled_after_send: u64,
    pub timeouts: u64,
    pub malformed_frames: u64,
    pub pushes: u64,
    pub pushes_dropped: u64,
    pub drained: u64,
}

impl ChannelMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            transmitted: self.transmitted.load(Ordering::Relaxed),
            transmit_failures: self.transmit_failures.load(Ordering::Relaxed),
            cancelled_before_send: self.cancelled_before_send.load(Ordering::Relaxed),
            responses: self.responses.load(Ordering::Relaxed),
            cancelled_after_send: self.cancelled_after_send.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            pushes: self.pushes.load(Ordering::Relaxed),
            pushes_dropped: self.pushes_dropped.load(Ordering::Relaxed),
            drained: self.drained.load(Ordering::Relaxed),
        }
    }
}

#[inline]
fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// State shared with the worker threads.
struct Shared {
    transport: Arc<dyn Transport>,
    completions: Arc<dyn CompletionSink>,
    config: ChannelConfig,
    outbound: OutboundQueue,
    in_flight: InFlightRegistry,
    push_handler: RwLock<Option<Arc<dyn PushHandler>>>,
    metrics: ChannelMetrics,
}

/// Running worker threads of an initialized channel.
struct Workers {
    stop_tx: Sender<()>,
    sender: Option<JoinHandle<Option<Arc<Request>>>>,
    sweeper: Option<JoinHandle<()>>,
    listener: Option<JoinHandle<()>>,
}

impl Workers {
    fn thread_ids(&self) -> Vec<ThreadId> {
        let sender = self.sender.as_ref().map(|h| h.thread().id());
        let sweeper = self.sweeper.as_ref().map(|h| h.thread().id());
        let listener = self.listener.as_ref().map(|h| h.thread().id());
        [sender, sweeper, listener].into_iter().flatten().collect()
    }

    /// Signal stop and join every thread except the calling one.
    ///
    /// Returns the request the sender was holding in its grace window, if any.
    fn stop(self) -> Option<Arc<Request>> {
        let Workers {
            stop_tx,
            sender,
            sweeper,
            listener,
        } = self;
        drop(stop_tx);

        let held = sender.and_then(|h| join_worker("sender", h)).flatten();
        for (name, handle) in [("sweeper", sweeper), ("listener", listener)] {
            if let Some(h) = handle {
                join_worker(name, h);
            }
        }
        held
    }
}

/// Join `handle` unless it is the current thread, which exits on its own once
/// it returns to its loop and sees the stop signal.
fn join_worker<T>(name: &str, handle: JoinHandle<T>) -> Option<T> {
    if handle.thread().id() == thread::current().id() {
        log::debug!("[channel] {} stopped from its own thread, not joined", name);
        return None;
    }
    match handle.join() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("[channel] {} thread panicked", name);
            None
        }
    }
}

enum Lifecycle {
    Stopped,
    Running(Workers),
    /// A `tear_down` is joining these threads with the lock released
    Stopping(Vec<ThreadId>),
}

impl Lifecycle {
    fn stopping_on_current_thread(&self) -> bool {
        match self {
            Lifecycle::Stopping(ids) => ids.contains(&thread::current().id()),
            _ => false,
        }
    }
}

/// Asynchronous request/response channel over a [`Transport`].
///
/// Every method may be called from a completion callback, including
/// [`tear_down`](Self::tear_down) on the worker thread that delivers it.
pub struct Channel {
    shared: Arc<Shared>,
    lifecycle: Mutex<Lifecycle>,
    stopped: Condvar,
}

impl Channel {
    /// Create a stopped channel.
    pub fn new(
        transport: Arc<dyn Transport>,
        completions: Arc<dyn CompletionSink>,
        config: ChannelConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                completions,
                config,
                outbound: OutboundQueue::new(),
                in_flight: InFlightRegistry::new(),
                push_handler: RwLock::new(None),
                metrics: ChannelMetrics::new(),
            }),
            lifecycle: Mutex::new(Lifecycle::Stopped),
            stopped: Condvar::new(),
        }
    }

    /// Open the transport and start the worker threads.
    ///
    /// No-op when already running. Waits for a teardown in progress on
    /// another thread to finish first. Requests submitted while stopped are
    /// picked up once the sender starts.
    pub fn initialize(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        loop {
            if lifecycle.stopping_on_current_thread() {
                return Err(ChannelError::TearingDown);
            }
            match &*lifecycle {
                Lifecycle::Stopped => break,
                Lifecycle::Running(_) => {
                    log::debug!("[channel] already initialized");
                    return Ok(());
                }
                Lifecycle::Stopping(_) => {}
            }
            self.stopped.wait(&mut lifecycle);
        }

        self.shared.transport.open()?;
        let (stop_tx, stop_rx) = channel::bounded::<()>(0);
        let mut workers = Workers {
            stop_tx,
            sender: None,
            sweeper: None,
            listener: None,
        };
        match self.spawn_into(&mut workers, stop_rx) {
            Ok(()) => {
                *lifecycle = Lifecycle::Running(workers);
                log::info!(
                    "[channel] initialized (grace={:?}, sweep={:?})",
                    self.shared.config.grace_period,
                    self.shared.config.sweep_interval
                );
                Ok(())
            }
            Err(e) => {
                *lifecycle = Lifecycle::Stopping(workers.thread_ids());
                MutexGuard::unlocked(&mut lifecycle, || {
                    if let Some(held) = workers.stop() {
                        // Never transmitted, so it is still a queued request
                        self.shared.outbound.push(held);
                    }
                    self.shared.transport.close();
                });
                *lifecycle = Lifecycle::Stopped;
                self.stopped.notify_all();
                Err(e)
            }
        }
    }

    fn spawn_into(&self, workers: &mut Workers, stop_rx: Receiver<()>) -> Result<()> {
        let prefix = &self.shared.config.thread_name_prefix;

        let shared = self.shared.clone();
        let outbound = self.shared.outbound.receiver();
        let stop = stop_rx.clone();
        workers.sender = Some(spawn_worker(format!("{}-sender", prefix), move || {
            sender_loop(&shared, &outbound, &stop)
        })?);

        let shared = self.shared.clone();
        let wake = self.shared.in_flight.wake_receiver();
        let stop = stop_rx.clone();
        workers.sweeper = Some(spawn_worker(format!("{}-sweeper", prefix), move || {
            sweeper_loop(&shared, &wake, &stop)
        })?);

        let shared = self.shared.clone();
        workers.listener = Some(spawn_worker(format!("{}-listener", prefix), move || {
            listener_loop(&shared, &stop_rx)
        })?);
        Ok(())
    }

    /// Queue a request for transmission. Accepted in any state.
    pub fn submit(&self, request: Arc<Request>) {
        bump(&self.shared.metrics.submitted);
        log::debug!("[channel] submit {:?}", request);
        self.shared.outbound.push(request);
    }

    /// Encode and transmit `request` to `dest` right now.
    ///
    /// Skips the outbound queue, the grace window, the cancellation check and
    /// the in-flight registry: no callback of `request` will ever run because
    /// of this send.
    pub fn send_immediately(&self, request: &Request, dest: SocketAddr) -> Result<()> {
        if !self.shared.transport.is_connectionless() {
            return Err(ChannelError::Unsupported(
                "immediate send needs a connectionless transport",
            ));
        }
        if !self.is_initialized() {
            return Err(ChannelError::NotInitialized);
        }

        let frame = request.create_send_data()?;
        if self.shared.transport.transmit_to(&frame, dest) {
            bump(&self.shared.metrics.transmitted);
            log::trace!("[channel] sent {} bytes immediately to {}", frame.len(), dest);
            Ok(())
        } else {
            bump(&self.shared.metrics.transmit_failures);
            Err(ChannelError::TransmitFailed)
        }
    }

    /// [`send_immediately`](Self::send_immediately) to the request's own destination.
    pub fn send_immediately_to_destination(&self, request: &Request) -> Result<()> {
        let dest = request
            .destination()
            .ok_or(ChannelError::MissingDestination)?
            .resolve()?;
        self.send_immediately(request, dest)
    }

    /// Install (or with `None`, remove) the handler for unmatched inbound payloads.
    pub fn set_push_handler(&self, handler: Option<Arc<dyn PushHandler>>) {
        *self.shared.push_handler.write() = handler;
    }

    /// Stop the workers, drain both queues, then close the transport.
    ///
    /// Pending requests are notified according to [`DrainPolicy`]. Threads
    /// are joined and notifications delivered with no channel lock held.
    /// Called from a worker thread, that thread is not joined; it exits when
    /// its callback returns. A concurrent call from another thread waits for
    /// the teardown in progress. Idempotent.
    pub fn tear_down(&self) {
        let mut lifecycle = self.lifecycle.lock();
        let running = loop {
            match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
                Lifecycle::Running(workers) => break Some(workers),
                Lifecycle::Stopped => break None,
                stopping => {
                    *lifecycle = stopping;
                    if lifecycle.stopping_on_current_thread() {
                        // The teardown in progress is joining this thread
                        return;
                    }
                    self.stopped.wait(&mut lifecycle);
                }
            }
        };

        let notify = match running {
            Some(workers) => {
                *lifecycle = Lifecycle::Stopping(workers.thread_ids());
                let notify = MutexGuard::unlocked(&mut lifecycle, || {
                    let held = workers.stop();
                    let notify = self.drain(held);
                    self.shared.transport.close();
                    log::info!("[channel] torn down");
                    notify
                });
                *lifecycle = Lifecycle::Stopped;
                self.stopped.notify_all();
                notify
            }
            None => self.drain(None),
        };
        drop(lifecycle);

        for request in notify {
            self.shared.completions.deliver(Outcome::NetworkError, request);
        }
    }

    /// Empty both queues and pick the requests to notify.
    fn drain(&self, held: Option<Arc<Request>>) -> Vec<Arc<Request>> {
        let mut outbound: Vec<Arc<Request>> = held.into_iter().collect();
        outbound.extend(self.shared.outbound.drain());
        let in_flight = self.shared.in_flight.drain();

        let total = outbound.len() + in_flight.len();
        if total == 0 {
            return Vec::new();
        }
        self.shared
            .metrics
            .drained
            .fetch_add(total as u64, Ordering::Relaxed);

        let notify: Vec<Arc<Request>> = match self.shared.config.drain_policy {
            DrainPolicy::NotifyMostRecent => outbound
                .last()
                .or_else(|| in_flight.last())
                .cloned()
                .into_iter()
                .collect(),
            DrainPolicy::NotifyAll => outbound.into_iter().chain(in_flight).collect(),
        };
        log::info!(
            "[channel] drained {} pending request(s), notifying {}",
            total,
            notify.len()
        );
        notify
    }

    /// True between a successful `initialize()` and the start of `tear_down()`.
    pub fn is_initialized(&self) -> bool {
        matches!(*self.lifecycle.lock(), Lifecycle::Running(_))
    }

    /// Requests queued but not yet picked up by the sender.
    pub fn pending_outbound(&self) -> usize {
        self.shared.outbound.len()
    }

    /// Requests transmitted and awaiting a response or timeout.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.len()
    }

    pub fn metrics(&self) -> &ChannelMetrics {
        &self.shared.metrics
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.shared.config
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.tear_down();
    }
}

fn spawn_worker<T, F>(name: String, f: F) -> Result<JoinHandle<T>>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    thread::Builder::new()
        .name(name.clone())
        .spawn(f)
        .map_err(|e| ChannelError::ThreadSpawn(format!("{}: {}", name, e)))
}

// ============================================================================
// Worker loops
// ============================================================================

/// Dequeue, wait out the grace window, transmit.
///
/// Returns the request it was holding if stopped inside the grace window.
fn sender_loop(
    shared: &Shared,
    outbound: &Receiver<Arc<Request>>,
    stop_rx: &Receiver<()>,
) -> Option<Arc<Request>> {
    log::debug!("[sender] started");
    loop {
        // Stop wins over queued work, including a stop raised by our own callback
        if matches!(stop_rx.try_recv(), Err(TryRecvError::Disconnected)) {
            log::debug!("[sender] stopped");
            return None;
        }
        let request = select! {
            recv(stop_rx) -> _ => None,
            recv(outbound) -> msg => msg.ok(),
        };
        let Some(request) = request else {
            log::debug!("[sender] stopped");
            return None;
        };

        match stop_rx.recv_timeout(shared.config.grace_period) {
            Err(RecvTimeoutError::Timeout) => {}
            _ => {
                log::debug!("[sender] stopped inside grace window");
                return Some(request);
            }
        }
        shared.transmit(request);
    }
}

/// Age in-flight requests once per cycle and fail the expired ones.
fn sweeper_loop(shared: &Shared, wake_rx: &Receiver<()>, stop_rx: &Receiver<()>) {
    log::debug!("[sweeper] started");
    loop {
        // A stopped sweeper must not consume its successor's wake
        if matches!(stop_rx.try_recv(), Err(TryRecvError::Disconnected)) {
            break;
        }
        if shared.in_flight.is_empty() {
            let woken = select! {
                recv(stop_rx) -> _ => false,
                recv(wake_rx) -> _ => true,
            };
            if !woken {
                break;
            }
            continue;
        }

        match stop_rx.recv_timeout(shared.config.sweep_interval) {
            Err(RecvTimeoutError::Timeout) => {}
            _ => break,
        }

        for request in shared.in_flight.sweep() {
            if request.is_cancelled() {
                bump(&shared.metrics.cancelled_after_send);
                log::debug!("[sweeper] evicted cancelled {:?}", request);
                continue;
            }
            bump(&shared.metrics.timeouts);
            log::debug!("[sweeper] timeout {:?}", request);
            shared.completions.deliver(Outcome::NetworkError, request);
        }
    }
    log::debug!("[sweeper] stopped");
}

/// Drive the transport until it reports closed or stop is signalled.
fn listener_loop(shared: &Shared, stop_rx: &Receiver<()>) {
    log::debug!("[listener] started");
    let mut deliver = |raw: &[u8]| shared.dispatch_inbound(raw);
    loop {
        if matches!(stop_rx.try_recv(), Err(TryRecvError::Disconnected)) {
            log::debug!("[listener] stopped");
            return;
        }
        if !shared.transport.receive_once(&mut deliver) {
            log::info!("[listener] transport closed, no longer receiving");
            return;
        }
    }
}

impl Shared {
    fn transmit(&self, request: Arc<Request>) {
        if request.is_cancelled() {
            bump(&self.metrics.cancelled_before_send);
            log::debug!("[sender] dropped cancelled {:?}", request);
            return;
        }

        let frame = match request.create_send_data() {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("[sender] cannot encode request: {}", e);
                self.transmit_failed(request);
                return;
            }
        };

        let waits = request.waits_for_response();
        // Registered first: a fast reply must find it
        if waits {
            self.in_flight.insert(request.clone());
        }

        if self.transport.transmit(&frame) {
            bump(&self.metrics.transmitted);
            log::trace!("[sender] transmitted {} bytes", frame.len());
            return;
        }

        log::warn!("[sender] transport rejected {} byte frame", frame.len());
        if !waits || self.in_flight.remove(&request) {
            self.transmit_failed(request);
        }
    }

    fn transmit_failed(&self, request: Arc<Request>) {
        bump(&self.metrics.transmit_failures);
        match self.config.transmit_failure_policy {
            TransmitFailurePolicy::Drop => {}
            TransmitFailurePolicy::NotifyNetworkError => {
                self.completions.deliver(Outcome::NetworkError, request);
            }
        }
    }

    fn dispatch_inbound(&self, raw: &[u8]) {
        let Some(payload) = parse_frame(raw) else {
            bump(&self.metrics.malformed_frames);
            log::debug!("[listener] dropped malformed frame ({} bytes)", raw.len());
            return;
        };

        match self.in_flight.take_match(payload) {
            Some(request) if request.is_cancelled() => {
                bump(&self.metrics.cancelled_after_send);
                log::debug!("[listener] matched cancelled {:?}", request);
            }
            Some(request) => {
                request.decode(payload);
                bump(&self.metrics.responses);
                self.completions.deliver(Outcome::Response, request);
            }
            None => self.push(payload),
        }
    }

    fn push(&self, payload: &[u8]) {
        let handler = self.push_handler.read().clone();
        match handler {
            Some(handler) => {
                bump(&self.metrics.pushes);
                handler.handle_push(payload);
            }
            None => {
                bump(&self.metrics.pushes_dropped);
                log::trace!("[listener] no push handler, dropped {} bytes", payload.len());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::InlineCompletions;
    use crate::frame::encode_frame;
    use crate::message::{Message, StampedMessage};
    use crate::transport::{MemoryPeer, MemoryTransport};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(2);

    fn fast_config() -> ChannelConfig {
        ChannelConfig::default()
            .with_grace_period(Duration::from_millis(20))
            .with_sweep_interval(Duration::from_millis(20))
    }

    fn channel_with(config: ChannelConfig) -> (Channel, MemoryPeer) {
        let (transport, peer) = MemoryTransport::pair();
        let channel = Channel::new(Arc::new(transport), Arc::new(InlineCompletions), config);
        (channel, peer)
    }

    fn tracked(stamp: u64, ticks: u32, events: &Sender<(u64, Outcome)>) -> Arc<Request> {
        let on_ok = events.clone();
        let on_err = events.clone();
        Request::builder(StampedMessage::with_stamp(stamp, b"body".to_vec()))
            .timeout_ticks(ticks)
            .on_response(move |_| {
                let _ = on_ok.send((stamp, Outcome::Response));
            })
            .on_error(move |_| {
                let _ = on_err.send((stamp, Outcome::NetworkError));
            })
            .build()
    }

    #[test]
    fn initialize_is_idempotent() {
        let (channel, peer) = channel_with(fast_config());
        channel.initialize().expect("init");
        channel.initialize().expect("second init");
        assert!(channel.is_initialized());
        assert_eq!(peer.open_count(), 1);

        channel.tear_down();
        channel.tear_down();
        assert!(!channel.is_initialized());
        assert_eq!(peer.close_count(), 1);
    }

    #[test]
    fn echoed_request_completes_with_response() {
        let (channel, peer) = channel_with(fast_config());
        peer.echo();
        channel.initialize().expect("init");

        let (tx, rx) = channel::unbounded();
        let request = tracked(11, 10, &tx);
        channel.submit(request.clone());

        assert_eq!(rx.recv_timeout(WAIT).expect("outcome"), (11, Outcome::Response));
        assert_eq!(channel.in_flight(), 0);
        assert_eq!(channel.pending_outbound(), 0);
        request.with_message(|m| {
            let reply = m.downcast_ref::<StampedMessage>().and_then(|s| s.reply());
            assert_eq!(reply, Some(&b"body"[..]));
        });

        let stats = channel.metrics().snapshot();
        assert_eq!(stats.submitted, 1);
        assert_eq!(stats.transmitted, 1);
        assert_eq!(stats.responses, 1);
    }

    #[test]
    fn cancel_inside_grace_window_prevents_transmit() {
        let (channel, peer) =
            channel_with(fast_config().with_grace_period(Duration::from_millis(300)));
        channel.initialize().expect("init");

        let (tx, rx) = channel::unbounded();
        let request = tracked(12, 10, &tx);
        channel.submit(request.clone());
        request.cancel();

        assert!(!peer.wait_for_sent(1, Duration::from_millis(600)));
        assert!(rx.try_recv().is_err());
        assert_eq!(channel.metrics().snapshot().cancelled_before_send, 1);
    }

    #[test]
    fn unmatched_payload_goes_to_push_handler() {
        let (channel, peer) = channel_with(fast_config());
        let (tx, rx) = channel::unbounded();
        channel.set_push_handler(Some(Arc::new(move |payload: &[u8]| {
            let _ = tx.send(payload.to_vec());
        })));
        channel.initialize().expect("init");

        peer.inject_payload(b"unsolicited");
        assert_eq!(rx.recv_timeout(WAIT).expect("push"), b"unsolicited".to_vec());
        assert_eq!(channel.metrics().snapshot().pushes, 1);
    }

    #[test]
    fn malformed_frame_is_neither_matched_nor_pushed() {
        let (channel, peer) = channel_with(fast_config());
        let (push_tx, push_rx) = channel::unbounded::<Vec<u8>>();
        channel.set_push_handler(Some(Arc::new(move |payload: &[u8]| {
            let _ = push_tx.send(payload.to_vec());
        })));
        channel.initialize().expect("init");

        let (tx, rx) = channel::unbounded();
        let request = tracked(13, 500, &tx);
        channel.submit(request);
        assert!(peer.wait_for_sent(1, WAIT));

        // Correct stamp, wrong length header
        let mut bad = encode_frame(&StampedMessage::with_stamp(13, b"x".to_vec()).encode())
            .expect("encode");
        bad[1] += 1;
        peer.inject(bad);
        // Followed by a good push so we know the bad one was processed
        peer.inject_payload(b"marker");

        assert_eq!(push_rx.recv_timeout(WAIT).expect("marker"), b"marker".to_vec());
        assert!(rx.try_recv().is_err());
        assert_eq!(channel.in_flight(), 1);
        let stats = channel.metrics().snapshot();
        assert_eq!(stats.malformed_frames, 1);
        assert_eq!(stats.pushes, 1);
    }

    #[test]
    fn transmit_failure_drops_by_default() {
        let (channel, peer) = channel_with(fast_config());
        peer.set_fail_transmits(true);
        channel.initialize().expect("init");

        let (tx, rx) = channel::unbounded();
        channel.submit(tracked(14, 1, &tx));
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
        assert_eq!(channel.in_flight(), 0);
        assert_eq!(channel.metrics().snapshot().transmit_failures, 1);
    }

    #[test]
    fn transmit_failure_can_notify() {
        let (channel, peer) = channel_with(
            fast_config().with_transmit_failure_policy(TransmitFailurePolicy::NotifyNetworkError),
        );
        peer.set_fail_transmits(true);
        channel.initialize().expect("init");

        let (tx, rx) = channel::unbounded();
        channel.submit(tracked(15, 10, &tx));
        assert_eq!(rx.recv_timeout(WAIT).expect("outcome"), (15, Outcome::NetworkError));
        assert_eq!(channel.in_flight(), 0);
    }

    #[test]
    fn fire_and_forget_is_never_registered() {
        let (channel, peer) = channel_with(fast_config());
        channel.initialize().expect("init");

        let request = Request::builder(StampedMessage::new("notify"))
            .wait_response(false)
            .build();
        channel.submit(request);
        assert!(peer.wait_for_sent(1, WAIT));
        assert_eq!(channel.in_flight(), 0);
    }

    #[test]
    fn tear_down_notifies_only_most_recent_outbound() {
        let (channel, _peer) = channel_with(fast_config());
        let (tx, rx) = channel::unbounded();
        for stamp in 1..=3 {
            channel.submit(tracked(stamp, 10, &tx));
        }

        channel.tear_down();
        let notified: Vec<_> = rx.try_iter().collect();
        assert_eq!(notified, vec![(3, Outcome::NetworkError)]);
        assert_eq!(channel.metrics().snapshot().drained, 3);
        assert_eq!(channel.pending_outbound(), 0);
    }

    #[test]
    fn tear_down_notify_all_follows_queue_order() {
        let (channel, _peer) = channel_with(fast_config().with_drain_policy(DrainPolicy::NotifyAll));
        let (tx, rx) = channel::unbounded();
        for stamp in 1..=3 {
            channel.submit(tracked(stamp, 10, &tx));
        }

        channel.tear_down();
        let notified: Vec<u64> = rx.try_iter().map(|(stamp, _)| stamp).collect();
        assert_eq!(notified, vec![1, 2, 3]);
    }

    #[test]
    fn tear_down_without_initialize_leaves_transport_alone() {
        let (channel, peer) = channel_with(fast_config());
        channel.tear_down();
        assert_eq!(peer.close_count(), 0);
    }

    #[test]
    fn send_immediately_requires_connectionless_transport() {
        let (channel, _peer) = channel_with(fast_config());
        channel.initialize().expect("init");
        let request = Request::builder(StampedMessage::new("x")).build();
        let dest: SocketAddr = "127.0.0.1:9".parse().expect("addr");
        assert!(matches!(
            channel.send_immediately(&request, dest),
            Err(ChannelError::Unsupported(_))
        ));
    }

    #[test]
    fn send_immediately_bypasses_queues() {
        let (transport, peer) = MemoryTransport::connectionless_pair();
        let channel = Channel::new(Arc::new(transport), Arc::new(InlineCompletions), fast_config());

        let request = Request::builder(StampedMessage::with_stamp(21, b"now".to_vec()))
            .destination("127.0.0.1", 7000)
            .build();
        assert!(matches!(
            channel.send_immediately_to_destination(&request),
            Err(ChannelError::NotInitialized)
        ));

        channel.initialize().expect("init");
        request.cancel();
        channel
            .send_immediately_to_destination(&request)
            .expect("immediate send");

        let sent = peer.sent_to();
        assert_eq!(sent.len(), 1);
        let expected: SocketAddr = "127.0.0.1:7000".parse().expect("addr");
        assert_eq!(sent[0].1, expected);
        assert_eq!(channel.in_flight(), 0);
        assert_eq!(channel.pending_outbound(), 0);

        let no_dest = Request::builder(StampedMessage::new("x")).build();
        assert!(matches!(
            channel.send_immediately_to_destination(&no_dest),
            Err(ChannelError::MissingDestination)
        ));
    }
}
