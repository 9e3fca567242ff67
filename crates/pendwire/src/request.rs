// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! A single outstanding request: message, cancellation, timeout accounting
//! and completion callbacks.
//!
//! Requests are shared as `Arc<Request>` between the caller and the channel
//! workers. Identity is pointer identity ([`Request::same`]).
//!
//! # Lifecycle
//!
//! ```text
//! build() -> Channel::submit() -> outbound queue
//!     -> grace period -> transmit -> in-flight registry (if waiting)
//!         -> response match | timeout eviction | teardown drain
//!             -> CompletionSink::deliver() -> Request::complete()
//! ```
//!
//! `cancel()` can be called from any thread at any point. It only raises a
//! flag and releases the callbacks, so a cancelled request can never invoke
//! either of them afterwards.

use crate::completion::Outcome;
use crate::config::DEFAULT_TIMEOUT_TICKS;
use crate::error::Result;
use crate::frame::encode_frame;
use crate::message::Message;
use parking_lot::{Mutex, ReentrantMutex};
use std::cell::RefCell;
use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Callback invoked with the decoded message on a successful response.
pub type ResponseCallback = Box<dyn FnOnce(&dyn Message) + Send>;

/// Callback invoked with the original message on timeout or network failure.
pub type ErrorCallback = Box<dyn FnOnce(&dyn Message) + Send>;

/// Destination used by connectionless immediate sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub host: String,
    pub port: u16,
}

impl Destination {
    /// Resolve to the first socket address for `host:port`.
    pub fn resolve(&self) -> io::Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("no address for {}:{}", self.host, self.port),
                )
            })
    }
}

struct Callbacks {
    cancelled: bool,
    on_response: Option<ResponseCallback>,
    on_error: Option<ErrorCallback>,
}

/// A request travelling through a [`crate::Channel`].
pub struct Request {
    /// Reentrant so a callback can read or re-encode its own request
    message: ReentrantMutex<RefCell<Box<dyn Message>>>,
    callbacks: Mutex<Callbacks>,
    /// Eviction threshold in sweep ticks
    timeout_ticks: u32,
    /// Sweep ticks spent in flight (sweeper-owned)
    elapsed_ticks: AtomicU32,
    wait_response: bool,
    destination: Option<Destination>,
}

impl Request {
    /// Start building a request around `message`.
    pub fn builder(message: impl Message) -> RequestBuilder {
        RequestBuilder {
            message: Box::new(message),
            timeout_ticks: DEFAULT_TIMEOUT_TICKS,
            wait_response: true,
            destination: None,
            on_response: None,
            on_error: None,
        }
    }

    /// Cancel the request.
    ///
    /// Not yet transmitted: it never will be. Already in flight: a later match
    /// or timeout completes silently.
    pub fn cancel(&self) {
        let mut cb = self.callbacks.lock();
        cb.cancelled = true;
        cb.on_response = None;
        cb.on_error = None;
    }

    pub fn is_cancelled(&self) -> bool {
        self.callbacks.lock().cancelled
    }

    /// Count one sweep cycle; true once the timeout threshold is exceeded.
    pub(crate) fn tick(&self) -> bool {
        let elapsed = self.elapsed_ticks.fetch_add(1, Ordering::Relaxed) + 1;
        elapsed > self.timeout_ticks
    }

    pub fn timeout_ticks(&self) -> u32 {
        self.timeout_ticks
    }

    pub fn elapsed_ticks(&self) -> u32 {
        self.elapsed_ticks.load(Ordering::Relaxed)
    }

    /// False for fire-and-forget requests (never registered in flight).
    pub fn waits_for_response(&self) -> bool {
        self.wait_response
    }

    pub fn destination(&self) -> Option<&Destination> {
        self.destination.as_ref()
    }

    /// Encode the message and wrap it in a length-prefixed frame.
    pub fn create_send_data(&self) -> Result<Vec<u8>> {
        let payload = self.message.lock().borrow().encode();
        encode_frame(&payload)
    }

    /// Run `f` against the message.
    pub fn with_message<R>(&self, f: impl FnOnce(&dyn Message) -> R) -> R {
        let guard = self.message.lock();
        let message = guard.borrow();
        f(&**message)
    }

    pub(crate) fn matches(&self, payload: &[u8]) -> bool {
        self.message.lock().borrow().matches(payload)
    }

    pub(crate) fn decode(&self, payload: &[u8]) {
        let guard = self.message.lock();
        if let Ok(mut message) = guard.try_borrow_mut() {
            message.decode(payload);
        } else {
            log::warn!("[request] message borrowed by its own callback, reply not decoded");
        };
    }

    /// Invoke the callback for `outcome`.
    ///
    /// Both callbacks are released on the first call, so at most one terminal
    /// callback ever runs. Returns whether a callback was invoked.
    ///
    /// The message stays locked for the duration of the callback. The
    /// callback itself may use this request again (`with_message`,
    /// `create_send_data`, `Channel::send_immediately`); other threads wait.
    pub fn complete(&self, outcome: Outcome) -> bool {
        let (on_response, on_error) = {
            let mut cb = self.callbacks.lock();
            (cb.on_response.take(), cb.on_error.take())
        };
        let callback = match outcome {
            Outcome::Response => on_response,
            Outcome::NetworkError => on_error,
        };
        match callback {
            Some(f) => {
                let guard = self.message.lock();
                let message = guard.borrow();
                f(&**message);
                true
            }
            None => false,
        }
    }

    /// Pointer identity.
    pub fn same(a: &Arc<Request>, b: &Arc<Request>) -> bool {
        Arc::ptr_eq(a, b)
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("timeout_ticks", &self.timeout_ticks)
            .field("elapsed_ticks", &self.elapsed_ticks())
            .field("wait_response", &self.wait_response)
            .field("cancelled", &self.is_cancelled())
            .field("destination", &self.destination)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Request`].
pub struct RequestBuilder {
    message: Box<dyn Message>,
    timeout_ticks: u32,
    wait_response: bool,
    destination: Option<Destination>,
    on_response: Option<ResponseCallback>,
    on_error: Option<ErrorCallback>,
}

impl RequestBuilder {
    /// Timeout threshold in sweep ticks (default 10).
    pub fn timeout_ticks(mut self, ticks: u32) -> Self {
        self.timeout_ticks = ticks;
        self
    }

    /// `false` makes the request fire-and-forget.
    pub fn wait_response(mut self, wait: bool) -> Self {
        self.wait_response = wait;
        self
    }

    pub fn destination(mut self, host: impl Into<String>, port: u16) -> Self {
        self.destination = Some(Destination {
            host: host.into(),
            port,
        });
        self
    }

    /// Runs with the decoded message. See [`Request::complete`] for what the
    /// callback may do with its own request.
    pub fn on_response(mut self, f: impl FnOnce(&dyn Message) + Send + 'static) -> Self {
        self.on_response = Some(Box::new(f));
        self
    }

    /// Runs with the original message on timeout, drain, or (opt-in)
    /// transmit failure.
    pub fn on_error(mut self, f: impl FnOnce(&dyn Message) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    pub fn build(self) -> Arc<Request> {
        Arc::new(Request {
            message: ReentrantMutex::new(RefCell::new(self.message)),
            callbacks: Mutex::new(Callbacks {
                cancelled: false,
                on_response: self.on_response,
                on_error: self.on_error,
            }),
            timeout_ticks: self.timeout_ticks,
            elapsed_ticks: AtomicU32::new(0),
            wait_response: self.wait_response,
            destination: self.destination,
        })
    }
}
