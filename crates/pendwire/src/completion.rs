// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Completion delivery.
//!
//! Workers never invoke caller callbacks themselves when the caller needs a
//! specific execution context. They hand the finished request to a
//! [`CompletionSink`], which decides where [`Request::complete`] runs:
//!
//! - [`InlineCompletions`] - on the worker thread that finished the request
//! - [`completion_queue`] - posted to a queue that an owner thread pumps
//!
//! # Example
//!
//! ```
//! use pendwire::completion::{completion_queue, CompletionSink, Outcome};
//! use pendwire::{Request, StampedMessage};
//! use std::time::Duration;
//!
//! let (queue, pump) = completion_queue();
//! let request = Request::builder(StampedMessage::new("ping"))
//!     .on_error(|_| println!("timed out"))
//!     .build();
//!
//! // Worker side
//! queue.deliver(Outcome::NetworkError, request);
//!
//! // Owner thread: the callback runs here
//! assert_eq!(pump.run_for(Duration::from_millis(10)), 1);
//! ```

use crate::request::Request;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Terminal outcome of a request that reached the in-flight registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// A matching inbound frame was decoded into the message
    Response,
    /// Timeout, teardown drain, or (opt-in) transmit failure
    NetworkError,
}

/// Receives finished requests from the channel workers.
pub trait CompletionSink: Send + Sync {
    /// Hand off `request` with its `outcome`. Called once per completion.
    fn deliver(&self, outcome: Outcome, request: Arc<Request>);
}

/// Completes requests directly on the delivering worker thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineCompletions;

impl CompletionSink for InlineCompletions {
    fn deliver(&self, outcome: Outcome, request: Arc<Request>) {
        request.complete(outcome);
    }
}

/// Sink half of [`completion_queue`]. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CompletionQueue {
    tx: Sender<(Outcome, Arc<Request>)>,
}

impl CompletionSink for CompletionQueue {
    fn deliver(&self, outcome: Outcome, request: Arc<Request>) {
        if self.tx.send((outcome, request)).is_err() {
            log::debug!("[completion] pump dropped, discarding {:?} completion", outcome);
        }
    }
}

/// Owner-thread half of [`completion_queue`]: callbacks run where this is pumped.
#[derive(Debug)]
pub struct CompletionPump {
    rx: Receiver<(Outcome, Arc<Request>)>,
}

impl CompletionPump {
    /// Run every completion already queued. Returns how many were processed.
    pub fn run_pending(&self) -> usize {
        let mut count = 0;
        for (outcome, request) in self.rx.try_iter() {
            request.complete(outcome);
            count += 1;
        }
        count
    }

    /// Process completions as they arrive until `timeout` elapses.
    pub fn run_for(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut count = 0;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok((outcome, request)) => {
                    request.complete(outcome);
                    count += 1;
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return count;
                }
            }
        }
    }

    /// Completions waiting to be pumped.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Create a queue-backed sink and the pump that drains it.
pub fn completion_queue() -> (CompletionQueue, CompletionPump) {
    let (tx, rx) = channel::unbounded();
    (CompletionQueue { tx }, CompletionPump { rx })
}
