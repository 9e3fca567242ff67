// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # pendwire - pending requests over a wire
//!
//! Asynchronous request/response correlation above a raw duplex byte
//! transport. A caller submits a [`Request`] carrying a [`Message`]; the
//! channel frames and transmits it after a short grace window, then matches
//! inbound frames back to it. Exactly one outcome reaches the caller: a
//! decoded response, a network error (timeout, teardown), or nothing at all
//! if the request was cancelled.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pendwire::completion::completion_queue;
//! use pendwire::config::TcpConfig;
//! use pendwire::transport::TcpTransport;
//! use pendwire::{Channel, ChannelConfig, Request, StampedMessage};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! fn main() -> pendwire::Result<()> {
//!     let peer = std::net::SocketAddr::from(([127, 0, 0, 1], 7400));
//!     let transport = TcpTransport::new(TcpConfig::new(peer));
//!     let (completions, pump) = completion_queue();
//!     let channel = Channel::new(Arc::new(transport), Arc::new(completions), ChannelConfig::from_env());
//!     channel.initialize()?;
//!
//!     channel.submit(
//!         Request::builder(StampedMessage::new("status?"))
//!             .timeout_ticks(5)
//!             .on_response(|msg| println!("reply: {:?}", msg.downcast_ref::<StampedMessage>()))
//!             .on_error(|_| println!("no reply"))
//!             .build(),
//!     );
//!
//!     // Callbacks run on this thread
//!     pump.run_for(Duration::from_secs(10));
//!     channel.tear_down();
//!     Ok(())
//! }
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Channel`] | Lifecycle, submission, worker threads |
//! | [`Request`] | Message + cancellation + timeout + callbacks |
//! | [`Message`] | Encode / decode / match capability |
//! | [`Transport`] | Duplex byte transport (TCP, UDP, in-memory) |
//! | [`CompletionSink`] | Where completion callbacks execute |
//!
//! ## Wire Format
//!
//! Every frame is a 2-byte big-endian length followed by exactly that many
//! payload bytes (see [`frame`]).

/// Channel configuration, policies and constants.
pub mod config;
/// Error types.
pub mod error;
/// Length-prefix framing.
pub mod frame;
/// Message capability and the stamped reference message.
pub mod message;
/// Requests and their builder.
pub mod request;
/// Completion outcomes and sinks.
pub mod completion;
/// Outbound queue and in-flight registry.
pub mod registry;
/// Byte transports.
pub mod transport;
/// The request/response channel and its worker loops.
pub mod channel;

pub use channel::{Channel, ChannelMetrics, MetricsSnapshot, PushHandler};
pub use completion::{completion_queue, CompletionSink, InlineCompletions, Outcome};
pub use config::{ChannelConfig, DrainPolicy, TransmitFailurePolicy};
pub use error::{ChannelError, Result};
pub use message::{Message, StampedMessage};
pub use request::{Request, RequestBuilder};
pub use transport::Transport;
