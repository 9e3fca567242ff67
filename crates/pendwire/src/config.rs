// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Channel and transport configuration.
//!
//! Provides configuration types for the request engine:
//! - [`ChannelConfig`] - Worker cadence and failure policies
//! - [`DrainPolicy`] - Which pending requests are notified on teardown
//! - [`TransmitFailurePolicy`] - What happens when the transport rejects a send
//! - [`TcpConfig`] / [`UdpConfig`] - Concrete transport settings
//!
//! # Example
//!
//! ```
//! use pendwire::config::{ChannelConfig, DrainPolicy};
//! use std::time::Duration;
//!
//! let config = ChannelConfig::default()
//!     .with_grace_period(Duration::from_millis(50))
//!     .with_drain_policy(DrainPolicy::NotifyAll);
//! assert_eq!(config.sweep_interval, Duration::from_secs(1));
//! ```

use std::net::SocketAddr;
use std::time::Duration;

/// Delay between dequeue and transmit, leaving the caller a window to cancel.
pub const GRACE_PERIOD: Duration = Duration::from_millis(1000);

/// Cadence of the timeout sweeper (one tick per cycle).
pub const SWEEP_INTERVAL: Duration = Duration::from_millis(1000);

/// Default per-request timeout, in sweep ticks.
pub const DEFAULT_TIMEOUT_TICKS: u32 = 10;

/// Length header size (`u16` big-endian).
pub const FRAME_HEADER_SIZE: usize = 2;

/// Largest payload a frame header can describe.
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// Default thread name prefix for channel workers.
pub const DEFAULT_THREAD_PREFIX: &str = "pendwire";

/// Which pending requests receive a network-error completion at teardown.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DrainPolicy {
    /// Only the most recently queued request is notified: the last one in the
    /// outbound queue, or if that is empty the last one in flight. Every other
    /// pending request is dropped silently.
    #[default]
    NotifyMostRecent,
    /// Every pending request is notified, outbound first, in queue order.
    NotifyAll,
}

/// What the sender does when `Transport::transmit` reports failure.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TransmitFailurePolicy {
    /// Drop the request. No retry, no callback.
    #[default]
    Drop,
    /// Complete the request with a network error.
    NotifyNetworkError,
}

/// Request engine configuration.
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// Pre-transmit grace window
    pub grace_period: Duration,

    /// Sweep cycle length (timeout granularity)
    pub sweep_interval: Duration,

    /// Teardown notification policy
    pub drain_policy: DrainPolicy,

    /// Transmit failure policy
    pub transmit_failure_policy: TransmitFailurePolicy,

    /// Worker threads are named `<prefix>-sender`, `<prefix>-sweeper`, `<prefix>-listener`
    pub thread_name_prefix: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            grace_period: GRACE_PERIOD,
            sweep_interval: SWEEP_INTERVAL,
            drain_policy: DrainPolicy::default(),
            transmit_failure_policy: TransmitFailurePolicy::default(),
            thread_name_prefix: DEFAULT_THREAD_PREFIX.to_string(),
        }
    }
}

impl ChannelConfig {
    /// Build a configuration from defaults overridden by environment variables.
    ///
    /// - `PENDWIRE_GRACE_MS` - grace period in milliseconds
    /// - `PENDWIRE_SWEEP_MS` - sweep interval in milliseconds
    /// - `PENDWIRE_DRAIN_ALL=1` - notify every pending request on teardown
    /// - `PENDWIRE_FAIL_ON_TRANSMIT=1` - surface transmit failures as network errors
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(ms) = env_millis("PENDWIRE_GRACE_MS") {
            config.grace_period = ms;
        }
        if let Some(ms) = env_millis("PENDWIRE_SWEEP_MS") {
            config.sweep_interval = ms;
        }
        if env_flag("PENDWIRE_DRAIN_ALL") {
            config.drain_policy = DrainPolicy::NotifyAll;
        }
        if env_flag("PENDWIRE_FAIL_ON_TRANSMIT") {
            config.transmit_failure_policy = TransmitFailurePolicy::NotifyNetworkError;
        }

        log::debug!(
            "[config] grace={:?} sweep={:?} drain={:?} transmit_failure={:?}",
            config.grace_period,
            config.sweep_interval,
            config.drain_policy,
            config.transmit_failure_policy
        );
        config
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_sweep_interval(mut self, sweep_interval: Duration) -> Self {
        self.sweep_interval = sweep_interval;
        self
    }

    pub fn with_drain_policy(mut self, policy: DrainPolicy) -> Self {
        self.drain_policy = policy;
        self
    }

    pub fn with_transmit_failure_policy(mut self, policy: TransmitFailurePolicy) -> Self {
        self.transmit_failure_policy = policy;
        self
    }

    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(e) => {
            log::warn!("[config] ignoring {}={:?}: {}", key, raw, e);
            None
        }
    }
}

fn env_flag(key: &str) -> bool {
    std::env::var(key).map(|v| v == "1").unwrap_or(false)
}

/// TCP transport configuration.
#[derive(Clone, Debug)]
pub struct TcpConfig {
    /// Remote endpoint to connect to
    pub peer: SocketAddr,

    /// Connection timeout for `open()`
    pub connect_timeout: Duration,

    /// Upper bound on a single `receive_once()` while idle
    pub read_timeout: Duration,

    /// Upper bound on one `transmit()` against a peer that stopped reading
    pub write_timeout: Duration,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub nodelay: bool,
}

impl TcpConfig {
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            peer,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_millis(50),
            write_timeout: Duration::from_secs(2),
            nodelay: true,
        }
    }
}

/// UDP transport configuration.
#[derive(Clone, Debug)]
pub struct UdpConfig {
    /// Local bind address (port 0 = ephemeral)
    pub bind: SocketAddr,

    /// Default peer for queued sends
    pub peer: SocketAddr,

    /// Upper bound on a single `receive_once()` while idle
    pub read_timeout: Duration,

    /// SO_RCVBUF socket option (0 = OS default)
    pub recv_buffer_size: usize,
}

impl UdpConfig {
    pub fn new(peer: SocketAddr) -> Self {
        let bind = if peer.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        Self {
            bind,
            peer,
            read_timeout: Duration::from_millis(50),
            recv_buffer_size: 0,
        }
    }
}
