// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for channel operations.
//!
//! Only setup and the synchronous send path return errors. Failures inside the
//! worker loops (rejected transmits, malformed frames) are absorbed, counted in
//! [`crate::ChannelMetrics`] and logged.

use std::fmt;

/// Result type for channel operations
pub type Result<T> = std::result::Result<T, ChannelError>;

/// Errors surfaced by the channel API
#[derive(Debug)]
pub enum ChannelError {
    /// I/O error with underlying cause
    Io(std::io::Error),

    /// Payload does not fit a 2-byte length header
    FrameTooLarge { len: usize },

    /// Transport rejected the bytes
    TransmitFailed,

    /// Operation not offered by this transport
    Unsupported(&'static str),

    /// Request carries no destination host/port
    MissingDestination,

    /// Channel has not been initialized
    NotInitialized,

    /// A worker thread tried to restart the channel it is being stopped with
    TearingDown,

    /// Worker thread could not be spawned
    ThreadSpawn(String),
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::FrameTooLarge { len } => write!(
                f,
                "payload of {} bytes exceeds the {} byte frame limit",
                len,
                crate::config::MAX_PAYLOAD_SIZE
            ),
            Self::TransmitFailed => write!(f, "transport rejected transmit"),
            Self::Unsupported(what) => write!(f, "unsupported by transport: {}", what),
            Self::MissingDestination => write!(f, "request has no destination"),
            Self::NotInitialized => write!(f, "channel not initialized"),
            Self::TearingDown => write!(f, "channel is tearing down"),
            Self::ThreadSpawn(msg) => write!(f, "failed to spawn worker thread: {}", msg),
        }
    }
}

impl std::error::Error for ChannelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ChannelError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
