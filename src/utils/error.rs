//! Error types used across the broker and its transports.
//!
//! Errors local to one connection or request ([`FrameError`]) are contained
//! there; errors that stop a listener from accepting new connections
//! ([`TransportError`]) are fatal to that transport's run loop and propagate
//! to the caller. Federation forward failures are logged where they happen
//! and never propagate.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Subscribe rejections from the engine. Returned to the caller, never fatal.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BrokerError {
    /// Adding this subscription would exceed the configured topic limit.
    #[error("new topics cannot be added")]
    TopicCapacity,
    /// The topic already holds the configured maximum of subscribers.
    #[error("new ids cannot be added")]
    SubscriberCapacity,
}

/// Failures while reading or writing one JSON frame. Terminates the single
/// connection it occurred on.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("connection error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed frame: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("connection closed mid-frame")]
    Truncated,
}

/// Failures that take down a whole transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("listener error: {0}")]
    Io(#[from] io::Error),
    #[error("server did not drain within {0:?}")]
    ShutdownTimeout(Duration),
}
