//! # Controller Error Handling
//!
//! This module defines the LoraError enum, which represents the different
//! failure modes of the LoRaWAN session and transmission controller.
//!
//! Protocol-level failures (join timeout, send timeout) are returned to the
//! caller and are always retryable on a later duty cycle; none of them is
//! escalated to a fatal condition.

use std::time::Duration;
use thiserror::Error;

/// Represents the different error types that can occur in the controller.
#[derive(Debug, Error)]
pub enum LoraError {
    /// No usable radio session is available. A normal cold-start condition,
    /// not a fault.
    #[error("no radio session available")]
    NoSession,

    /// The join wait budget was exhausted without network acceptance.
    #[error("join budget exhausted without network acceptance")]
    JoinTimeout,

    /// A send was attempted while a transmission was already outstanding.
    #[error("a transmission is already pending")]
    ChannelBusy,

    /// The transmission was not confirmed within the allotted window.
    /// The message is abandoned; delivery is at-most-once.
    #[error("transmission not confirmed within {0:?}")]
    SendTimeout(Duration),

    /// The network did not answer a time request; the caller keeps its
    /// prior clock source.
    #[error("network did not answer the time request")]
    TimeSyncUnavailable,

    /// Port outside the application range.
    #[error("port {0} is outside the application range 1-223")]
    InvalidPort(u8),

    /// A message was constructed without a payload.
    #[error("payload must not be empty")]
    EmptyPayload,

    /// Payload exceeds the MAC-engine ceiling. Rejected before any radio
    /// activity is attempted.
    #[error("payload of {len} bytes exceeds the {max} byte radio ceiling")]
    PayloadTooLarge { len: usize, max: usize },

    /// The non-volatile session holding area could not be read or written.
    #[error("session store error: {0}")]
    Store(String),

    /// The radio MAC engine rejected an operation.
    #[error("radio engine error: {0}")]
    Engine(String),

    /// The background radio task is no longer running.
    #[error("controller task is no longer running")]
    ControllerStopped,
}
