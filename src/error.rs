//! # HAL Error Handling
//!
//! This module defines the HalError enum, which represents the different error
//! types that can occur in the sbc-hal crate. Every operation either completes
//! with a fully populated result or fails with one of these kinds; the core
//! never retries and never returns partial data as success.

use thiserror::Error;

use crate::gpio::SourceKey;

/// Represents the different error types that can occur in the HAL core.
#[derive(Debug, Error)]
pub enum HalError {
    /// The native transport rejected or failed a transaction (NACK, bus error,
    /// disconnected device, short read).
    #[error("Transport error: {0}")]
    Transport(String),

    /// A caller-supplied parameter is out of contract. Raised before any I/O.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The device handle has been closed.
    #[error("Resource closed: {0}")]
    ResourceClosed(String),

    /// The polling provider reported an error for one watched source.
    #[error("Polling error on {key}: {reason}")]
    PollingSource { key: SourceKey, reason: String },

    /// Underlying OS I/O failure outside of a bus transaction (sysfs files, epoll setup).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be loaded or is inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl HalError {
    /// Transport failure of `op`, keeping the driver's error text.
    pub fn transport(op: &str, cause: impl std::fmt::Display) -> Self {
        HalError::Transport(format!("{op}: {cause}"))
    }

    /// True if this error means the handle can no longer be used.
    pub fn is_closed(&self) -> bool {
        matches!(self, HalError::ResourceClosed(_))
    }
}
