//! Busy-poll helper for driver-side timeouts.
//!
//! The core never times out a transaction. Drivers that must wait for a
//! status bit or a pin level poll a predicate until it holds or a monotonic
//! deadline passes, the same way a BUSY line is watched before issuing the
//! next radio command.

use std::thread;
use std::time::{Duration, Instant};

use crate::error::HalError;

/// Outcome of a bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The predicate held after the given elapsed time.
    Ready(Duration),
    /// The deadline passed first.
    TimedOut,
}

impl WaitOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, WaitOutcome::Ready(_))
    }
}

/// Poll `predicate` every `interval` until it returns `true` or `timeout`
/// elapses. Errors from the predicate abort the wait immediately.
///
/// A zero `interval` spins without sleeping, which is what pulse-width
/// measurements on an echo pin need.
pub fn wait_until<F>(timeout: Duration, interval: Duration, mut predicate: F) -> Result<WaitOutcome, HalError>
where
    F: FnMut() -> Result<bool, HalError>,
{
    let start = Instant::now();
    loop {
        if predicate()? {
            return Ok(WaitOutcome::Ready(start.elapsed()));
        }
        if start.elapsed() >= timeout {
            log::debug!("wait_until timed out after {:?}", timeout);
            return Ok(WaitOutcome::TimedOut);
        }
        if !interval.is_zero() {
            thread::sleep(interval);
        }
    }
}
