//! # Logging Utilities
//!
//! Rate limiting for log messages that can repeat at interrupt frequency
//! (a GPIO whose value file keeps failing, a flapping bus) and hex dumps of
//! register transactions at trace level.
//!
//! ## Usage
//!
//! ```rust
//! use sbc_hal::util::logging::LogThrottle;
//!
//! let mut throttle = LogThrottle::new(1000, 5); // 5 messages per second
//! if throttle.allow() {
//!     log::warn!("value file read failed");
//! }
//! ```

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Instant;

/// Limits how many messages pass within a sliding time window.
#[derive(Debug)]
pub struct LogThrottle {
    window_ms: u64,
    cap: u32,
    count: u32,
    suppressed: u64,
    t0: Instant,
}

impl LogThrottle {
    /// Create a throttle allowing `cap` messages per `window_ms` milliseconds.
    pub fn new(window_ms: u64, cap: u32) -> Self {
        Self {
            window_ms,
            cap,
            count: 0,
            suppressed: 0,
            t0: Instant::now(),
        }
    }

    /// Returns `true` if the message should be logged.
    pub fn allow(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.t0).as_millis() as u64 > self.window_ms {
            self.t0 = now;
            self.count = 0;
        }

        self.count += 1;
        let allowed = self.count <= self.cap;
        if !allowed {
            self.suppressed += 1;
        }
        allowed
    }

    /// Number of messages dropped since creation or the last reset.
    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }

    /// Start a new window immediately.
    pub fn reset(&mut self) {
        self.t0 = Instant::now();
        self.count = 0;
        self.suppressed = 0;
    }
}

/// Independent throttles per key, e.g. one per watched GPIO.
#[derive(Debug)]
pub struct KeyedThrottle<K> {
    window_ms: u64,
    cap: u32,
    throttles: HashMap<K, LogThrottle>,
}

impl<K: Eq + Hash> KeyedThrottle<K> {
    pub fn new(window_ms: u64, cap: u32) -> Self {
        Self {
            window_ms,
            cap,
            throttles: HashMap::new(),
        }
    }

    pub fn allow(&mut self, key: K) -> bool {
        let (window_ms, cap) = (self.window_ms, self.cap);
        self.throttles
            .entry(key)
            .or_insert_with(|| LogThrottle::new(window_ms, cap))
            .allow()
    }

    /// Forget the throttle state for `key`.
    pub fn remove(&mut self, key: &K) {
        self.throttles.remove(key);
    }
}

/// Trace-level hex dump of one register transfer.
pub fn log_transfer_hex(direction: &str, register: u16, data: &[u8]) {
    const MAX_LOG_BYTES: usize = 32;

    if !log::log_enabled!(log::Level::Trace) {
        return;
    }
    let shown = &data[..data.len().min(MAX_LOG_BYTES)];
    let suffix = if data.len() > MAX_LOG_BYTES {
        format!(" ... ({} bytes total)", data.len())
    } else {
        String::new()
    };
    log::trace!(
        target: "sbc_hal::transfer",
        "{direction} reg 0x{register:04X}: {}{suffix}",
        hex::encode_upper(shown)
    );
}

/// Log a warning with throttling
#[macro_export]
macro_rules! log_warn_throttled {
    ($throttle:expr, $($arg:tt)*) => {
        if $throttle.allow() {
            log::warn!($($arg)*);
        }
    };
}
