//! # GPIO Edge Events
//!
//! Bridges OS-level GPIO edge notifications into a listener model. A native
//! [`PollingProvider`] watches one value file per source and blocks until the
//! kernel flags a change; the [`EdgeEventBridge`] runs the provider on a
//! background thread, decodes each change into an [`EdgeEvent`] and invokes
//! the listener registered for that source.
//!
//! Listeners run on the bridge thread. They should hand work off (see
//! [`channel_listener`]) rather than block, since a slow listener delays every
//! other source. A listener may register, deregister, stop or close its own
//! bridge; after a stop or close from a listener the worker exits as soon as
//! that listener returns.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use sbc_hal::gpio::{EdgeEvent, EdgeEventBridge, MockPollingProvider, SourceKey};
//!
//! let provider = Arc::new(MockPollingProvider::new());
//! let bridge = EdgeEventBridge::new(provider.clone());
//!
//! bridge
//!     .register(SourceKey(17), "/sys/class/gpio/gpio17/value", |event: EdgeEvent| {
//!         println!("{} -> {}", event.source, event.value);
//!     })
//!     .unwrap();
//!
//! provider.fire("/sys/class/gpio/gpio17/value", true);
//! bridge.close().unwrap();
//! ```

pub mod bridge;
#[cfg(target_os = "linux")]
pub mod epoll;
pub mod mock;
pub mod stream;
pub mod sysfs;

use std::fmt;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Instant, SystemTime};

use once_cell::sync::Lazy;

use crate::error::HalError;
use crate::util::logging::KeyedThrottle;

pub use bridge::{EdgeEventBridge, Subscription};
#[cfg(target_os = "linux")]
pub use epoll::{shared_bridge, EpollProvider};
pub use mock::MockPollingProvider;
pub use stream::{channel_listener, ChannelListener, EventReceiver};
pub use sysfs::{Direction, Edge, GpioInput, GpioInputOutput, GpioOutput, SysFsPin};

/// Identifies one watched source, normally the GPIO number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceKey(pub u32);

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gpio{}", self.0)
    }
}

impl From<u32> for SourceKey {
    fn from(gpio: u32) -> Self {
        SourceKey(gpio)
    }
}

/// One observed transition on a watched source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeEvent {
    pub source: SourceKey,
    /// Wall-clock time the provider saw the change.
    pub epoch_time: SystemTime,
    /// Monotonic time the bridge decoded the change.
    pub nano_time: Instant,
    /// Logical level after the change.
    pub value: bool,
}

impl EdgeEvent {
    pub fn new(source: SourceKey, epoch_time: SystemTime, value: bool) -> Self {
        Self {
            source,
            epoch_time,
            nano_time: Instant::now(),
            value,
        }
    }

    /// Milliseconds since the Unix epoch, 0 for clocks set before it.
    pub fn epoch_millis(&self) -> u128 {
        self.epoch_time
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0)
    }
}

static LISTENER_ERROR_THROTTLE: Lazy<Mutex<KeyedThrottle<SourceKey>>> =
    Lazy::new(|| Mutex::new(KeyedThrottle::new(1000, 5)));

/// Receives edge events for one registered source.
///
/// Both methods are called from the bridge thread.
pub trait EdgeListener: Send + Sync {
    fn on_event(&self, event: EdgeEvent);

    /// The provider failed for this source; its watch has been dropped.
    fn on_error(&self, source: SourceKey, error: &HalError) {
        let allowed = LISTENER_ERROR_THROTTLE
            .lock()
            .map(|mut throttles| throttles.allow(source))
            .unwrap_or(true);
        if allowed {
            log::warn!("Edge listener for {source} dropped: {error}");
        }
    }
}

impl<F> EdgeListener for F
where
    F: Fn(EdgeEvent) + Send + Sync,
{
    fn on_event(&self, event: EdgeEvent) {
        self(event)
    }
}

/// What a provider reports from its wait loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollNotification {
    /// The value file of `key` changed; `value` is the first byte read from it.
    Ready {
        key: SourceKey,
        epoch_time: SystemTime,
        value: u8,
    },
    /// Watching `key` failed; the provider has already dropped the watch.
    Error { key: SourceKey, reason: String },
}

/// Native polling capability: one watch per value file, a blocking wait loop.
pub trait PollingProvider: Send + Sync {
    /// Start watching `path`; readiness is reported under `key`.
    fn register_path(&self, path: &Path, key: SourceKey) -> Result<(), HalError>;

    /// Stop watching `path`. Unknown paths are ignored.
    fn deregister_path(&self, path: &Path) -> Result<(), HalError>;

    /// Block reporting readiness to `sink` until [`stop`](Self::stop) is called.
    fn process_events(&self, sink: &dyn Fn(PollNotification)) -> Result<(), HalError>;

    /// Make a running (or the next) `process_events` return.
    fn stop(&self);

    /// Release OS resources. Later registrations fail.
    fn close(&self) -> Result<(), HalError>;
}
