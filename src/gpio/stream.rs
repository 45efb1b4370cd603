//! Channel adapter: moves edge events off the bridge thread into a tokio
//! unbounded channel so async code can await them.
//!

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::error::HalError;
use crate::gpio::{EdgeEvent, EdgeListener, SourceKey};

type Item = Result<EdgeEvent, HalError>;

/// Listener half: forwards every event, and the error that ends a source,
/// into the channel.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<Item>,
}

impl EdgeListener for ChannelListener {
    fn on_event(&self, event: EdgeEvent) {
        if self.tx.send(Ok(event)).is_err() {
            log::trace!("Event receiver for {} dropped", event.source);
        }
    }

    fn on_error(&self, source: SourceKey, error: &HalError) {
        log::debug!("Edge events for {source} stopped: {error}");
        let forwarded = match error {
            HalError::PollingSource { key, reason } => HalError::PollingSource {
                key: *key,
                reason: reason.clone(),
            },
            other => HalError::PollingSource {
                key: source,
                reason: other.to_string(),
            },
        };
        if self.tx.send(Err(forwarded)).is_err() {
            log::warn!("Edge events for {source} stopped: {error}");
        }
    }
}

/// Receiver half of [`channel_listener`].
///
/// A polling failure arrives in order with the events as
/// [`HalError::PollingSource`]; no events follow it for that source.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<Item>,
}

impl EventReceiver {
    /// Next event or source error, or `None` once every listener clone has been dropped.
    pub async fn recv(&mut self) -> Option<Result<EdgeEvent, HalError>> {
        self.rx.recv().await
    }

    /// Next event within `wait`; `Ok(None)` on timeout.
    ///
    /// A forwarded polling failure is returned as `Err(PollingSource)`, a
    /// closed channel as `Err(ResourceClosed)`.
    pub async fn recv_event_timeout(&mut self, wait: Duration) -> Result<Option<EdgeEvent>, HalError> {
        match timeout(wait, self.rx.recv()).await {
            Ok(Some(item)) => item.map(Some),
            Ok(None) => Err(HalError::ResourceClosed("edge-event channel closed".into())),
            Err(_) => Ok(None),
        }
    }

    /// Blocking receive for code outside a runtime.
    pub fn blocking_recv(&mut self) -> Option<Result<EdgeEvent, HalError>> {
        self.rx.blocking_recv()
    }

    /// Next queued item without waiting.
    pub fn try_recv(&mut self) -> Option<Result<EdgeEvent, HalError>> {
        self.rx.try_recv().ok()
    }
}

/// Create a connected listener/receiver pair.
pub fn channel_listener() -> (ChannelListener, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelListener { tx }, EventReceiver { rx })
}
