//! Integration tests for the edge-event bridge, driven by the scriptable
//! mock polling provider.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sbc_hal::config::HalConfig;
use sbc_hal::gpio::{
    channel_listener, Edge, EdgeEvent, EdgeEventBridge, EdgeListener, GpioInput, MockPollingProvider, SourceKey,
};
use sbc_hal::HalError;

const TIMEOUT: Duration = Duration::from_secs(2);

fn bridge() -> (Arc<MockPollingProvider>, EdgeEventBridge) {
    let provider = Arc::new(MockPollingProvider::new());
    let bridge = EdgeEventBridge::new(provider.clone());
    (provider, bridge)
}

/// Forwards events and errors to std channels for assertions.
struct Recorder {
    events: Mutex<mpsc::Sender<EdgeEvent>>,
    errors: Mutex<mpsc::Sender<(SourceKey, String)>>,
}

impl Recorder {
    #[allow(clippy::type_complexity)]
    fn new() -> (Self, mpsc::Receiver<EdgeEvent>, mpsc::Receiver<(SourceKey, String)>) {
        let (event_tx, event_rx) = mpsc::channel();
        let (error_tx, error_rx) = mpsc::channel();
        let recorder = Recorder {
            events: Mutex::new(event_tx),
            errors: Mutex::new(error_tx),
        };
        (recorder, event_rx, error_rx)
    }
}

impl EdgeListener for Recorder {
    fn on_event(&self, event: EdgeEvent) {
        let _ = self.events.lock().unwrap().send(event);
    }

    fn on_error(&self, source: SourceKey, error: &HalError) {
        let _ = self.errors.lock().unwrap().send((source, error.to_string()));
    }
}

/// Events on one source arrive in the order they were produced.
#[test]
fn test_per_source_fifo() {
    let (provider, bridge) = bridge();
    let (recorder, events, _errors) = Recorder::new();
    bridge.register(SourceKey(17), "/gpio17/value", recorder).unwrap();

    let levels = [true, false, true, true, false];
    for level in levels {
        provider.fire("/gpio17/value", level);
    }
    let seen: Vec<bool> = (0..levels.len())
        .map(|_| events.recv_timeout(TIMEOUT).unwrap().value)
        .collect();
    assert_eq!(seen, levels);
    bridge.close().unwrap();
}

/// Register followed immediately by deregister: the listener never runs.
#[test]
fn test_register_then_deregister_no_invocation() {
    let (provider, bridge) = bridge();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    bridge
        .register(SourceKey(5), "/gpio5/value", move |_event: EdgeEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    bridge.deregister(SourceKey(5)).unwrap();
    provider.fire("/gpio5/value", true);

    // A later event on another source proves the first one was processed.
    let (recorder, events, _errors) = Recorder::new();
    bridge.register(SourceKey(6), "/gpio6/value", recorder).unwrap();
    provider.fire("/gpio6/value", true);
    assert_eq!(events.recv_timeout(TIMEOUT).unwrap().source, SourceKey(6));

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!bridge.is_registered(SourceKey(5)));
}

/// A provider error on one source does not stop delivery on another.
#[test]
fn test_error_isolated_to_source() {
    let (provider, bridge) = bridge();
    let (recorder_a, events_a, errors_a) = Recorder::new();
    let (recorder_b, events_b, _errors_b) = Recorder::new();
    bridge.register(SourceKey(1), "/gpio1/value", recorder_a).unwrap();
    bridge.register(SourceKey(2), "/gpio2/value", recorder_b).unwrap();

    provider.fail("/gpio1/value", "value file vanished");
    provider.fire("/gpio1/value", true);
    provider.fire("/gpio2/value", true);

    let (key, message) = errors_a.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(key, SourceKey(1));
    assert_eq!(message, "Polling error on gpio1: value file vanished");

    let event = events_b.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(event.source, SourceKey(2));
    assert!(event.value);

    assert!(events_a.try_recv().is_err());
    assert!(!bridge.is_registered(SourceKey(1)));
    assert!(bridge.is_registered(SourceKey(2)));
    assert!(bridge.is_running());
}

/// A listener may deregister itself from inside the callback.
#[test]
fn test_listener_deregisters_itself() {
    let provider = Arc::new(MockPollingProvider::new());
    let bridge = Arc::new(EdgeEventBridge::new(provider.clone()));
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let weak = Arc::downgrade(&bridge);
    bridge
        .register(SourceKey(9), "/gpio9/value", move |event: EdgeEvent| {
            if let Some(bridge) = weak.upgrade() {
                bridge.deregister(event.source).unwrap();
            }
            let _ = tx.lock().unwrap().send(event);
        })
        .unwrap();

    provider.fire("/gpio9/value", true);
    provider.fire("/gpio9/value", false);
    assert!(rx.recv_timeout(TIMEOUT).unwrap().value);
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    assert!(!provider.is_watched("/gpio9/value"));
}

/// Non-'1' bytes decode as low.
#[test]
fn test_value_decoding() {
    let (provider, bridge) = bridge();
    let (recorder, events, _errors) = Recorder::new();
    bridge.register(SourceKey(3), "/gpio3/value", recorder).unwrap();
    provider.fire_raw("/gpio3/value", b'1');
    provider.fire_raw("/gpio3/value", b'0');
    provider.fire_raw("/gpio3/value", b'\n');
    let values: Vec<bool> = (0..3).map(|_| events.recv_timeout(TIMEOUT).unwrap().value).collect();
    assert_eq!(values, vec![true, false, false]);
}

#[test]
fn test_close_is_idempotent_and_final() {
    let (provider, bridge) = bridge();
    bridge.register(SourceKey(4), "/gpio4/value", |_e: EdgeEvent| {}).unwrap();
    bridge.close().unwrap();
    bridge.close().unwrap();

    assert!(bridge.is_closed());
    assert!(!bridge.is_running());
    assert!(provider.is_closed());
    assert_eq!(provider.watch_count(), 0);
    assert!(bridge
        .register(SourceKey(4), "/gpio4/value", |_e: EdgeEvent| {})
        .unwrap_err()
        .is_closed());
}

#[tokio::test]
async fn test_channel_listener_from_async() {
    let (provider, bridge) = bridge();
    let (listener, mut events) = channel_listener();
    bridge.register(SourceKey(22), "/gpio22/value", listener).unwrap();

    provider.fire("/gpio22/value", true);
    let event = events.recv_event_timeout(TIMEOUT).await.unwrap().unwrap();
    assert_eq!(event.source, SourceKey(22));
    assert!(event.epoch_millis() > 0);

    let idle = events.recv_event_timeout(Duration::from_millis(20)).await.unwrap();
    assert!(idle.is_none());
    bridge.close().unwrap();
}

/// A provider failure reaches the async consumer as a polling error.
#[tokio::test]
async fn test_channel_listener_sees_source_error() {
    let (provider, bridge) = bridge();
    let (listener, mut events) = channel_listener();
    bridge.register(SourceKey(23), "/gpio23/value", listener).unwrap();

    provider.fire("/gpio23/value", true);
    provider.fail("/gpio23/value", "value file vanished");
    assert!(events.recv_event_timeout(TIMEOUT).await.unwrap().unwrap().value);
    let err = events.recv_event_timeout(TIMEOUT).await.unwrap_err();
    assert!(matches!(err, HalError::PollingSource { key: SourceKey(23), .. }));
    assert!(!bridge.is_registered(SourceKey(23)));
    bridge.close().unwrap();
}

/// A sysfs input subscribes on its value file and unsubscribes on close.
#[test]
fn test_gpio_input_subscription_lifecycle() {
    let root = tempfile::tempdir().unwrap();
    let pin_dir = root.path().join("gpio12");
    std::fs::create_dir(&pin_dir).unwrap();
    for (name, content) in [("value", "0\n"), ("direction", "in"), ("edge", "none")] {
        std::fs::write(pin_dir.join(name), content).unwrap();
    }
    let config = HalConfig {
        gpio_sysfs_root: root.path().to_path_buf(),
        ..HalConfig::default()
    };

    let (provider, bridge) = bridge();
    let (recorder, events, _errors) = Recorder::new();
    let mut input = GpioInput::open(&config, 12, Edge::Rising).unwrap();
    input.subscribe_edges(&bridge, recorder).unwrap();

    let value_path = pin_dir.join("value");
    assert!(provider.is_watched(&value_path));
    provider.fire(&value_path, true);
    assert_eq!(events.recv_timeout(TIMEOUT).unwrap().source, SourceKey(12));

    input.close().unwrap();
    input.close().unwrap();
    assert!(!input.is_open());
    assert!(!provider.is_watched(&value_path));
    assert!(!bridge.is_registered(SourceKey(12)));
    assert!(input.value().unwrap_err().is_closed());
}
