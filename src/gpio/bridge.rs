//! Edge-event bridge: runs a polling provider on a background thread and
//! dispatches decoded events to per-source listeners.
//!
//! Registration lifecycle per source key:
//!
//! ```text
//! UNREGISTERED --register--> REGISTERED --(event)*--> REGISTERED
//!      ^                         |
//!      +----deregister/error-----+
//! ```
//!
//! The worker thread is started lazily by the first registration and
//! restarted by a registration after [`EdgeEventBridge::stop`].
//!
//! Each worker runs under a generation number. `stop` retires the current
//! generation and wakes the provider; a worker only exits once its own
//! generation is retired, so a stop request that reaches the provider late
//! cannot end a newer worker. Called from a listener, `stop`, `close` and
//! `Drop` do not join (the caller *is* the worker); the loop ends as soon as
//! that listener returns.

use std::cell::Cell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crate::config::HalConfig;
use crate::constants::{DEFAULT_POLL_THREAD_NAME, HIGH_VALUE};
use crate::error::HalError;
use crate::gpio::{EdgeEvent, EdgeListener, PollNotification, PollingProvider, SourceKey};

thread_local! {
    /// Address of the bridge state whose worker runs on this thread, 0 elsewhere.
    static WORKER_OF: Cell<usize> = const { Cell::new(0) };
}

struct Registration {
    id: u64,
    path: PathBuf,
    listener: Arc<dyn EdgeListener>,
}

struct BridgeInner {
    provider: Arc<dyn PollingProvider>,
    registrations: Mutex<HashMap<SourceKey, Registration>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    /// Generation the live worker must have; bumped by every stop.
    generation: AtomicU64,
    /// Generation of the worker currently in its loop, 0 when none.
    running: AtomicU64,
}

impl BridgeInner {
    fn table(&self) -> MutexGuard<'_, HashMap<SourceKey, Registration>> {
        self.registrations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn on_worker_thread(self: &Arc<Self>) -> bool {
        WORKER_OF.with(|w| w.get()) == Arc::as_ptr(self) as usize
    }

    fn is_running(&self) -> bool {
        let running = self.running.load(Ordering::Acquire);
        running != 0 && running == self.generation.load(Ordering::Acquire)
    }

    /// Retire the current worker generation and wake the provider.
    fn retire(&self) {
        let retired = self.generation.fetch_add(1, Ordering::AcqRel);
        log::trace!("Retiring edge-event worker generation {retired}");
        self.provider.stop();
    }

    fn run(self: Arc<Self>, generation: u64) {
        WORKER_OF.with(|w| w.set(Arc::as_ptr(&self) as usize));
        log::debug!("Edge-event worker {generation} started");
        let sink = |notification: PollNotification| self.dispatch(notification);
        loop {
            match self.provider.process_events(&sink) {
                Ok(()) if self.generation.load(Ordering::Acquire) == generation => {
                    log::trace!("Ignoring stop aimed at an earlier edge-event worker");
                }
                Ok(()) => {
                    log::debug!("Edge-event worker {generation} stopped");
                    break;
                }
                Err(e) => {
                    log::error!("Edge-event worker {generation} failed: {e}");
                    break;
                }
            }
        }
        let _ = self
            .running
            .compare_exchange(generation, 0, Ordering::AcqRel, Ordering::Acquire);
        WORKER_OF.with(|w| w.set(0));
    }

    fn dispatch(&self, notification: PollNotification) {
        match notification {
            PollNotification::Ready {
                key,
                epoch_time,
                value,
            } => {
                // Clone out so the listener runs without the table lock.
                let listener = self.table().get(&key).map(|r| Arc::clone(&r.listener));
                match listener {
                    Some(listener) => {
                        listener.on_event(EdgeEvent::new(key, epoch_time, value == HIGH_VALUE))
                    }
                    None => log::trace!("Dropping event for unregistered {key}"),
                }
            }
            PollNotification::Error { key, reason } => {
                let removed = self.table().remove(&key);
                match removed {
                    Some(registration) => {
                        log::debug!(
                            "Watch on {} ({}) failed: {reason}",
                            key,
                            registration.path.display()
                        );
                        let error = HalError::PollingSource { key, reason };
                        registration.listener.on_error(key, &error);
                    }
                    None => log::trace!("Dropping error for unregistered {key}: {reason}"),
                }
            }
        }
    }

    /// Remove `key` if it is still owned by registration `id` (any id when `None`).
    fn deregister(&self, key: SourceKey, id: Option<u64>) -> Result<(), HalError> {
        let removed = {
            let mut table = self.table();
            match table.get(&key) {
                Some(r) if id.map_or(true, |id| id == r.id) => table.remove(&key),
                _ => None,
            }
        };
        match removed {
            Some(registration) => {
                log::debug!("Deregistered {key}");
                self.provider.deregister_path(&registration.path)
            }
            None => Ok(()),
        }
    }

    /// Undo registration `id` after the provider refused it, putting `previous` back.
    fn roll_back(&self, key: SourceKey, id: u64, previous: Option<Registration>) {
        let mut table = self.table();
        if table.get(&key).map_or(true, |r| r.id != id) {
            // A newer registration won the race; leave it alone.
            return;
        }
        match previous {
            Some(previous) => {
                table.insert(key, previous);
            }
            None => {
                table.remove(&key);
            }
        }
    }
}

/// Bridge between a [`PollingProvider`] and [`EdgeListener`]s.
///
/// At most one listener per [`SourceKey`]; registering a key again replaces
/// the previous listener. A failed re-registration leaves the previous one in
/// place.
pub struct EdgeEventBridge {
    inner: Arc<BridgeInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
    thread_name: String,
}

impl std::fmt::Debug for EdgeEventBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeEventBridge")
            .field("thread_name", &self.thread_name)
            .field("registered", &self.inner.table().len())
            .field("running", &self.is_running())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl EdgeEventBridge {
    /// Bridge over `provider` with the default worker thread name.
    pub fn new(provider: Arc<dyn PollingProvider>) -> Self {
        Self::with_thread_name(provider, DEFAULT_POLL_THREAD_NAME)
    }

    /// Bridge whose worker thread is named after `config.poll_thread_name`.
    pub fn with_config(provider: Arc<dyn PollingProvider>, config: &HalConfig) -> Self {
        Self::with_thread_name(provider, &config.poll_thread_name)
    }

    /// Bridge whose worker thread is named `thread_name`.
    pub fn with_thread_name(provider: Arc<dyn PollingProvider>, thread_name: &str) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                provider,
                registrations: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                generation: AtomicU64::new(1),
                running: AtomicU64::new(0),
            }),
            worker: Mutex::new(None),
            thread_name: thread_name.to_string(),
        }
    }

    fn worker(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Watch `path` and deliver its edge events for `key` to `listener`.
    pub fn register<L>(&self, key: SourceKey, path: impl AsRef<Path>, listener: L) -> Result<(), HalError>
    where
        L: EdgeListener + 'static,
    {
        self.register_shared(key, path.as_ref(), Arc::new(listener)).map(|_| ())
    }

    /// Like [`register`](Self::register), returning a guard that deregisters on drop.
    pub fn subscribe<L>(&self, key: SourceKey, path: impl AsRef<Path>, listener: L) -> Result<Subscription, HalError>
    where
        L: EdgeListener + 'static,
    {
        let id = self.register_shared(key, path.as_ref(), Arc::new(listener))?;
        Ok(Subscription {
            inner: Arc::clone(&self.inner),
            key,
            id,
            active: true,
        })
    }

    /// Register an already shared listener. Returns the registration id.
    ///
    /// If the provider refuses `path`, any previous registration for `key`
    /// stays in effect and the error is returned.
    pub fn register_shared(
        &self,
        key: SourceKey,
        path: &Path,
        listener: Arc<dyn EdgeListener>,
    ) -> Result<u64, HalError> {
        if self.is_closed() {
            return Err(HalError::ResourceClosed(format!(
                "edge-event bridge closed, cannot register {key}"
            )));
        }

        // In the table before the watch exists, so the first edge finds it.
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let previous = self.inner.table().insert(
            key,
            Registration {
                id,
                path: path.to_path_buf(),
                listener,
            },
        );

        if let Err(e) = self.inner.provider.register_path(path, key) {
            if let Some(previous) = previous.as_ref().filter(|p| p.path == path) {
                // The provider dropped the old watch on the same path first.
                if let Err(restore) = self.inner.provider.register_path(&previous.path, key) {
                    log::warn!("Failed to restore watch for {key}: {restore}");
                    self.inner.roll_back(key, id, None);
                    return Err(e);
                }
            }
            self.inner.roll_back(key, id, previous);
            return Err(e);
        }

        if let Some(previous) = previous {
            log::debug!("Replaced listener for {key}");
            if previous.path != path {
                if let Err(e) = self.inner.provider.deregister_path(&previous.path) {
                    log::warn!("Failed to drop previous watch for {key}: {e}");
                }
            }
        }
        log::debug!("Registered {key} on {}", path.display());

        self.ensure_worker()?;
        Ok(id)
    }

    /// Remove the listener for `key`. Unknown keys are ignored.
    pub fn deregister(&self, key: SourceKey) -> Result<(), HalError> {
        self.inner.deregister(key, None)
    }

    /// True while a listener is registered for `key`.
    pub fn is_registered(&self, key: SourceKey) -> bool {
        self.inner.table().contains_key(&key)
    }

    /// Registered keys in ascending order.
    pub fn registered_keys(&self) -> Vec<SourceKey> {
        let mut keys: Vec<_> = self.inner.table().keys().copied().collect();
        keys.sort();
        keys
    }

    /// True while a worker that has not been stopped is in its loop.
    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    /// True once [`close`](Self::close) has started.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn ensure_worker(&self) -> Result<(), HalError> {
        if self.inner.on_worker_thread() {
            // A listener registering more sources; the loop is already here.
            return Ok(());
        }
        let mut worker = self.worker();
        if self.inner.is_running() {
            return Ok(());
        }
        if let Some(retired) = worker.take() {
            // Already woken by `retire`; never let two loops share the provider.
            if retired.join().is_err() {
                log::error!("Edge-event worker panicked");
            }
        }

        let generation = self.inner.generation.load(Ordering::Acquire);
        self.inner.running.store(generation, Ordering::Release);
        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || inner.run(generation));
        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.inner.running.store(0, Ordering::Release);
                Err(e.into())
            }
        }
    }

    /// Stop the worker thread and wait for it. Registrations are kept; a
    /// later registration starts a new worker.
    ///
    /// From a listener this only requests the stop; the worker exits when the
    /// listener returns.
    pub fn stop(&self) {
        if self.inner.on_worker_thread() {
            self.inner.retire();
            return;
        }
        // Held across the join so no new worker starts while the old one drains.
        let mut worker = self.worker();
        if let Some(handle) = worker.take() {
            if !handle.is_finished() {
                self.inner.retire();
            }
            if handle.join().is_err() {
                log::error!("Edge-event worker panicked");
            }
        }
    }

    /// Stop the worker, drop every registration and release the provider.
    ///
    /// A listener may call this for its own bridge; teardown completes before
    /// it returns and the worker exits afterwards.
    pub fn close(&self) -> Result<(), HalError> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.stop();
        let registrations: Vec<_> = self.inner.table().drain().collect();
        for (key, registration) in registrations {
            if let Err(e) = self.inner.provider.deregister_path(&registration.path) {
                log::warn!("Failed to drop watch for {key}: {e}");
            }
        }
        self.inner.provider.close()
    }
}

impl Drop for EdgeEventBridge {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Error closing edge-event bridge: {e}");
        }
    }
}

/// Registration guard returned by [`EdgeEventBridge::subscribe`].
///
/// Cancelling (or dropping) only removes the registration it created; if the
/// key has since been registered again, the newer listener stays.
pub struct Subscription {
    inner: Arc<BridgeInner>,
    key: SourceKey,
    id: u64,
    active: bool,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("active", &self.active)
            .finish()
    }
}

impl Subscription {
    /// Source this subscription was made for.
    pub fn key(&self) -> SourceKey {
        self.key
    }

    /// Deregister now. Later calls (and drop) do nothing.
    pub fn cancel(&mut self) -> Result<(), HalError> {
        if !self.active {
            return Ok(());
        }
        self.active = false;
        self.inner.deregister(self.key, Some(self.id))
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Err(e) = self.cancel() {
            log::warn!("Error cancelling subscription for {}: {e}", self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::MockPollingProvider;
    use crate::util::wait::wait_until;
    use std::sync::mpsc;
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(2);

    fn bridge() -> (Arc<MockPollingProvider>, EdgeEventBridge) {
        let provider = Arc::new(MockPollingProvider::new());
        let bridge = EdgeEventBridge::with_thread_name(provider.clone(), "test-poll");
        (provider, bridge)
    }

    fn sender_listener(tx: mpsc::Sender<EdgeEvent>) -> impl EdgeListener + 'static {
        let tx = Mutex::new(tx);
        move |event: EdgeEvent| {
            let _ = tx.lock().unwrap().send(event);
        }
    }

    #[test]
    fn test_register_dispatches_events() {
        let (provider, bridge) = bridge();
        let (tx, rx) = mpsc::channel();
        bridge.register(SourceKey(17), "/gpio17/value", sender_listener(tx)).unwrap();
        assert!(bridge.is_running());

        provider.fire("/gpio17/value", true);
        provider.fire("/gpio17/value", false);

        let first = rx.recv_timeout(TIMEOUT).unwrap();
        let second = rx.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(first.source, SourceKey(17));
        assert!(first.value);
        assert!(!second.value);
        assert!(second.nano_time >= first.nano_time);
        bridge.close().unwrap();
    }

    #[test]
    fn test_replacing_listener() {
        let (provider, bridge) = bridge();
        let (old_tx, old_rx) = mpsc::channel();
        let (new_tx, new_rx) = mpsc::channel();
        bridge.register(SourceKey(5), "/gpio5/value", sender_listener(old_tx)).unwrap();
        bridge.register(SourceKey(5), "/gpio5/value", sender_listener(new_tx)).unwrap();

        provider.fire("/gpio5/value", true);
        assert!(new_rx.recv_timeout(TIMEOUT).unwrap().value);
        assert!(old_rx.try_recv().is_err());
        assert_eq!(bridge.registered_keys(), vec![SourceKey(5)]);
    }

    #[test]
    fn test_deregister_unknown_key_is_noop() {
        let (_provider, bridge) = bridge();
        bridge.deregister(SourceKey(99)).unwrap();
        assert!(!bridge.is_running());
    }

    #[test]
    fn test_stop_then_register_restarts_worker() {
        let (provider, bridge) = bridge();
        let (tx, rx) = mpsc::channel();
        bridge.register(SourceKey(1), "/gpio1/value", sender_listener(tx.clone())).unwrap();
        bridge.stop();
        assert!(!bridge.is_running());
        bridge.stop();

        bridge.register(SourceKey(2), "/gpio2/value", sender_listener(tx)).unwrap();
        assert!(bridge.is_running());
        provider.fire("/gpio1/value", true);
        assert_eq!(rx.recv_timeout(TIMEOUT).unwrap().source, SourceKey(1));
    }

    #[test]
    fn test_register_after_close() {
        let (_provider, bridge) = bridge();
        bridge.close().unwrap();
        bridge.close().unwrap();
        let result = bridge.register(SourceKey(3), "/gpio3/value", |_e: EdgeEvent| {});
        assert!(matches!(result, Err(HalError::ResourceClosed(_))));
    }

    #[test]
    fn test_subscription_cancel_keeps_newer_registration() {
        let (_provider, bridge) = bridge();
        let mut first = bridge.subscribe(SourceKey(8), "/gpio8/value", |_e: EdgeEvent| {}).unwrap();
        bridge.register(SourceKey(8), "/gpio8/value", |_e: EdgeEvent| {}).unwrap();
        first.cancel().unwrap();
        assert!(bridge.is_registered(SourceKey(8)));

        let second = bridge.subscribe(SourceKey(9), "/gpio9/value", |_e: EdgeEvent| {}).unwrap();
        drop(second);
        assert!(!bridge.is_registered(SourceKey(9)));
    }

    #[test]
    fn test_failed_reregistration_keeps_previous() {
        let (provider, bridge) = bridge();
        let (tx, rx) = mpsc::channel();
        bridge.register(SourceKey(5), "/good", sender_listener(tx)).unwrap();

        provider.reject("/bad");
        let result = bridge.register(SourceKey(5), "/bad", |_e: EdgeEvent| {});
        assert!(matches!(result, Err(HalError::Io(_))));
        assert!(bridge.is_registered(SourceKey(5)));
        assert!(provider.is_watched("/good"));

        provider.fire("/good", true);
        assert_eq!(rx.recv_timeout(TIMEOUT).unwrap().source, SourceKey(5));
        bridge.close().unwrap();
    }

    #[test]
    fn test_failed_first_registration_leaves_nothing() {
        let (provider, bridge) = bridge();
        provider.reject("/gpio7/value");
        assert!(bridge.register(SourceKey(7), "/gpio7/value", |_e: EdgeEvent| {}).is_err());
        assert!(!bridge.is_registered(SourceKey(7)));
        assert!(!bridge.is_running());
    }

    #[test]
    fn test_failed_same_path_reregistration_is_consistent() {
        let (provider, bridge) = bridge();
        bridge.register(SourceKey(7), "/gpio7/value", |_e: EdgeEvent| {}).unwrap();
        provider.reject("/gpio7/value");
        assert!(bridge.register(SourceKey(7), "/gpio7/value", |_e: EdgeEvent| {}).is_err());
        // The old watch cannot be restored either, so the key is gone everywhere.
        assert!(!bridge.is_registered(SourceKey(7)));
        assert!(!provider.is_watched("/gpio7/value"));
    }

    #[test]
    fn test_close_from_listener() {
        let (provider, bridge) = bridge();
        let bridge = Arc::new(bridge);
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let handle = Arc::clone(&bridge);
        bridge
            .register(SourceKey(6), "/gpio6/value", move |_e: EdgeEvent| {
                let _ = tx.lock().unwrap().send(handle.close().is_ok());
            })
            .unwrap();

        provider.fire("/gpio6/value", true);
        assert!(rx.recv_timeout(TIMEOUT).unwrap());
        assert!(bridge.is_closed());
        assert!(provider.is_closed());
        assert!(!bridge.is_registered(SourceKey(6)));
        assert!(!bridge.is_running());
        bridge.close().unwrap();
    }

    #[test]
    fn test_stop_from_listener_then_restart() {
        let (provider, bridge) = bridge();
        let bridge = Arc::new(bridge);
        let (tx, rx) = mpsc::channel();
        let handle = Arc::clone(&bridge);
        bridge
            .register(SourceKey(2), "/gpio2/value", move |_e: EdgeEvent| handle.stop())
            .unwrap();

        provider.fire("/gpio2/value", true);
        let stopped = wait_until(TIMEOUT, Duration::from_millis(5), || Ok(!bridge.is_running())).unwrap();
        assert!(stopped.is_ready());

        bridge.register(SourceKey(3), "/gpio3/value", sender_listener(tx)).unwrap();
        assert!(bridge.is_running());
        provider.fire("/gpio3/value", true);
        assert_eq!(rx.recv_timeout(TIMEOUT).unwrap().source, SourceKey(3));
        bridge.deregister(SourceKey(2)).unwrap();
        bridge.close().unwrap();
    }

    #[test]
    fn test_dropping_last_handle_in_listener() {
        let (provider, bridge) = bridge();
        let slot: Arc<Mutex<Option<Arc<EdgeEventBridge>>>> = Arc::new(Mutex::new(None));
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let listener_slot = Arc::clone(&slot);
        bridge
            .register(SourceKey(4), "/gpio4/value", move |_e: EdgeEvent| {
                let last = listener_slot.lock().unwrap().take();
                drop(last);
                let _ = tx.lock().unwrap().send(());
            })
            .unwrap();
        *slot.lock().unwrap() = Some(Arc::new(bridge));

        provider.fire("/gpio4/value", true);
        rx.recv_timeout(TIMEOUT).unwrap();
        assert!(provider.is_closed());
        assert_eq!(provider.watch_count(), 0);
    }

    #[test]
    fn test_stale_stop_does_not_end_new_worker() {
        let (provider, bridge) = bridge();
        provider.stop();
        let (tx, rx) = mpsc::channel();
        bridge.register(SourceKey(3), "/gpio3/value", sender_listener(tx)).unwrap();

        provider.fire("/gpio3/value", true);
        assert!(rx.recv_timeout(TIMEOUT).unwrap().value);
        assert!(bridge.is_running());
        bridge.close().unwrap();
    }

    #[test]
    fn test_concurrent_stop_and_register() {
        let (provider, bridge) = bridge();
        let bridge = Arc::new(bridge);
        let stopper = {
            let bridge = Arc::clone(&bridge);
            thread::spawn(move || {
                for _ in 0..50 {
                    bridge.stop();
                }
            })
        };
        for gpio in 0..50 {
            bridge
                .register(SourceKey(gpio), format!("/gpio{gpio}/value"), |_e: EdgeEvent| {})
                .unwrap();
        }
        stopper.join().unwrap();

        let (tx, rx) = mpsc::channel();
        bridge.register(SourceKey(99), "/gpio99/value", sender_listener(tx)).unwrap();
        provider.fire("/gpio99/value", true);
        assert_eq!(rx.recv_timeout(TIMEOUT).unwrap().source, SourceKey(99));
        bridge.close().unwrap();
    }
}
