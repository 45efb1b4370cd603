//! Scriptable polling provider for tests
//!
//! Commands are queued on a tokio unbounded channel and consumed in order by
//! `process_events`, so a test sees exactly the sequence it scripted.
//! Commands for paths that are not watched when they are processed are
//! dropped, which is how the kernel behaves for a closed value file.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::SystemTime;

use tokio::sync::mpsc;

use crate::constants::{HIGH_VALUE, LOW_VALUE};
use crate::error::HalError;
use crate::gpio::{PollNotification, PollingProvider, SourceKey};

#[derive(Debug)]
enum Command {
    Fire { path: PathBuf, value: u8 },
    Fail { path: PathBuf, reason: String },
    Stop,
}

/// In-memory [`PollingProvider`].
#[derive(Debug)]
pub struct MockPollingProvider {
    tx: mpsc::UnboundedSender<Command>,
    rx: Mutex<mpsc::UnboundedReceiver<Command>>,
    watched: Mutex<HashMap<PathBuf, SourceKey>>,
    rejected: Mutex<HashSet<PathBuf>>,
    dispatched: AtomicUsize,
    closed: AtomicBool,
}

impl Default for MockPollingProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPollingProvider {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            watched: Mutex::new(HashMap::new()),
            rejected: Mutex::new(HashSet::new()),
            dispatched: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    fn send(&self, command: Command) {
        if self.tx.send(command).is_err() {
            log::warn!("Mock polling provider receiver dropped");
        }
    }

    /// Simulate the kernel flagging `path` with a new level.
    pub fn fire(&self, path: impl AsRef<Path>, value: bool) {
        self.fire_raw(path, if value { HIGH_VALUE } else { LOW_VALUE });
    }

    /// Simulate a change whose value file reads `value`.
    pub fn fire_raw(&self, path: impl AsRef<Path>, value: u8) {
        self.send(Command::Fire {
            path: path.as_ref().to_path_buf(),
            value,
        });
    }

    /// Simulate a provider failure on `path`; the watch is dropped.
    pub fn fail(&self, path: impl AsRef<Path>, reason: &str) {
        self.send(Command::Fail {
            path: path.as_ref().to_path_buf(),
            reason: reason.to_string(),
        });
    }

    /// Make later `register_path` calls for `path` fail, as for a value file
    /// that cannot be opened.
    pub fn reject(&self, path: impl AsRef<Path>) {
        self.rejected
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(path.as_ref().to_path_buf());
    }

    /// True while `path` is watched.
    pub fn is_watched(&self, path: impl AsRef<Path>) -> bool {
        self.lock_watched().contains_key(path.as_ref())
    }

    /// Number of watched paths.
    pub fn watch_count(&self) -> usize {
        self.lock_watched().len()
    }

    /// Notifications handed to the sink so far.
    pub fn dispatched(&self) -> usize {
        self.dispatched.load(Ordering::Acquire)
    }

    /// True once [`PollingProvider::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn lock_watched(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, SourceKey>> {
        self.watched.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PollingProvider for MockPollingProvider {
    fn register_path(&self, path: &Path, key: SourceKey) -> Result<(), HalError> {
        if self.is_closed() {
            return Err(HalError::ResourceClosed("mock polling provider closed".into()));
        }
        // Like epoll: an existing watch on the path is replaced, even on failure.
        let mut watched = self.lock_watched();
        watched.remove(path);
        let rejected = self
            .rejected
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(path);
        if rejected {
            return Err(HalError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} cannot be watched", path.display()),
            )));
        }
        watched.insert(path.to_path_buf(), key);
        Ok(())
    }

    fn deregister_path(&self, path: &Path) -> Result<(), HalError> {
        self.lock_watched().remove(path);
        Ok(())
    }

    fn process_events(&self, sink: &dyn Fn(PollNotification)) -> Result<(), HalError> {
        let mut rx = self
            .rx
            .lock()
            .map_err(|_| HalError::Transport("mock receiver poisoned".into()))?;
        while let Some(command) = rx.blocking_recv() {
            let notification = match command {
                Command::Stop => return Ok(()),
                Command::Fire { path, value } => {
                    let key = self.lock_watched().get(&path).copied();
                    key.map(|key| PollNotification::Ready {
                        key,
                        epoch_time: SystemTime::now(),
                        value,
                    })
                }
                Command::Fail { path, reason } => {
                    let key = self.lock_watched().remove(&path);
                    key.map(|key| PollNotification::Error { key, reason })
                }
            };
            if let Some(notification) = notification {
                self.dispatched.fetch_add(1, Ordering::AcqRel);
                sink(notification);
            }
        }
        Ok(())
    }

    fn stop(&self) {
        self.send(Command::Stop);
    }

    fn close(&self) -> Result<(), HalError> {
        self.closed.store(true, Ordering::Release);
        self.lock_watched().clear();
        Ok(())
    }
}
