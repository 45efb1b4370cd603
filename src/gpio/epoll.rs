//! epoll-backed polling provider for sysfs GPIO value files
//!
//! sysfs signals an edge on `gpioN/value` as `POLLPRI | POLLERR`, so every
//! watch is registered with `EPOLLPRI | EPOLLERR` and the value is re-read
//! with a positioned read at offset 0. An eventfd registered alongside the
//! watches wakes the wait loop for [`PollingProvider::stop`].

use std::collections::HashMap;
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::os::unix::fs::FileExt;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use nix::errno::Errno;
use once_cell::sync::OnceCell;

use crate::constants::{DEFAULT_POLL_THREAD_NAME, MAX_POLL_EVENTS};
use crate::error::HalError;
use crate::gpio::{EdgeEventBridge, PollNotification, PollingProvider, SourceKey};

const WATCH_EVENTS: u32 = (libc::EPOLLPRI | libc::EPOLLERR) as u32;

#[derive(Debug)]
struct Watch {
    key: SourceKey,
    path: PathBuf,
    file: File,
}

/// Linux epoll provider.
///
/// [`close`](PollingProvider::close) drops every watch and refuses new ones;
/// the epoll instance and the wake-up eventfd stay open until the provider
/// itself is dropped.
#[derive(Debug)]
pub struct EpollProvider {
    epoll: OwnedFd,
    wake: File,
    watches: Mutex<HashMap<RawFd, Watch>>,
    stopping: AtomicBool,
    closed: AtomicBool,
}

fn epoll_ctl(epfd: RawFd, op: libc::c_int, fd: RawFd, events: u32) -> Result<(), Errno> {
    let mut event = libc::epoll_event {
        events,
        u64: fd as u64,
    };
    // SAFETY: `event` outlives the call; the kernel copies it.
    Errno::result(unsafe { libc::epoll_ctl(epfd, op, fd, &mut event) }).map(drop)
}

fn read_value(file: &File) -> std::io::Result<u8> {
    let mut buf = [0u8; 1];
    match file.read_at(&mut buf, 0)? {
        0 => Err(std::io::Error::new(ErrorKind::UnexpectedEof, "empty value file")),
        _ => Ok(buf[0]),
    }
}

impl EpollProvider {
    pub fn new() -> Result<Self, HalError> {
        // SAFETY: plain syscalls; on success the returned fds are owned here.
        let epfd = Errno::result(unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) })
            .map_err(std::io::Error::from)?;
        let epoll = unsafe { OwnedFd::from_raw_fd(epfd) };

        let efd = Errno::result(unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) })
            .map_err(std::io::Error::from)?;
        let wake = File::from(unsafe { OwnedFd::from_raw_fd(efd) });

        epoll_ctl(epoll.as_raw_fd(), libc::EPOLL_CTL_ADD, wake.as_raw_fd(), libc::EPOLLIN as u32)
            .map_err(std::io::Error::from)?;

        log::debug!("epoll provider created (epfd {epfd}, eventfd {efd})");
        Ok(Self {
            epoll,
            wake,
            watches: Mutex::new(HashMap::new()),
            stopping: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    fn watches(&self) -> MutexGuard<'_, HashMap<RawFd, Watch>> {
        self.watches.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of value files currently watched.
    pub fn watch_count(&self) -> usize {
        self.watches().len()
    }

    fn remove_watch(&self, watches: &mut HashMap<RawFd, Watch>, fd: RawFd) -> Option<Watch> {
        let watch = watches.remove(&fd)?;
        if let Err(errno) = epoll_ctl(self.epoll.as_raw_fd(), libc::EPOLL_CTL_DEL, fd, 0) {
            log::debug!("EPOLL_CTL_DEL for {} failed: {}", watch.path.display(), errno.desc());
        }
        Some(watch)
    }

    fn drain_wake(&self) {
        let mut buf = [0u8; 8];
        match (&self.wake).read(&mut buf) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => log::warn!("eventfd read failed: {e}"),
        }
    }

    /// Decode every ready watch. Runs under the watch lock; the sink is not called here.
    fn collect(&self, events: &[libc::epoll_event]) -> Vec<PollNotification> {
        let mut watches = self.watches();
        let mut out = Vec::with_capacity(events.len());
        for event in events {
            let fd = event.u64 as RawFd;
            let flags = event.events;
            let Some(watch) = watches.get(&fd) else {
                continue;
            };
            let key = watch.key;
            if flags & libc::EPOLLHUP as u32 != 0 {
                self.remove_watch(&mut watches, fd);
                out.push(PollNotification::Error {
                    key,
                    reason: "value file hung up".to_string(),
                });
                continue;
            }
            match read_value(&watch.file) {
                Ok(value) => out.push(PollNotification::Ready {
                    key,
                    epoch_time: SystemTime::now(),
                    value,
                }),
                Err(e) => {
                    self.remove_watch(&mut watches, fd);
                    out.push(PollNotification::Error {
                        key,
                        reason: format!("read failed: {e}"),
                    });
                }
            }
        }
        out
    }
}

impl PollingProvider for EpollProvider {
    fn register_path(&self, path: &Path, key: SourceKey) -> Result<(), HalError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(HalError::ResourceClosed("epoll provider closed".into()));
        }
        self.deregister_path(path)?;

        let file = File::open(path)?;
        // Consume the current state so the first wake-up is a real edge.
        let initial = read_value(&file)?;
        let fd = file.as_raw_fd();
        epoll_ctl(self.epoll.as_raw_fd(), libc::EPOLL_CTL_ADD, fd, WATCH_EVENTS)
            .map_err(|errno| {
                HalError::Io(std::io::Error::new(
                    std::io::Error::from(errno).kind(),
                    format!("cannot watch {}: {}", path.display(), errno.desc()),
                ))
            })?;

        log::debug!(
            "Watching {} as {key} (fd {fd}, initial {:?})",
            path.display(),
            initial as char
        );
        self.watches().insert(
            fd,
            Watch {
                key,
                path: path.to_path_buf(),
                file,
            },
        );
        Ok(())
    }

    fn deregister_path(&self, path: &Path) -> Result<(), HalError> {
        let mut watches = self.watches();
        let fd = watches
            .iter()
            .find(|(_, watch)| watch.path == path)
            .map(|(fd, _)| *fd);
        if let Some(fd) = fd {
            if let Some(watch) = self.remove_watch(&mut watches, fd) {
                log::debug!("Stopped watching {} ({})", watch.path.display(), watch.key);
            }
        }
        Ok(())
    }

    fn process_events(&self, sink: &dyn Fn(PollNotification)) -> Result<(), HalError> {
        let mut events = [libc::epoll_event { events: 0, u64: 0 }; MAX_POLL_EVENTS];
        let wake_fd = self.wake.as_raw_fd();
        loop {
            if self.stopping.swap(false, Ordering::AcqRel) {
                return Ok(());
            }

            // SAFETY: `events` is valid for MAX_POLL_EVENTS entries.
            let n = unsafe {
                libc::epoll_wait(
                    self.epoll.as_raw_fd(),
                    events.as_mut_ptr(),
                    MAX_POLL_EVENTS as libc::c_int,
                    -1,
                )
            };
            let n = match Errno::result(n) {
                Ok(n) => n as usize,
                Err(Errno::EINTR) => continue,
                Err(errno) => return Err(HalError::Io(errno.into())),
            };

            let ready = &events[..n];
            if ready.iter().any(|e| e.u64 as RawFd == wake_fd) {
                self.drain_wake();
            }
            let watched: Vec<_> = ready
                .iter()
                .copied()
                .filter(|e| e.u64 as RawFd != wake_fd)
                .collect();
            for notification in self.collect(&watched) {
                sink(notification);
            }
        }
    }

    fn stop(&self) {
        self.stopping.store(true, Ordering::Release);
        if let Err(e) = (&self.wake).write(&1u64.to_ne_bytes()) {
            log::warn!("eventfd write failed: {e}");
        }
    }

    fn close(&self) -> Result<(), HalError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut watches = self.watches();
        let fds: Vec<_> = watches.keys().copied().collect();
        for fd in fds {
            self.remove_watch(&mut watches, fd);
        }
        log::debug!("epoll provider closed");
        Ok(())
    }
}

static SHARED_BRIDGE: OnceCell<EdgeEventBridge> = OnceCell::new();

/// Process-wide bridge over an [`EpollProvider`], created on first use.
///
/// Closing it is final for the whole process: every later registration
/// fails with `ResourceClosed`. Components sharing it should deregister
/// their own sources (or drop their [`Subscription`](crate::gpio::Subscription))
/// and leave the bridge open.
pub fn shared_bridge() -> Result<&'static EdgeEventBridge, HalError> {
    SHARED_BRIDGE.get_or_try_init(|| {
        let provider = EpollProvider::new()?;
        log::info!("Shared edge-event bridge initialized");
        Ok(EdgeEventBridge::with_thread_name(
            Arc::new(provider),
            DEFAULT_POLL_THREAD_NAME,
        ))
    })
}
