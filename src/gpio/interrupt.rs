// Licensed under the Apache-2.0 license

//! Edge interrupt dispatcher.
//!
//! One [`Dispatcher`] owns one epoll instance and one wait thread. Pins are
//! registered with a handler; the wait thread blocks on the epoll set with no
//! timeout and runs the handler of each ready pin on itself, one after the
//! other. A slow handler delays every other pin, so handlers should be short
//! or hand the event to another thread. [`Dispatcher::subscribe`] does that
//! hand-off with a channel.
//!
//! Edge-triggered polling of a sysfs value file reports once right after the
//! descriptor is added, reflecting the current level rather than a
//! transition. The first delivery of every registration is therefore
//! swallowed; each later delivery invokes the handler exactly once.
//!
//! The dispatcher and its thread live until the process exits. There is no
//! shutdown.
//!
//! On targets without epoll the dispatcher is inert: registration calls
//! succeed and nothing is ever delivered. Callers poll the pin level instead.

use crate::gpio::PinId;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::time::{Duration, Instant};

#[cfg(target_os = "linux")]
pub use linux::Dispatcher;
#[cfg(not(target_os = "linux"))]
pub use inert::Dispatcher;

pub const DEFAULT_MAX_EVENTS: usize = 64;
pub const DEFAULT_THREAD_NAME: &str = "gpio-interrupts";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Ready descriptors collected per wait.
    pub max_events: usize,
    pub thread_name: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_events: DEFAULT_MAX_EVENTS,
            thread_name: DEFAULT_THREAD_NAME.to_owned(),
        }
    }
}

/// One delivered edge notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EdgeEvent {
    pub pin: PinId,
    /// The descriptor reported `EPOLLPRI`, which is how sysfs value files
    /// signal an edge.
    pub priority: bool,
    pub at: Instant,
}

#[cfg(target_os = "linux")]
type Handler = std::sync::Arc<dyn Fn(EdgeEvent) + Send + Sync>;

/// Events of one subscribed pin, delivered through a channel.
///
/// The stream ends once the pin is unregistered and every queued event has
/// been taken. On targets without epoll it is empty and already ended.
#[derive(Debug)]
pub struct EdgeEvents {
    pin: PinId,
    rx: Receiver<EdgeEvent>,
}

impl EdgeEvents {
    fn channel(pin: PinId) -> (mpsc::Sender<EdgeEvent>, Self) {
        let (tx, rx) = mpsc::channel();
        (tx, Self { pin, rx })
    }

    #[must_use]
    pub fn pin(&self) -> PinId {
        self.pin
    }

    /// Block until the next event. `None` once the stream has ended.
    #[must_use]
    pub fn recv(&self) -> Option<EdgeEvent> {
        self.rx.recv().ok()
    }

    /// Block up to `timeout`. `None` on timeout or end of stream.
    #[must_use]
    pub fn recv_timeout(&self, timeout: Duration) -> Option<EdgeEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Take a queued event without blocking.
    ///
    /// # Errors
    ///
    /// `nb::Error::WouldBlock` when nothing is queued,
    /// `nb::Error::Other(StreamEnded)` once the stream has ended.
    pub fn try_next(&self) -> nb::Result<EdgeEvent, StreamEnded> {
        match self.rx.try_recv() {
            Ok(event) => Ok(event),
            Err(TryRecvError::Empty) => Err(nb::Error::WouldBlock),
            Err(TryRecvError::Disconnected) => Err(nb::Error::Other(StreamEnded)),
        }
    }
}

impl Iterator for EdgeEvents {
    type Item = EdgeEvent;

    fn next(&mut self) -> Option<EdgeEvent> {
        self.recv()
    }
}

/// The pin behind an [`EdgeEvents`] stream is no longer registered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamEnded;

/// Shared surface of both dispatcher flavours.
macro_rules! subscribe_via_register {
    () => {
        /// Register `pin` and deliver its events through a channel instead
        /// of a handler. Handler rules apply: the first event is swallowed.
        ///
        /// # Errors
        ///
        /// As [`register`](Self::register).
        pub fn subscribe<P: InterruptPin + ?Sized>(&self, pin: &P) -> Result<EdgeEvents> {
            let (tx, events) = EdgeEvents::channel(pin.pin_id());
            self.register(pin, move |event| {
                // The receiver may be gone; the registration stays until
                // unregistered.
                let _ = tx.send(event);
            })?;
            Ok(events)
        }
    };
}

#[cfg(target_os = "linux")]
mod linux {
    use super::{DispatcherConfig, EdgeEvent, EdgeEvents, Handler};
    use crate::common::{Error, Result};
    use crate::gpio::epoll::{self, Epoll, Event, EPOLLPRI, PIN_EVENTS};
    use crate::gpio::{InterruptPin, PinId};
    use std::collections::HashMap;
    use std::io;
    use std::os::fd::{AsFd, AsRawFd, RawFd};
    use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
    use std::time::Instant;

    struct Registration {
        pin: PinId,
        /// The registration-time delivery has not arrived yet.
        awaiting_first: bool,
        /// Status flags of the descriptor before it was registered.
        flags: libc::c_int,
        handler: Handler,
    }

    struct Shared {
        epoll: Epoll,
        registrations: Mutex<HashMap<RawFd, Registration>>,
        /// Set once the wait thread has exited.
        stopped: OnceLock<io::Error>,
    }

    impl Shared {
        fn new() -> io::Result<Self> {
            Ok(Self {
                epoll: Epoll::new()?,
                registrations: Mutex::new(HashMap::new()),
                stopped: OnceLock::new(),
            })
        }

        fn table(&self) -> MutexGuard<'_, HashMap<RawFd, Registration>> {
            self.registrations
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
        }

        fn ensure_running(&self) -> Result<()> {
            match self.stopped.get() {
                Some(err) => Err(Error::DispatcherUnavailable(io::Error::new(
                    err.kind(),
                    format!("wait thread stopped: {err}"),
                ))),
                None => Ok(()),
            }
        }

        /// Advance the registration of `fd` by one delivery. Returns the
        /// handler to run, if any. The table lock is released before the
        /// handler runs so handlers may unregister.
        fn signal(&self, fd: RawFd) -> Option<(PinId, Handler)> {
            let mut table = self.table();
            let registration = table.get_mut(&fd)?;
            if registration.awaiting_first {
                registration.awaiting_first = false;
                log::trace!("gpio: swallowed initial event of pin {}", registration.pin);
                return None;
            }
            Some((registration.pin, Arc::clone(&registration.handler)))
        }
    }

    /// The kernel drops an epoll entry when the last descriptor of its file
    /// is closed. These errors mean the registered file is gone.
    fn is_stale(err: &io::Error) -> bool {
        matches!(err.raw_os_error(), Some(libc::ENOENT | libc::EBADF))
    }

    /// Edge interrupt dispatcher backed by epoll.
    #[derive(Clone)]
    pub struct Dispatcher {
        shared: Arc<Shared>,
    }

    impl core::fmt::Debug for Dispatcher {
        fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
            f.debug_struct("Dispatcher")
                .field("registered", &self.shared.table().len())
                .field("stopped", &self.shared.stopped.get().is_some())
                .finish()
        }
    }

    impl Dispatcher {
        /// Create the epoll instance and start the wait thread.
        ///
        /// # Errors
        ///
        /// `Error::DispatcherUnavailable` if epoll cannot be created or the
        /// thread cannot be spawned. Interrupt-driven input is impossible for
        /// the process in that case.
        pub fn new(config: &DispatcherConfig) -> Result<Self> {
            let shared = Arc::new(Shared::new().map_err(Error::DispatcherUnavailable)?);
            let worker = Arc::clone(&shared);
            let capacity = config.max_events.max(1);
            std::thread::Builder::new()
                .name(config.thread_name.clone())
                .spawn(move || wait_loop(&worker, capacity))
                .map_err(Error::DispatcherUnavailable)?;
            log::debug!("gpio: interrupt dispatcher started");
            Ok(Self { shared })
        }

        #[must_use]
        pub const fn is_supported() -> bool {
            true
        }

        /// Watch `pin` and run `handler` on the dispatcher thread for every
        /// edge after the first.
        ///
        /// A registration whose file was closed without `unregister` is
        /// replaced when its descriptor number is registered again.
        ///
        /// # Errors
        ///
        /// `Error::AlreadyRegistered` if the pin's descriptor is already
        /// watched (the existing handler is kept), `Error::Transport` if the
        /// descriptor cannot be made non-blocking or added to the epoll set,
        /// `Error::DispatcherUnavailable` if the wait thread has stopped.
        pub fn register<P, F>(&self, pin: &P, handler: F) -> Result<()>
        where
            P: InterruptPin + ?Sized,
            F: Fn(EdgeEvent) + Send + Sync + 'static,
        {
            self.shared.ensure_running()?;
            let fd = pin.as_fd().as_raw_fd();
            let id = pin.pin_id();
            let mut table = self.shared.table();

            let flags = epoll::set_nonblocking(fd)?;
            if let Err(err) = self.shared.epoll.add(fd, PIN_EVENTS) {
                let _ = epoll::set_status_flags(fd, flags);
                if err.raw_os_error() == Some(libc::EEXIST) && table.contains_key(&fd) {
                    return Err(Error::AlreadyRegistered(id));
                }
                return Err(err.into());
            }

            let registration = Registration {
                pin: id,
                awaiting_first: true,
                flags,
                handler: Arc::new(handler),
            };
            if let Some(stale) = table.insert(fd, registration) {
                log::debug!("gpio: fd {fd} of pin {} was closed while registered", stale.pin);
            }
            log::debug!("gpio: registered interrupt for pin {id} (fd {fd})");
            Ok(())
        }

        subscribe_via_register!();

        /// Stop watching `pin`, restore its original status flags and drop
        /// its handler. Unregistering a pin that is not registered succeeds.
        ///
        /// # Errors
        ///
        /// `Error::Transport` if the epoll removal or the flag restore fails;
        /// the registration is kept in that case.
        pub fn unregister<P: InterruptPin + ?Sized>(&self, pin: &P) -> Result<()> {
            let fd = pin.as_fd().as_raw_fd();
            let mut table = self.shared.table();
            let Some(registration) = table.get(&fd) else {
                return Ok(());
            };

            match self.shared.epoll.delete(fd) {
                Ok(()) => epoll::set_status_flags(fd, registration.flags)?,
                // `fd` now names another file; its flags are not ours.
                Err(err) if is_stale(&err) => {
                    log::debug!("gpio: dropping stale registration of pin {}", registration.pin);
                }
                Err(err) => return Err(err.into()),
            }
            table.remove(&fd);
            log::debug!("gpio: unregistered interrupt for pin {} (fd {fd})", pin.pin_id());
            Ok(())
        }

        /// Whether `pin`'s descriptor is currently watched.
        #[must_use]
        pub fn is_registered<P: InterruptPin + ?Sized>(&self, pin: &P) -> bool {
            self.shared.table().contains_key(&pin.as_fd().as_raw_fd())
        }
    }

    fn wait_loop(shared: &Shared, capacity: usize) {
        let mut events = vec![epoll::empty_event(); capacity];
        loop {
            let ready = match shared.epoll.wait(&mut events) {
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    log::error!("gpio: interrupt wait failed, dispatcher stopped: {err}");
                    let _ = shared.stopped.set(err);
                    return;
                }
            };
            for event in events.iter().take(ready) {
                dispatch(shared, event);
            }
        }
    }

    fn dispatch(shared: &Shared, event: &Event) {
        let token = event.u64;
        let flags = event.events;
        let Ok(fd) = RawFd::try_from(token) else {
            return;
        };
        if let Some((pin, handler)) = shared.signal(fd) {
            handler(EdgeEvent {
                pin,
                priority: flags & EPOLLPRI != 0,
                at: Instant::now(),
            });
        }
    }

}

#[cfg(not(target_os = "linux"))]
mod inert {
    use super::{DispatcherConfig, EdgeEvent, EdgeEvents};
    use crate::common::Result;
    use crate::gpio::InterruptPin;

    /// Placeholder dispatcher for targets without epoll. Every call succeeds
    /// and no event is ever delivered.
    #[derive(Clone, Debug, Default)]
    pub struct Dispatcher;

    impl Dispatcher {
        /// # Errors
        ///
        /// Never fails.
        pub fn new(_config: &DispatcherConfig) -> Result<Self> {
            Ok(Self)
        }

        #[must_use]
        pub const fn is_supported() -> bool {
            false
        }

        /// # Errors
        ///
        /// Never fails.
        pub fn register<P, F>(&self, _pin: &P, _handler: F) -> Result<()>
        where
            P: InterruptPin + ?Sized,
            F: Fn(EdgeEvent) + Send + Sync + 'static,
        {
            Ok(())
        }

        subscribe_via_register!();

        /// # Errors
        ///
        /// Never fails.
        pub fn unregister<P: InterruptPin + ?Sized>(&self, _pin: &P) -> Result<()> {
            Ok(())
        }

        #[must_use]
        pub fn is_registered<P: InterruptPin + ?Sized>(&self, _pin: &P) -> bool {
            false
        }
    }

}
