// Licensed under the Apache-2.0 license

//! Thin epoll and `fcntl` wrappers. The dispatcher's `unsafe` syscalls live
//! here.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

/// Interest flags for pin descriptors: edge-triggered, readable or priority.
pub(crate) const PIN_EVENTS: u32 = (libc::EPOLLIN | libc::EPOLLET | libc::EPOLLPRI) as u32;
pub(crate) const EPOLLPRI: u32 = libc::EPOLLPRI as u32;

pub(crate) type Event = libc::epoll_event;

pub(crate) fn empty_event() -> Event {
    libc::epoll_event { events: 0, u64: 0 }
}

fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

#[derive(Debug)]
pub(crate) struct Epoll {
    fd: OwnedFd,
}

impl Epoll {
    pub(crate) fn new() -> io::Result<Self> {
        // SAFETY: plain syscall, no pointers.
        let fd = cvt(unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) })?;
        // SAFETY: `fd` was just returned by the kernel and is owned by nobody else.
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    /// Watch `fd` for `events`; the descriptor itself is the event token.
    pub(crate) fn add(&self, fd: RawFd, events: u32) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events,
            // Descriptors are non-negative.
            u64: fd as u64,
        };
        // SAFETY: `event` is a valid epoll_event for the duration of the call.
        cvt(unsafe { libc::epoll_ctl(self.fd.as_raw_fd(), libc::EPOLL_CTL_ADD, fd, &mut event) })?;
        Ok(())
    }

    pub(crate) fn delete(&self, fd: RawFd) -> io::Result<()> {
        // Kernels before 2.6.9 require a non-null event for EPOLL_CTL_DEL.
        let mut event = empty_event();
        // SAFETY: as in `add`.
        cvt(unsafe { libc::epoll_ctl(self.fd.as_raw_fd(), libc::EPOLL_CTL_DEL, fd, &mut event) })?;
        Ok(())
    }

    /// Block until at least one watched descriptor is ready. No timeout.
    pub(crate) fn wait(&self, events: &mut [Event]) -> io::Result<usize> {
        let max = libc::c_int::try_from(events.len()).unwrap_or(libc::c_int::MAX);
        // SAFETY: the kernel writes at most `max` entries into `events`.
        let n = cvt(unsafe { libc::epoll_wait(self.fd.as_raw_fd(), events.as_mut_ptr(), max, -1) })?;
        // n >= 0 after cvt
        Ok(n as usize)
    }
}

/// File status flags of `fd` (`F_GETFL`).
pub(crate) fn status_flags(fd: RawFd) -> io::Result<libc::c_int> {
    // SAFETY: F_GETFL takes no pointers.
    cvt(unsafe { libc::fcntl(fd, libc::F_GETFL) })
}

pub(crate) fn set_status_flags(fd: RawFd, flags: libc::c_int) -> io::Result<()> {
    // SAFETY: F_SETFL takes no pointers.
    cvt(unsafe { libc::fcntl(fd, libc::F_SETFL, flags) })?;
    Ok(())
}

/// Set `O_NONBLOCK` on `fd`. Returns the flags it had before.
pub(crate) fn set_nonblocking(fd: RawFd) -> io::Result<libc::c_int> {
    let flags = status_flags(fd)?;
    set_status_flags(fd, flags | libc::O_NONBLOCK)?;
    Ok(flags)
}

#[cfg(test)]
pub(crate) fn is_nonblocking(fd: RawFd) -> bool {
    status_flags(fd).is_ok_and(|flags| flags & libc::O_NONBLOCK != 0)
}
