// Licensed under the Apache-2.0 license

//! GPIO pins and edge interrupt dispatch.
//!
//! Pins are exposed through sysfs ([`sysfs::SysfsPin`]); their value file is
//! the poll-able descriptor the [`interrupt::Dispatcher`] watches.

#[cfg(target_os = "linux")]
mod epoll;
pub mod interrupt;
pub mod sysfs;

pub use interrupt::{Dispatcher, DispatcherConfig, EdgeEvent, EdgeEvents};
pub use sysfs::{Edge, GpioConfig, PinDirection, SysfsPin};

use core::fmt;
use std::os::fd::AsFd;

/// GPIO line number, as used by the kernel's sysfs interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PinId(pub u32);

impl fmt::Display for PinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for PinId {
    fn from(n: u32) -> Self {
        Self(n)
    }
}

/// A pin that can be handed to the interrupt dispatcher.
///
/// The descriptor must support `O_NONBLOCK` and report value changes through
/// `poll(2)`, as a sysfs `value` file does once an edge is configured.
pub trait InterruptPin: AsFd {
    fn pin_id(&self) -> PinId;
}
