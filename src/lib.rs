// Licensed under the Apache-2.0 license

//! Host-side device access for Linux boards: I2C buses through `i2c-dev` and
//! GPIO edge interrupts through sysfs and epoll.

// Production code must not panic on unwrap or out-of-bounds indexing.
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::indexing_slicing))]
#![cfg_attr(not(test), warn(clippy::expect_used))]
pub mod common;
pub mod gpio;
pub mod hardware;
pub mod i2c;

pub use common::{Error, Result, StdDelay};
pub use gpio::{Dispatcher, EdgeEvent, EdgeEvents, PinId, SysfsPin};
pub use hardware::{HardwareConfig, HardwareContext};
pub use i2c::{BusConfig, I2cBus};
