// Licensed under the Apache-2.0 license

//! I2C bus access through the Linux `i2c-dev` interface.
//!
//! [`I2cBus`] is the driver applications use. It serializes every operation
//! on its bus and talks to the kernel through an [`I2cTransport`]; the host
//! implementation is [`linux::LinuxI2cDevice`]. Kernel request layouts live in
//! [`codec`].

pub mod codec;
pub mod common;
pub mod i2c_controller;
pub mod linux;
pub mod traits;

pub use common::{BusConfig, BusConfigBuilder};
pub use i2c_controller::I2cBus;
pub use traits::{I2cTransport, TransportOpener};
