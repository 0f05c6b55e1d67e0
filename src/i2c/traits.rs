// Licensed under the Apache-2.0 license

//! # I2C transport traits
//!
//! The bus driver never touches a file descriptor directly. It talks to an
//! [`I2cTransport`], the set of primitive requests an i2c-dev node accepts,
//! and obtains transports through a [`TransportOpener`] the first time a bus
//! is used.
//!
//! ```text
//! TransportOpener (bus index -> transport)
//!     └── I2cTransport
//!         ├── set_slave_address   I2C_SLAVE
//!         ├── read / write        plain read(2) / write(2)
//!         ├── smbus_transfer      I2C_SMBUS
//!         └── rdwr_transfer       I2C_RDWR
//! ```
//!
//! The production pair is [`LinuxI2cOpener`](crate::i2c::linux::LinuxI2cOpener)
//! and [`LinuxI2cDevice`](crate::i2c::linux::LinuxI2cDevice). Tests provide
//! their own.

use crate::common::Result;
use crate::i2c::codec::{RdwrTransfer, SmbusBlockTransfer};
use embedded_hal::i2c::{AddressMode, SevenBitAddress};
use std::io;

/// Primitive requests on one open i2c-dev node.
///
/// Implementations report kernel failures as `io::Error` and must not retry.
pub trait I2cTransport<A: AddressMode = SevenBitAddress>: Send {
    /// Program the slave address used by `read` and `write`.
    ///
    /// # Errors
    ///
    /// The kernel error of the addressing request.
    fn set_slave_address(&mut self, address: A) -> io::Result<()>;

    /// Raw read, no framing. Returns the number of bytes read.
    ///
    /// # Errors
    ///
    /// The kernel error of the read.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Raw write, no framing. Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// The kernel error of the write.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Submit one SMBus block request. On a read the transfer's payload is
    /// filled in place.
    ///
    /// # Errors
    ///
    /// The kernel error of the request.
    fn smbus_transfer(&mut self, transfer: &mut SmbusBlockTransfer<'_>) -> io::Result<()>;

    /// Submit all messages of `transfer` as one combined request.
    ///
    /// # Errors
    ///
    /// The kernel error of the request. No message is partially reported.
    fn rdwr_transfer(&mut self, transfer: &mut RdwrTransfer<'_, '_>) -> io::Result<()>;

    /// Release the underlying handle.
    ///
    /// # Errors
    ///
    /// The error reported by `close(2)`.
    fn close(self) -> io::Result<()>
    where
        Self: Sized;
}

/// Opens the transport for a bus index.
pub trait TransportOpener: Send + Sync {
    type Transport: I2cTransport;

    /// # Errors
    ///
    /// `Error::DeviceUnavailable` if the bus node is missing or inaccessible.
    fn open(&self, bus: u8) -> Result<Self::Transport>;
}
