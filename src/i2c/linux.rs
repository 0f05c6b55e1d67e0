// Licensed under the Apache-2.0 license

//! i2c-dev character device transport.
//!
//! The `unsafe` ioctl calls of the bus driver live here and nowhere else.
//! Every request structure comes from [`codec`](crate::i2c::codec) and is
//! built from buffers the caller keeps borrowed for the duration of the call.

use crate::common::{Error, Result};
use crate::i2c::codec::{
    self, RdwrIoctlData, RdwrTransfer, SmbusBlockTransfer, I2C_RDWR, I2C_SLAVE, I2C_SMBUS,
};
use crate::i2c::common::{device_path, BusConfig, DEFAULT_DEV_DIR};
use crate::i2c::traits::{I2cTransport, TransportOpener};
use embedded_hal::i2c::SevenBitAddress;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, IntoRawFd};
use std::path::PathBuf;

mod ioctl {
    use crate::i2c::codec::{RdwrIoctlData, SmbusIoctlData};

    nix::ioctl_write_int_bad!(i2c_slave, super::I2C_SLAVE);
    nix::ioctl_write_ptr_bad!(i2c_smbus, super::I2C_SMBUS, SmbusIoctlData);
    nix::ioctl_write_ptr_bad!(i2c_rdwr, super::I2C_RDWR, RdwrIoctlData);
}

/// An open `/dev/i2c-N` node.
#[derive(Debug)]
pub struct LinuxI2cDevice {
    file: File,
}

impl LinuxI2cDevice {
    /// Open `path` read/write.
    ///
    /// # Errors
    ///
    /// `Error::DeviceUnavailable` when the node is missing or not accessible.
    pub fn open(bus: u8, path: PathBuf) -> Result<Self> {
        match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => Ok(Self { file }),
            Err(source) => Err(Error::DeviceUnavailable { bus, path, source }),
        }
    }
}

impl I2cTransport for LinuxI2cDevice {
    fn set_slave_address(&mut self, address: SevenBitAddress) -> io::Result<()> {
        // SAFETY: I2C_SLAVE takes its argument by value.
        unsafe { ioctl::i2c_slave(self.file.as_raw_fd(), codec::slave_address_arg(address)) }?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn smbus_transfer(&mut self, transfer: &mut SmbusBlockTransfer<'_>) -> io::Result<()> {
        let request = transfer.descriptor();
        // SAFETY: `request.data` points at the transfer's SmbusData, which is
        // exclusively borrowed by `transfer` until this call returns.
        unsafe { ioctl::i2c_smbus(self.file.as_raw_fd(), &request) }?;
        Ok(())
    }

    fn rdwr_transfer(&mut self, transfer: &mut RdwrTransfer<'_, '_>) -> io::Result<()> {
        let mut msgs = transfer.messages();
        let request = RdwrIoctlData::new(&mut msgs);
        // SAFETY: every message buffer is borrowed through `transfer` and the
        // message array lives on this frame; both outlive the call.
        unsafe { ioctl::i2c_rdwr(self.file.as_raw_fd(), &request) }?;
        Ok(())
    }

    fn close(self) -> io::Result<()> {
        nix::unistd::close(self.file.into_raw_fd())?;
        Ok(())
    }
}

/// Opens `<dev_dir>/i2c-<bus>`.
#[derive(Clone, Debug)]
pub struct LinuxI2cOpener {
    dev_dir: PathBuf,
}

impl Default for LinuxI2cOpener {
    fn default() -> Self {
        Self::new(DEFAULT_DEV_DIR)
    }
}

impl LinuxI2cOpener {
    #[must_use]
    pub fn new(dev_dir: impl Into<PathBuf>) -> Self {
        Self {
            dev_dir: dev_dir.into(),
        }
    }
}

impl From<&BusConfig> for LinuxI2cOpener {
    fn from(config: &BusConfig) -> Self {
        Self::new(config.dev_dir.clone())
    }
}

impl TransportOpener for LinuxI2cOpener {
    type Transport = LinuxI2cDevice;

    fn open(&self, bus: u8) -> Result<LinuxI2cDevice> {
        LinuxI2cDevice::open(bus, device_path(&self.dev_dir, bus))
    }
}
