// Licensed under the Apache-2.0 license

//! Transfer codec for the Linux i2c-dev ABI.
//!
//! Encodes the fixed-layout request structures the kernel expects for
//! `I2C_SMBUS` and `I2C_RDWR`. Everything here is pure data transformation;
//! the structures are `#[repr(C)]` with explicit padding so their byte image
//! can be checked against `include/uapi/linux/i2c.h` and `i2c-dev.h`.
//!
//! Descriptor pointers are stored as `usize` and computed at the moment a
//! request is submitted, from buffers the request borrows. A request value
//! therefore keeps its buffers alive for as long as the kernel may touch them.

use core::mem::size_of;
use embedded_hal::i2c::{Operation, SevenBitAddress};
use heapless::Vec;
use thiserror::Error;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// `ioctl` request: set the slave address for plain read/write.
pub const I2C_SLAVE: u16 = 0x0703;
/// `ioctl` request: combined read/write transfer.
pub const I2C_RDWR: u16 = 0x0707;
/// `ioctl` request: SMBus-level transfer.
pub const I2C_SMBUS: u16 = 0x0720;

/// `i2c_msg.flags`: this message reads from the slave.
pub const I2C_M_RD: u16 = 0x0001;

pub const I2C_SMBUS_READ: u8 = 1;
pub const I2C_SMBUS_WRITE: u8 = 0;
pub const I2C_SMBUS_I2C_BLOCK_DATA: u32 = 8;
pub const I2C_SMBUS_BLOCK_MAX: usize = 32;

/// Kernel limit on messages in one `I2C_RDWR` request.
pub const I2C_RDWR_IOCTL_MAX_MSGS: usize = 42;

/// Errors raised while building a request, before anything reaches the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("i2c: block payload of {len} bytes exceeds {max}")]
    PayloadTooLong { len: usize, max: usize },
    #[error("i2c: block read of zero bytes")]
    EmptyBlock,
    #[error("i2c: {count} messages exceed the transfer limit of {max}")]
    TooManyMessages { count: usize, max: usize },
    #[error("i2c: message of {len} bytes does not fit a single transfer")]
    MessageTooLong { len: usize },
}

/// `union i2c_smbus_data`. `block[0]` holds the length prefix.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct SmbusData {
    pub block: [u8; I2C_SMBUS_BLOCK_MAX + 2],
}

impl Default for SmbusData {
    fn default() -> Self {
        Self {
            block: [0; I2C_SMBUS_BLOCK_MAX + 2],
        }
    }
}

/// `struct i2c_smbus_ioctl_data`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct SmbusIoctlData {
    pub read_write: u8,
    pub command: u8,
    _pad: [u8; 2],
    pub size: u32,
    pub data: usize,
}

/// `struct i2c_msg`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct I2cMsg {
    pub addr: u16,
    pub flags: u16,
    pub len: u16,
    _pad: [u8; 2],
    pub buf: usize,
}

const RDWR_PAD: usize = size_of::<usize>() - size_of::<u32>();

/// `struct i2c_rdwr_ioctl_data`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct RdwrIoctlData {
    pub msgs: usize,
    pub nmsgs: u32,
    _pad: [u8; RDWR_PAD],
}

impl RdwrIoctlData {
    /// Descriptor for `msgs`. The slice must stay untouched until the request
    /// completes.
    #[must_use]
    pub fn new(msgs: &mut [I2cMsg]) -> Self {
        Self {
            msgs: msgs.as_mut_ptr() as usize,
            // Bounded by I2C_RDWR_IOCTL_MAX_MSGS.
            nmsgs: msgs.len() as u32,
            _pad: [0; RDWR_PAD],
        }
    }
}

/// Argument of the `I2C_SLAVE` request.
#[must_use]
pub fn slave_address_arg(address: SevenBitAddress) -> libc::c_int {
    libc::c_int::from(address)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// An SMBus I2C-block transfer (`I2C_SMBUS_I2C_BLOCK_DATA`) over a caller
/// provided data buffer.
#[derive(Debug)]
pub struct SmbusBlockTransfer<'a> {
    direction: Direction,
    command: u8,
    data: &'a mut SmbusData,
}

impl<'a> SmbusBlockTransfer<'a> {
    /// Block write of `payload` to `command`. The payload is length-prefixed.
    ///
    /// # Errors
    ///
    /// `CodecError::PayloadTooLong` if `payload` exceeds 32 bytes.
    pub fn write(command: u8, payload: &[u8], data: &'a mut SmbusData) -> Result<Self, CodecError> {
        let len = block_len(payload.len())?;
        *data = SmbusData::default();
        data.block[0] = len;
        data.block
            .get_mut(1..=payload.len())
            .ok_or(CodecError::PayloadTooLong {
                len: payload.len(),
                max: I2C_SMBUS_BLOCK_MAX,
            })?
            .copy_from_slice(payload);
        Ok(Self {
            direction: Direction::Write,
            command,
            data,
        })
    }

    /// Block read of `len` bytes from `command`.
    ///
    /// # Errors
    ///
    /// `CodecError::EmptyBlock` for zero, `CodecError::PayloadTooLong` above 32.
    pub fn read(command: u8, len: usize, data: &'a mut SmbusData) -> Result<Self, CodecError> {
        if len == 0 {
            return Err(CodecError::EmptyBlock);
        }
        let prefix = block_len(len)?;
        *data = SmbusData::default();
        data.block[0] = prefix;
        Ok(Self {
            direction: Direction::Read,
            command,
            data,
        })
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    #[must_use]
    pub fn command(&self) -> u8 {
        self.command
    }

    /// The bytes after the length prefix, as many as the prefix announces.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        let len = usize::from(self.data.block[0]).min(I2C_SMBUS_BLOCK_MAX);
        self.data.block.get(1..=len).unwrap_or(&[])
    }

    /// Mutable view of the payload, used by whoever fulfils a read.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        let len = usize::from(self.data.block[0]).min(I2C_SMBUS_BLOCK_MAX);
        self.data.block.get_mut(1..=len).unwrap_or(&mut [])
    }

    /// Kernel descriptor pointing at this transfer's data buffer.
    pub fn descriptor(&mut self) -> SmbusIoctlData {
        SmbusIoctlData {
            read_write: match self.direction {
                Direction::Read => I2C_SMBUS_READ,
                Direction::Write => I2C_SMBUS_WRITE,
            },
            command: self.command,
            _pad: [0; 2],
            size: I2C_SMBUS_I2C_BLOCK_DATA,
            data: core::ptr::from_mut::<SmbusData>(self.data) as usize,
        }
    }
}

fn block_len(len: usize) -> Result<u8, CodecError> {
    if len > I2C_SMBUS_BLOCK_MAX {
        return Err(CodecError::PayloadTooLong {
            len,
            max: I2C_SMBUS_BLOCK_MAX,
        });
    }
    // len <= 32
    Ok(len as u8)
}

/// A multi-message `I2C_RDWR` transfer: one message per operation, all to the
/// same slave, executed by the kernel as a single bus transaction with repeated
/// starts between messages.
#[derive(Debug)]
pub struct RdwrTransfer<'a, 'b> {
    address: SevenBitAddress,
    operations: &'a mut [Operation<'b>],
}

impl<'a, 'b> RdwrTransfer<'a, 'b> {
    /// # Errors
    ///
    /// `CodecError::TooManyMessages` beyond 42 operations,
    /// `CodecError::MessageTooLong` for a buffer longer than `u16::MAX`.
    pub fn new(
        address: SevenBitAddress,
        operations: &'a mut [Operation<'b>],
    ) -> Result<Self, CodecError> {
        if operations.len() > I2C_RDWR_IOCTL_MAX_MSGS {
            return Err(CodecError::TooManyMessages {
                count: operations.len(),
                max: I2C_RDWR_IOCTL_MAX_MSGS,
            });
        }
        for op in operations.iter() {
            let len = match op {
                Operation::Read(buf) => buf.len(),
                Operation::Write(buf) => buf.len(),
            };
            if u16::try_from(len).is_err() {
                return Err(CodecError::MessageTooLong { len });
            }
        }
        Ok(Self {
            address,
            operations,
        })
    }

    #[must_use]
    pub fn address(&self) -> SevenBitAddress {
        self.address
    }

    pub fn operations_mut(&mut self) -> &mut [Operation<'b>] {
        self.operations
    }

    /// Kernel messages pointing into this transfer's buffers. The returned
    /// messages are only valid while `self` stays mutably borrowed.
    pub fn messages(&mut self) -> Vec<I2cMsg, I2C_RDWR_IOCTL_MAX_MSGS> {
        let addr = u16::from(self.address);
        let mut msgs = Vec::new();
        for op in self.operations.iter_mut() {
            let (flags, len, buf) = match op {
                Operation::Read(buf) => (I2C_M_RD, buf.len(), buf.as_mut_ptr() as usize),
                Operation::Write(buf) => (0, buf.len(), buf.as_ptr() as usize),
            };
            let msg = I2cMsg {
                addr,
                flags,
                // Checked in new().
                len: len as u16,
                _pad: [0; 2],
                buf,
            };
            // Capacity checked in new().
            if msgs.push(msg).is_err() {
                break;
            }
        }
        msgs
    }
}
