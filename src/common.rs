// Licensed under the Apache-2.0 license

//! Crate-wide error type and the host delay provider.

use crate::gpio::PinId;
use crate::i2c::codec::CodecError;
use embedded_hal::delay::DelayNs;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by the bus driver, the pins and the interrupt dispatcher.
///
/// Transport failures carry the kernel error untouched. Nothing in this crate
/// retries; that decision belongs to the caller.
#[derive(Debug, Error)]
pub enum Error {
    /// The bus device node is missing or cannot be opened.
    #[error("i2c: bus {bus} unavailable at {}: {source}", path.display())]
    DeviceUnavailable {
        bus: u8,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A syscall on an open bus failed.
    #[error("i2c: transfer failed: {0}")]
    Transport(#[from] io::Error),

    /// The syscall succeeded but moved a different number of bytes than the
    /// protocol requires.
    #[error("i2c: unexpected number ({actual}) of bytes {op}, expected {expected}")]
    UnexpectedCount {
        op: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("pin {0} interrupt already registered")]
    AlreadyRegistered(PinId),

    #[error("gpio: {}: {source}", path.display())]
    Sysfs {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("gpio: unexpected pin value {0:?}")]
    InvalidLevel(String),

    /// The event multiplexer could not be created. Interrupt-driven input
    /// cannot work for the rest of the process.
    #[error("interrupt dispatcher unavailable: {0}")]
    DispatcherUnavailable(#[source] io::Error),
}

pub type Result<T> = core::result::Result<T, Error>;

impl Error {
    fn os_error(&self) -> Option<i32> {
        match self {
            Error::Transport(err) => err.raw_os_error(),
            _ => None,
        }
    }
}

impl embedded_hal::i2c::Error for Error {
    fn kind(&self) -> embedded_hal::i2c::ErrorKind {
        use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};

        // Documentation/i2c/fault-codes.rst
        match self.os_error() {
            Some(libc::ENXIO) => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Unknown),
            #[cfg(target_os = "linux")]
            Some(libc::EREMOTEIO) => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Unknown),
            Some(libc::EAGAIN) => ErrorKind::ArbitrationLoss,
            _ => ErrorKind::Other,
        }
    }
}

impl embedded_hal::digital::Error for Error {
    fn kind(&self) -> embedded_hal::digital::ErrorKind {
        embedded_hal::digital::ErrorKind::Other
    }
}

/// `DelayNs` backed by `std::thread::sleep`.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdDelay;

impl DelayNs for StdDelay {
    fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(Duration::from_nanos(u64::from(ns)));
    }

    fn delay_ms(&mut self, ms: u32) {
        std::thread::sleep(Duration::from_millis(u64::from(ms)));
    }
}
