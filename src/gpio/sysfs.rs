// Licensed under the Apache-2.0 license

//! sysfs GPIO pins (`/sys/class/gpio`).

use crate::common::{Error, Result};
use crate::gpio::{InterruptPin, PinId};
use embedded_hal::digital::PinState;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

pub const DEFAULT_SYSFS_ROOT: &str = "/sys/class/gpio";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GpioConfig {
    pub sysfs_root: PathBuf,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from(DEFAULT_SYSFS_ROOT),
        }
    }
}

impl GpioConfig {
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_root: root.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PinDirection {
    In,
    Out,
}

impl PinDirection {
    fn as_str(self) -> &'static str {
        match self {
            PinDirection::In => "in",
            PinDirection::Out => "out",
        }
    }
}

/// Which transitions make the value file signal `POLLPRI`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Edge {
    None,
    Rising,
    Falling,
    Both,
}

impl Edge {
    fn as_str(self) -> &'static str {
        match self {
            Edge::None => "none",
            Edge::Rising => "rising",
            Edge::Falling => "falling",
            Edge::Both => "both",
        }
    }
}

/// An exported sysfs pin with its `value` file held open.
#[derive(Debug)]
pub struct SysfsPin {
    id: PinId,
    root: PathBuf,
    value: File,
}

impl SysfsPin {
    /// Export pin `id` if needed and open its value file.
    ///
    /// # Errors
    ///
    /// `Error::Sysfs` if exporting fails or the pin directory does not appear.
    pub fn open(id: PinId, config: &GpioConfig) -> Result<Self> {
        let root = config.sysfs_root.clone();
        let dir = pin_dir(&root, id);
        if !dir.is_dir() {
            log::debug!("gpio: exporting pin {id}");
            write_attr(&root.join("export"), &id.to_string())?;
        }
        let path = dir.join("value");
        let value = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| Error::Sysfs { path, source })?;
        Ok(Self { id, root, value })
    }

    #[must_use]
    pub fn id(&self) -> PinId {
        self.id
    }

    /// # Errors
    ///
    /// `Error::Sysfs` if the attribute cannot be written.
    pub fn set_direction(&self, direction: PinDirection) -> Result<()> {
        write_attr(&self.attr("direction"), direction.as_str())
    }

    /// # Errors
    ///
    /// `Error::Sysfs` if the attribute cannot be written.
    pub fn set_edge(&self, edge: Edge) -> Result<()> {
        write_attr(&self.attr("edge"), edge.as_str())
    }

    /// Current level, read from the start of the value file.
    ///
    /// # Errors
    ///
    /// `Error::Sysfs` on a failed read, `Error::InvalidLevel` for anything
    /// other than `0` or `1`.
    pub fn level(&self) -> Result<PinState> {
        let mut buf = [0u8; 4];
        let n = self
            .value
            .read_at(&mut buf, 0)
            .map_err(|source| self.value_error(source))?;
        let text = buf.get(..n).unwrap_or_default();
        match text.trim_ascii() {
            b"0" => Ok(PinState::Low),
            b"1" => Ok(PinState::High),
            other => Err(Error::InvalidLevel(
                String::from_utf8_lossy(other).into_owned(),
            )),
        }
    }

    /// # Errors
    ///
    /// `Error::Sysfs` on a failed write.
    pub fn set_level(&self, state: PinState) -> Result<()> {
        let text: &[u8] = match state {
            PinState::Low => b"0",
            PinState::High => b"1",
        };
        self.value
            .write_all_at(text, 0)
            .map_err(|source| self.value_error(source))
    }

    /// Close the value file and hand the pin back to the kernel.
    ///
    /// # Errors
    ///
    /// `Error::Sysfs` if `unexport` cannot be written.
    pub fn unexport(self) -> Result<()> {
        let Self { id, root, value } = self;
        drop(value);
        log::debug!("gpio: unexporting pin {id}");
        write_attr(&root.join("unexport"), &id.to_string())
    }

    fn attr(&self, name: &str) -> PathBuf {
        pin_dir(&self.root, self.id).join(name)
    }

    fn value_error(&self, source: io::Error) -> Error {
        Error::Sysfs {
            path: self.attr("value"),
            source,
        }
    }
}

fn pin_dir(root: &Path, id: PinId) -> PathBuf {
    root.join(format!("gpio{id}"))
}

fn write_attr(path: &Path, value: &str) -> Result<()> {
    fs::write(path, value).map_err(|source| Error::Sysfs {
        path: path.to_path_buf(),
        source,
    })
}

impl AsFd for SysfsPin {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.value.as_fd()
    }
}

impl InterruptPin for SysfsPin {
    fn pin_id(&self) -> PinId {
        self.id
    }
}

impl embedded_hal::digital::ErrorType for SysfsPin {
    type Error = Error;
}

impl embedded_hal::digital::InputPin for SysfsPin {
    fn is_high(&mut self) -> Result<bool> {
        Ok(self.level()? == PinState::High)
    }

    fn is_low(&mut self) -> Result<bool> {
        Ok(self.level()? == PinState::Low)
    }
}

impl embedded_hal::digital::OutputPin for SysfsPin {
    fn set_low(&mut self) -> Result<()> {
        self.set_level(PinState::Low)
    }

    fn set_high(&mut self) -> Result<()> {
        self.set_level(PinState::High)
    }
}
