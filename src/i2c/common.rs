// Licensed under the Apache-2.0 license

//! Configuration for the I2C bus driver.

use fugit::MillisDurationU32;
use std::path::{Path, PathBuf};

/// Settle time after each byte of `write_bytes`. Slow slave firmware drops or
/// misparses back-to-back single-byte writes without it.
pub const DEFAULT_INTER_BYTE_DELAY: MillisDurationU32 = MillisDurationU32::millis(20);

pub const DEFAULT_DEV_DIR: &str = "/dev";

#[derive(Clone, Debug, PartialEq)]
pub struct BusConfig {
    pub dev_dir: PathBuf,
    pub inter_byte_delay: MillisDurationU32,
}

impl Default for BusConfig {
    fn default() -> Self {
        BusConfigBuilder::new().build()
    }
}

impl BusConfig {
    #[must_use]
    pub fn builder() -> BusConfigBuilder {
        BusConfigBuilder::new()
    }

    /// `<dev_dir>/i2c-<bus>`
    #[must_use]
    pub fn device_path(&self, bus: u8) -> PathBuf {
        device_path(&self.dev_dir, bus)
    }
}

pub(crate) fn device_path(dev_dir: &Path, bus: u8) -> PathBuf {
    dev_dir.join(format!("i2c-{bus}"))
}

pub struct BusConfigBuilder {
    dev_dir: PathBuf,
    inter_byte_delay: MillisDurationU32,
}

impl Default for BusConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BusConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            dev_dir: PathBuf::from(DEFAULT_DEV_DIR),
            inter_byte_delay: DEFAULT_INTER_BYTE_DELAY,
        }
    }
    #[must_use]
    pub fn dev_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dev_dir = dir.into();
        self
    }
    #[must_use]
    pub fn inter_byte_delay(mut self, delay: MillisDurationU32) -> Self {
        self.inter_byte_delay = delay;
        self
    }
    #[must_use]
    pub fn build(self) -> BusConfig {
        BusConfig {
            dev_dir: self.dev_dir,
            inter_byte_delay: self.inter_byte_delay,
        }
    }
}
