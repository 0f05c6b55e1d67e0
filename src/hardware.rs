// Licensed under the Apache-2.0 license

//! Process-level owner of the I2C buses and the interrupt dispatcher.
//!
//! Call sites receive a `&HardwareContext` instead of reaching for globals.
//! Buses are created once per index and shared. The dispatcher is created on
//! first use; its wait thread runs until the process exits.

use crate::common::Result;
use crate::gpio::{Dispatcher, DispatcherConfig, GpioConfig, PinId, SysfsPin};
use crate::i2c::{BusConfig, I2cBus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Everything the context needs to build its devices.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HardwareConfig {
    pub bus: BusConfig,
    pub dispatcher: DispatcherConfig,
    pub gpio: GpioConfig,
}

#[derive(Debug)]
pub struct HardwareContext {
    config: HardwareConfig,
    buses: Mutex<HashMap<u8, Arc<I2cBus>>>,
    dispatcher: Mutex<Option<Dispatcher>>,
}

impl Default for HardwareContext {
    fn default() -> Self {
        Self::new(HardwareConfig::default())
    }
}

impl HardwareContext {
    #[must_use]
    pub fn new(config: HardwareConfig) -> Self {
        Self {
            config,
            buses: Mutex::new(HashMap::new()),
            dispatcher: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn config(&self) -> &HardwareConfig {
        &self.config
    }

    /// The bus for `/dev/i2c-<index>`. Every call with the same index returns
    /// the same instance, so all users share one lock and one address cache.
    /// Nothing is opened until the first transfer.
    pub fn i2c_bus(&self, index: u8) -> Arc<I2cBus> {
        let mut buses = lock(&self.buses);
        Arc::clone(
            buses
                .entry(index)
                .or_insert_with(|| Arc::new(I2cBus::new(index, &self.config.bus))),
        )
    }

    /// The interrupt dispatcher, created on first call.
    ///
    /// # Panics
    ///
    /// If the dispatcher cannot be created. Interrupt-driven input is then
    /// impossible for the whole process; use
    /// [`try_dispatcher`](Self::try_dispatcher) to handle that instead.
    pub fn dispatcher(&self) -> Dispatcher {
        match self.try_dispatcher() {
            Ok(dispatcher) => dispatcher,
            Err(err) => {
                log::error!("{err}");
                panic!("{err}");
            }
        }
    }

    /// The interrupt dispatcher, created on first successful call. A failed
    /// creation is retried on the next call.
    ///
    /// # Errors
    ///
    /// `Error::DispatcherUnavailable` if creation fails.
    pub fn try_dispatcher(&self) -> Result<Dispatcher> {
        let mut slot = lock(&self.dispatcher);
        if let Some(dispatcher) = slot.as_ref() {
            return Ok(dispatcher.clone());
        }
        let dispatcher = Dispatcher::new(&self.config.dispatcher)?;
        *slot = Some(dispatcher.clone());
        Ok(dispatcher)
    }

    /// Open GPIO `id` under the configured sysfs root.
    ///
    /// # Errors
    ///
    /// As [`SysfsPin::open`].
    pub fn open_pin(&self, id: impl Into<PinId>) -> Result<SysfsPin> {
        SysfsPin::open(id.into(), &self.config.gpio)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
