// Licensed under the Apache-2.0 license

//! Serialized I2C bus driver.
//!
//! [`I2cBus`] owns the transport of one bus index. Every public operation
//! takes the bus lock for its whole duration: opening the node, programming
//! the slave address, the transfer syscall and any inter-byte delay all happen
//! under the same acquisition. Two calls on one bus therefore never
//! interleave, and a register select can never be separated from its data
//! phase by another caller's address change. The lock is held across blocking
//! syscalls on purpose; callers that need a time bound must impose it from
//! outside.

use crate::common::{Error, Result, StdDelay};
use crate::i2c::codec::{RdwrTransfer, SmbusBlockTransfer, SmbusData};
use crate::i2c::common::BusConfig;
use crate::i2c::linux::LinuxI2cOpener;
use crate::i2c::traits::{I2cTransport, TransportOpener};
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{Operation, SevenBitAddress};
use fugit::MillisDurationU32;
use std::sync::{Mutex, MutexGuard, PoisonError};

struct BusState<T, D> {
    transport: Option<T>,
    /// Address last programmed with `I2C_SLAVE` on the open transport.
    address: Option<SevenBitAddress>,
    delay: D,
}

pub struct I2cBus<O: TransportOpener = LinuxI2cOpener, D: DelayNs = StdDelay> {
    index: u8,
    opener: O,
    inter_byte_delay: MillisDurationU32,
    state: Mutex<BusState<O::Transport, D>>,
}

impl<O: TransportOpener, D: DelayNs> core::fmt::Debug for I2cBus<O, D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("I2cBus")
            .field("index", &self.index)
            .field("inter_byte_delay", &self.inter_byte_delay)
            .finish_non_exhaustive()
    }
}

impl I2cBus {
    /// Bus `index` on the host's `/dev/i2c-*` nodes, using `config`.
    #[must_use]
    pub fn new(index: u8, config: &BusConfig) -> Self {
        Self::with_opener(index, config, LinuxI2cOpener::from(config), StdDelay)
    }
}

impl<O: TransportOpener, D: DelayNs> I2cBus<O, D> {
    /// Bus `index` whose transport comes from `opener`. Nothing is opened
    /// until the first operation.
    pub fn with_opener(index: u8, config: &BusConfig, opener: O, delay: D) -> Self {
        Self {
            index,
            opener,
            inter_byte_delay: config.inter_byte_delay,
            state: Mutex::new(BusState {
                transport: None,
                address: None,
                delay,
            }),
        }
    }

    #[must_use]
    pub fn index(&self) -> u8 {
        self.index
    }

    /// Open the device node now rather than on first use. Idempotent.
    ///
    /// # Errors
    ///
    /// `Error::DeviceUnavailable` if the node is missing or inaccessible.
    pub fn open(&self) -> Result<()> {
        let mut state = self.lock();
        self.ensure_open(&mut state)?;
        Ok(())
    }

    /// Read one unframed byte from `addr`.
    ///
    /// # Errors
    ///
    /// `Error::Transport` on a failed read, `Error::UnexpectedCount` if the
    /// read did not return exactly one byte.
    pub fn read_byte(&self, addr: SevenBitAddress) -> Result<u8> {
        let mut state = self.lock();
        let transport = self.select(&mut state, addr)?;
        let mut buf = [0u8; 1];
        let n = transport.read(&mut buf)?;
        expect_count("read in read_byte", 1, n)?;
        Ok(buf[0])
    }

    /// Write one unframed byte to `addr`.
    ///
    /// # Errors
    ///
    /// `Error::Transport` on a failed write, `Error::UnexpectedCount` if the
    /// write did not accept exactly one byte.
    pub fn write_byte(&self, addr: SevenBitAddress, value: u8) -> Result<()> {
        let mut state = self.lock();
        let transport = self.select(&mut state, addr)?;
        let n = transport.write(&[value])?;
        expect_count("written in write_byte", 1, n)
    }

    /// Write `bytes` to `addr` one byte at a time, waiting the configured
    /// inter-byte delay after each byte. Stops at the first failure.
    ///
    /// # Errors
    ///
    /// As [`write_byte`](Self::write_byte), for the first byte that fails.
    pub fn write_bytes(&self, addr: SevenBitAddress, bytes: &[u8]) -> Result<()> {
        let mut state = self.lock();
        self.select(&mut state, addr)?;
        let BusState {
            transport, delay, ..
        } = &mut *state;
        let Some(transport) = transport.as_mut() else {
            return Err(not_open());
        };
        for byte in bytes {
            let n = transport.write(core::slice::from_ref(byte))?;
            expect_count("written in write_bytes", 1, n)?;
            delay.delay_ms(self.inter_byte_delay.to_millis());
        }
        Ok(())
    }

    /// SMBus I2C-block write: `command` followed by the length-prefixed
    /// `data`, submitted as one kernel request.
    ///
    /// # Errors
    ///
    /// `Error::Codec` if `data` exceeds 32 bytes, `Error::Transport` if the
    /// kernel rejects the request.
    pub fn write(&self, addr: SevenBitAddress, command: u8, data: &[u8]) -> Result<()> {
        let mut block = SmbusData::default();
        let mut transfer = SmbusBlockTransfer::write(command, data, &mut block)?;
        let mut state = self.lock();
        let transport = self.select(&mut state, addr)?;
        transport.smbus_transfer(&mut transfer)?;
        Ok(())
    }

    /// SMBus I2C-block read of `buf.len()` bytes from `command`.
    ///
    /// # Errors
    ///
    /// `Error::Codec` for an empty or oversize `buf`, `Error::Transport` if
    /// the kernel rejects the request.
    pub fn read_block(&self, addr: SevenBitAddress, command: u8, buf: &mut [u8]) -> Result<()> {
        let mut block = SmbusData::default();
        let mut transfer = SmbusBlockTransfer::read(command, buf.len(), &mut block)?;
        {
            let mut state = self.lock();
            let transport = self.select(&mut state, addr)?;
            transport.smbus_transfer(&mut transfer)?;
        }
        let payload = transfer.payload();
        expect_count("read in read_block", buf.len(), payload.len())?;
        buf.copy_from_slice(payload);
        Ok(())
    }

    /// Execute `operations` against `addr` as one combined transfer.
    ///
    /// # Errors
    ///
    /// `Error::Codec` if the operations cannot be encoded,
    /// `Error::Transport` if the kernel rejects the request.
    pub fn transaction(
        &self,
        addr: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<()> {
        let mut transfer = RdwrTransfer::new(addr, operations)?;
        let mut state = self.lock();
        let transport = self.select(&mut state, addr)?;
        transport.rdwr_transfer(&mut transfer)?;
        Ok(())
    }

    /// Select `reg` and read `buf.len()` bytes from it in one transfer.
    ///
    /// # Errors
    ///
    /// As [`transaction`](Self::transaction).
    pub fn read_from_reg(&self, addr: SevenBitAddress, reg: u8, buf: &mut [u8]) -> Result<()> {
        let select = [reg];
        self.transaction(addr, &mut [Operation::Write(&select), Operation::Read(buf)])
    }

    /// Write `data` to `reg` in one transfer.
    ///
    /// # Errors
    ///
    /// As [`transaction`](Self::transaction).
    pub fn write_to_reg(&self, addr: SevenBitAddress, reg: u8, data: &[u8]) -> Result<()> {
        let mut out = Vec::with_capacity(data.len() + 1);
        out.push(reg);
        out.extend_from_slice(data);
        self.transaction(addr, &mut [Operation::Write(&out)])
    }

    /// # Errors
    ///
    /// As [`read_from_reg`](Self::read_from_reg).
    pub fn read_byte_from_reg(&self, addr: SevenBitAddress, reg: u8) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_from_reg(addr, reg, &mut buf)?;
        Ok(buf[0])
    }

    /// Read a big-endian word from `reg`.
    ///
    /// # Errors
    ///
    /// As [`read_from_reg`](Self::read_from_reg).
    pub fn read_word_from_reg(&self, addr: SevenBitAddress, reg: u8) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_from_reg(addr, reg, &mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    /// # Errors
    ///
    /// As [`write_to_reg`](Self::write_to_reg).
    pub fn write_byte_to_reg(&self, addr: SevenBitAddress, reg: u8, value: u8) -> Result<()> {
        self.write_to_reg(addr, reg, &[value])
    }

    /// Write `value` to `reg`, most significant byte first.
    ///
    /// # Errors
    ///
    /// As [`write_to_reg`](Self::write_to_reg).
    pub fn write_word_to_reg(&self, addr: SevenBitAddress, reg: u8, value: u16) -> Result<()> {
        self.write_to_reg(addr, reg, &value.to_be_bytes())
    }

    /// Release the device node if it was opened. Closing a bus that was never
    /// opened, or closing twice, succeeds without touching the OS. The next
    /// operation reopens the node.
    ///
    /// # Errors
    ///
    /// `Error::Transport` with the error reported by `close(2)`.
    pub fn close(&self) -> Result<()> {
        let mut state = self.lock();
        state.address = None;
        match state.transport.take() {
            Some(transport) => {
                log::debug!("i2c: closing bus {}", self.index);
                transport.close()?;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BusState<O::Transport, D>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open<'s>(
        &self,
        state: &'s mut BusState<O::Transport, D>,
    ) -> Result<&'s mut O::Transport> {
        if state.transport.is_none() {
            let transport = self.opener.open(self.index)?;
            log::debug!("i2c: bus {} initialized", self.index);
            state.address = None;
            state.transport = Some(transport);
        }
        state.transport.as_mut().ok_or_else(not_open)
    }

    /// Open the bus if needed and make `addr` the programmed slave address.
    /// `I2C_SLAVE` is only issued when `addr` differs from the cached one.
    fn select<'s>(
        &self,
        state: &'s mut BusState<O::Transport, D>,
        addr: SevenBitAddress,
    ) -> Result<&'s mut O::Transport> {
        let cached = state.address;
        let transport = self.ensure_open(state)?;
        if cached != Some(addr) {
            log::trace!("i2c: setting bus {} address to {:#04x}", self.index, addr);
            transport.set_slave_address(addr)?;
        }
        state.address = Some(addr);
        state.transport.as_mut().ok_or_else(not_open)
    }
}

fn expect_count(op: &'static str, expected: usize, actual: usize) -> Result<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(Error::UnexpectedCount {
            op,
            expected,
            actual,
        })
    }
}

fn not_open() -> Error {
    Error::Transport(std::io::Error::from_raw_os_error(libc::EBADF))
}

impl<O: TransportOpener, D: DelayNs> embedded_hal::i2c::ErrorType for I2cBus<O, D> {
    type Error = Error;
}

impl<O: TransportOpener, D: DelayNs> embedded_hal::i2c::I2c for I2cBus<O, D> {
    fn transaction(
        &mut self,
        address: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<()> {
        I2cBus::transaction(self, address, operations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i2c::codec::{CodecError, Direction};
    use hex_literal::hex;
    use std::collections::HashMap;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        SetAddress(u8),
        Read,
        Write(Vec<u8>),
        Smbus { command: u8, payload: Vec<u8> },
        SmbusRead { command: u8, len: usize },
        Rdwr(Vec<Msg>),
        Close,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Msg {
        Write(Vec<u8>),
        Read(usize),
    }

    /// Simulated slave devices: per address, a register file.
    #[derive(Default)]
    struct MockBus {
        calls: Vec<Call>,
        registers: HashMap<(u8, u8), u8>,
        read_queue: Vec<u8>,
        short_io: bool,
        nack: bool,
        spans: Vec<(Instant, Instant)>,
    }

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<MockBus>>);

    impl Shared {
        fn with<R>(&self, f: impl FnOnce(&mut MockBus) -> R) -> R {
            f(&mut self.0.lock().unwrap())
        }

        fn calls(&self) -> Vec<Call> {
            self.with(|m| m.calls.clone())
        }
    }

    struct MockTransport {
        shared: Shared,
        address: Option<u8>,
        hold: Duration,
    }

    impl MockTransport {
        fn record(&self, call: Call) {
            let start = Instant::now();
            thread::sleep(self.hold);
            self.shared.with(|m| {
                m.calls.push(call);
                m.spans.push((start, Instant::now()));
            });
        }
    }

    impl I2cTransport for MockTransport {
        fn set_slave_address(&mut self, address: u8) -> io::Result<()> {
            self.record(Call::SetAddress(address));
            self.address = Some(address);
            Ok(())
        }

        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.record(Call::Read);
            self.shared.with(|m| {
                if m.short_io {
                    return Ok(0);
                }
                let n = buf.len().min(m.read_queue.len());
                for (slot, byte) in buf.iter_mut().zip(m.read_queue.drain(..n)) {
                    *slot = byte;
                }
                Ok(n)
            })
        }

        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.record(Call::Write(buf.to_vec()));
            Ok(if self.shared.with(|m| m.short_io) {
                0
            } else {
                buf.len()
            })
        }

        fn smbus_transfer(&mut self, transfer: &mut SmbusBlockTransfer<'_>) -> io::Result<()> {
            match transfer.direction() {
                Direction::Write => self.record(Call::Smbus {
                    command: transfer.command(),
                    payload: transfer.payload().to_vec(),
                }),
                Direction::Read => {
                    let payload = transfer.payload_mut();
                    let len = payload.len();
                    self.shared.with(|m| {
                        let n = len.min(m.read_queue.len());
                        for (slot, byte) in payload.iter_mut().zip(m.read_queue.drain(..n)) {
                            *slot = byte;
                        }
                    });
                    self.record(Call::SmbusRead {
                        command: transfer.command(),
                        len,
                    });
                }
            }
            Ok(())
        }

        fn rdwr_transfer(&mut self, transfer: &mut RdwrTransfer<'_, '_>) -> io::Result<()> {
            let addr = transfer.address();
            assert_eq!(Some(addr), self.address);
            if self.shared.with(|m| m.nack) {
                return Err(io::Error::from_raw_os_error(libc::ENXIO));
            }
            let mut msgs = Vec::new();
            let mut reg = 0u8;
            for op in transfer.operations_mut() {
                match op {
                    Operation::Write(bytes) => {
                        msgs.push(Msg::Write(bytes.to_vec()));
                        if let Some((first, rest)) = bytes.split_first() {
                            reg = *first;
                            self.shared.with(|m| {
                                for (i, b) in rest.iter().enumerate() {
                                    m.registers.insert((addr, reg + i as u8), *b);
                                }
                            });
                        }
                    }
                    Operation::Read(buf) => {
                        msgs.push(Msg::Read(buf.len()));
                        self.shared.with(|m| {
                            for (i, slot) in buf.iter_mut().enumerate() {
                                *slot = *m.registers.get(&(addr, reg + i as u8)).unwrap_or(&0);
                            }
                        });
                    }
                }
            }
            self.record(Call::Rdwr(msgs));
            Ok(())
        }

        fn close(self) -> io::Result<()> {
            self.shared.with(|m| m.calls.push(Call::Close));
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct MockOpener {
        shared: Shared,
        opens: Arc<AtomicUsize>,
        missing: bool,
        hold: Duration,
    }

    impl TransportOpener for MockOpener {
        type Transport = MockTransport;

        fn open(&self, bus: u8) -> Result<MockTransport> {
            if self.missing {
                return Err(Error::DeviceUnavailable {
                    bus,
                    path: format!("/dev/i2c-{bus}").into(),
                    source: io::Error::from(io::ErrorKind::NotFound),
                });
            }
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(MockTransport {
                shared: self.shared.clone(),
                address: None,
                hold: self.hold,
            })
        }
    }

    /// Records requested delays instead of sleeping.
    #[derive(Clone, Default)]
    struct RecordingDelay(Arc<Mutex<Vec<u32>>>);

    impl DelayNs for RecordingDelay {
        fn delay_ns(&mut self, ns: u32) {
            self.0.lock().unwrap().push(ns);
        }
    }

    fn mock_bus() -> (I2cBus<MockOpener, RecordingDelay>, MockOpener, RecordingDelay) {
        let opener = MockOpener::default();
        let delay = RecordingDelay::default();
        let bus = I2cBus::with_opener(1, &BusConfig::default(), opener.clone(), delay.clone());
        (bus, opener, delay)
    }

    #[test]
    fn test_open_is_lazy_and_idempotent() {
        let (bus, opener, _) = mock_bus();
        assert_eq!(opener.opens.load(Ordering::SeqCst), 0);

        bus.open().unwrap();
        bus.open().unwrap();
        bus.write_byte(0x04, 0x01).unwrap();
        assert_eq!(opener.opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_device_is_reported() {
        let opener = MockOpener {
            missing: true,
            ..MockOpener::default()
        };
        let bus = I2cBus::with_opener(3, &BusConfig::default(), opener, RecordingDelay::default());
        assert!(matches!(
            bus.read_byte(0x04),
            Err(Error::DeviceUnavailable { bus: 3, .. })
        ));
    }

    #[test]
    fn test_address_programmed_once_per_change() {
        let (bus, opener, _) = mock_bus();
        opener.shared.with(|m| m.read_queue = vec![1, 2, 3]);

        bus.write_byte(0x04, 0xaa).unwrap();
        bus.write_byte(0x04, 0xbb).unwrap();
        bus.read_byte(0x04).unwrap();
        bus.read_byte(0x05).unwrap();
        bus.read_byte(0x05).unwrap();

        assert_eq!(
            opener.shared.calls(),
            vec![
                Call::SetAddress(0x04),
                Call::Write(vec![0xaa]),
                Call::Write(vec![0xbb]),
                Call::Read,
                Call::SetAddress(0x05),
                Call::Read,
                Call::Read,
            ]
        );
    }

    #[test]
    fn test_single_byte_count_mismatch() {
        let (bus, opener, _) = mock_bus();
        opener.shared.with(|m| m.short_io = true);

        assert!(matches!(
            bus.read_byte(0x04),
            Err(Error::UnexpectedCount {
                expected: 1,
                actual: 0,
                ..
            })
        ));
        assert!(matches!(
            bus.write_byte(0x04, 0x01),
            Err(Error::UnexpectedCount {
                expected: 1,
                actual: 0,
                ..
            })
        ));
    }

    #[test]
    fn test_read_byte_returns_device_byte() {
        let (bus, opener, _) = mock_bus();
        opener.shared.with(|m| m.read_queue = vec![0x7e]);
        assert_eq!(bus.read_byte(0x04).unwrap(), 0x7e);
    }

    #[test]
    fn test_write_bytes_one_at_a_time_with_delay() {
        let (bus, opener, delay) = mock_bus();

        bus.write_bytes(0x04, &hex!("010203")).unwrap();

        assert_eq!(
            opener.shared.calls(),
            vec![
                Call::SetAddress(0x04),
                Call::Write(vec![0x01]),
                Call::Write(vec![0x02]),
                Call::Write(vec![0x03]),
            ]
        );
        assert_eq!(*delay.0.lock().unwrap(), vec![20_000_000; 3]);
    }

    #[test]
    fn test_write_bytes_wall_time() {
        let opener = MockOpener::default();
        let bus = I2cBus::with_opener(1, &BusConfig::default(), opener.clone(), StdDelay);
        let start = Instant::now();

        bus.write_bytes(0x04, &hex!("0a0b0c0d")).unwrap();

        assert!(start.elapsed() >= Duration::from_millis(3 * 20));
        assert_eq!(opener.shared.calls().len(), 5);
    }

    #[test]
    fn test_write_bytes_stops_on_short_write() {
        let (bus, opener, delay) = mock_bus();
        opener.shared.with(|m| m.short_io = true);

        assert!(bus.write_bytes(0x04, &hex!("0102")).is_err());
        assert_eq!(opener.shared.calls().len(), 2);
        assert!(delay.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_block_write_is_one_request() {
        let (bus, opener, _) = mock_bus();

        bus.write(0x04, 0x01, &hex!("080000")).unwrap();

        assert_eq!(
            opener.shared.calls(),
            vec![
                Call::SetAddress(0x04),
                Call::Smbus {
                    command: 0x01,
                    payload: vec![0x08, 0x00, 0x00],
                },
            ]
        );
    }

    #[test]
    fn test_block_write_rejects_oversize_before_io() {
        let (bus, opener, _) = mock_bus();
        assert!(matches!(
            bus.write(0x04, 0x01, &[0u8; 33]),
            Err(Error::Codec(_))
        ));
        assert!(opener.shared.calls().is_empty());
        assert_eq!(opener.opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_block_read_fills_buffer() {
        let (bus, opener, _) = mock_bus();
        opener.shared.with(|m| m.read_queue = hex!("deadbeef").to_vec());

        let mut buf = [0u8; 3];
        bus.read_block(0x04, 0x10, &mut buf).unwrap();

        assert_eq!(buf, hex!("deadbe"));
        assert_eq!(
            opener.shared.calls(),
            vec![
                Call::SetAddress(0x04),
                Call::SmbusRead {
                    command: 0x10,
                    len: 3,
                },
            ]
        );
    }

    #[test]
    fn test_block_read_rejects_bad_length_before_io() {
        let (bus, opener, _) = mock_bus();

        assert!(matches!(
            bus.read_block(0x04, 0x10, &mut []),
            Err(Error::Codec(CodecError::EmptyBlock))
        ));
        assert!(matches!(
            bus.read_block(0x04, 0x10, &mut [0u8; 33]),
            Err(Error::Codec(CodecError::PayloadTooLong { len: 33, max: 32 }))
        ));
        assert!(opener.shared.calls().is_empty());
        assert_eq!(opener.opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_word_round_trip_is_big_endian() {
        let (bus, opener, _) = mock_bus();

        bus.write_word_to_reg(0x48, 0x02, 0x1234).unwrap();
        assert_eq!(bus.read_word_from_reg(0x48, 0x02).unwrap(), 0x1234);

        let calls = opener.shared.calls();
        assert_eq!(calls[1], Call::Rdwr(vec![Msg::Write(vec![0x02, 0x12, 0x34])]));
        assert_eq!(
            calls[2],
            Call::Rdwr(vec![Msg::Write(vec![0x02]), Msg::Read(2)])
        );
        opener.shared.with(|m| {
            assert_eq!(m.registers.get(&(0x48, 0x02)), Some(&0x12));
            assert_eq!(m.registers.get(&(0x48, 0x03)), Some(&0x34));
        });
    }

    #[test]
    fn test_byte_register_access() {
        let (bus, _, _) = mock_bus();
        bus.write_byte_to_reg(0x20, 0x09, 0x5a).unwrap();
        assert_eq!(bus.read_byte_from_reg(0x20, 0x09).unwrap(), 0x5a);
        assert_eq!(bus.read_byte_from_reg(0x21, 0x09).unwrap(), 0x00);
    }

    #[test]
    fn test_kernel_error_is_passed_through() {
        let (bus, opener, _) = mock_bus();
        opener.shared.with(|m| m.nack = true);

        match bus.read_word_from_reg(0x48, 0x00) {
            Err(Error::Transport(err)) => assert_eq!(err.raw_os_error(), Some(libc::ENXIO)),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_close_never_opened_is_noop() {
        let (bus, opener, _) = mock_bus();
        bus.close().unwrap();
        bus.close().unwrap();
        assert!(opener.shared.calls().is_empty());
        assert_eq!(opener.opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_close_releases_and_resets_address() {
        let (bus, opener, _) = mock_bus();
        bus.write_byte(0x04, 0x01).unwrap();
        bus.close().unwrap();
        bus.close().unwrap();
        bus.write_byte(0x04, 0x02).unwrap();

        assert_eq!(
            opener.shared.calls(),
            vec![
                Call::SetAddress(0x04),
                Call::Write(vec![0x01]),
                Call::Close,
                Call::SetAddress(0x04),
                Call::Write(vec![0x02]),
            ]
        );
        assert_eq!(opener.opens.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_concurrent_callers_never_overlap() {
        let opener = MockOpener {
            hold: Duration::from_millis(2),
            ..MockOpener::default()
        };
        let bus = Arc::new(I2cBus::with_opener(
            1,
            &BusConfig::default(),
            opener.clone(),
            RecordingDelay::default(),
        ));

        let workers: Vec<_> = (0..4u8)
            .map(|n| {
                let bus = Arc::clone(&bus);
                thread::spawn(move || {
                    for i in 0..5u8 {
                        bus.write_word_to_reg(0x10 + n, i, u16::from(i)).unwrap();
                        bus.read_word_from_reg(0x10 + n, i).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let mut spans = opener.shared.with(|m| m.spans.clone());
        spans.sort();
        for pair in spans.windows(2) {
            assert!(pair[0].1 <= pair[1].0, "transfers overlapped");
        }
    }

    #[test]
    fn test_embedded_hal_write_read() {
        use embedded_hal::i2c::I2c;

        let (mut bus, _, _) = mock_bus();
        I2c::write(&mut bus, 0x30, &hex!("0444")).unwrap();

        let mut buf = [0u8; 1];
        bus.write_read(0x30, &[0x04], &mut buf).unwrap();
        assert_eq!(buf, [0x44]);
    }
}
