//! SPI master over the MPSSE engine.  SCK, MOSI, MISO and CS sit on ADBUS0..3.  Data is shifted
//! MSB first.  The engine samples on a single clock edge, so only modes 0 and 2 can be produced.
use std::thread;
use std::time::Duration;

use embedded_hal::spi::{Operation, Phase, Polarity, SpiDevice};
use ftdi_mpsse::{
    ClockBits, ClockBitsIn, ClockBitsOut, ClockData, ClockDataIn, ClockDataOut, MpsseCmdBuilder,
};

use crate::mpsse::Mpsse;
use crate::transport::Transport;
use crate::{Error, Result};

pub const PIN_SCK: u8 = 1;
pub const PIN_MOSI: u8 = 1 << 1;
pub const PIN_MISO: u8 = 1 << 2;
pub const PIN_CS: u8 = 1 << 3;
const OUTPUT_PINS: u8 = PIN_SCK | PIN_MOSI | PIN_CS;

/// Each pin write takes about 0.2us on the chip; five of them give the target 1us.
const SELECT_SETTLE_WRITES: usize = 5;
const MAX_SHIFT_BYTES: usize = 65536;

/// The SPI modes the MPSSE can generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpiMode {
    /// Clock idles low, data sampled on the rising edge.
    M0,
    /// Clock idles high, data sampled on the falling edge.
    M2,
}

impl SpiMode {
    pub fn clock_idle_high(self) -> bool {
        self == SpiMode::M2
    }

    pub fn bytes_in(self) -> ClockDataIn {
        match self {
            SpiMode::M0 => ClockDataIn::MsbPos,
            SpiMode::M2 => ClockDataIn::MsbNeg,
        }
    }

    pub fn bits_in(self) -> ClockBitsIn {
        match self {
            SpiMode::M0 => ClockBitsIn::MsbPos,
            SpiMode::M2 => ClockBitsIn::MsbNeg,
        }
    }

    pub fn bytes_out(self) -> ClockDataOut {
        match self {
            SpiMode::M0 => ClockDataOut::MsbNeg,
            SpiMode::M2 => ClockDataOut::MsbPos,
        }
    }

    pub fn bits_out(self) -> ClockBitsOut {
        match self {
            SpiMode::M0 => ClockBitsOut::MsbNeg,
            SpiMode::M2 => ClockBitsOut::MsbPos,
        }
    }

    pub fn bytes_in_out(self) -> ClockData {
        match self {
            SpiMode::M0 => ClockData::MsbPosIn,
            SpiMode::M2 => ClockData::MsbNegIn,
        }
    }

    pub fn bits_in_out(self) -> ClockBits {
        match self {
            SpiMode::M0 => ClockBits::MsbPosIn,
            SpiMode::M2 => ClockBits::MsbNegIn,
        }
    }
}

impl TryFrom<embedded_hal::spi::Mode> for SpiMode {
    type Error = Error;

    fn try_from(mode: embedded_hal::spi::Mode) -> Result<Self> {
        match (mode.polarity, mode.phase) {
            (Polarity::IdleLow, Phase::CaptureOnFirstTransition) => Ok(SpiMode::M0),
            (Polarity::IdleHigh, Phase::CaptureOnFirstTransition) => Ok(SpiMode::M2),
            _ => Err(Error::UnsupportedSpiMode),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SpiConfig {
    /// SCK frequency in hertz.
    pub frequency: u32,
    pub mode: SpiMode,
    /// CS is driven high to select the target.
    pub select_active_high: bool,
}

impl Default for SpiConfig {
    fn default() -> Self {
        Self {
            frequency: 100_000,
            mode: SpiMode::M0,
            select_active_high: false,
        }
    }
}

pub struct Spi<T> {
    mpsse: Mpsse<T>,
    config: SpiConfig,
}

/// Split a bit count into whole bytes and leftover bits.
fn split_bits(bit_count: usize, data_len: usize) -> Result<(usize, usize)> {
    if data_len != bit_count.div_ceil(8) {
        return Err(Error::InvalidBitCount {
            bits: bit_count,
            bytes: data_len,
        });
    }
    Ok((bit_count / 8, bit_count % 8))
}

impl<T: Transport> Spi<T> {
    pub fn new(mpsse: Mpsse<T>, config: SpiConfig) -> Self {
        Self { mpsse, config }
    }

    /// Bring up the MPSSE with the target deselected and start SCK.
    pub fn open(&mut self) -> Result<()> {
        log::debug!("Spi::open({:?})", self.config);
        self.mpsse.open()?;

        self.clear_select()?;
        self.mpsse.execute()?;
        self.mpsse.start_clock(self.config.frequency)?;
        self.mpsse.expect_no_input()
    }

    pub fn close(&mut self) -> Result<()> {
        self.mpsse.close()
    }

    /// Queue CS going active.
    pub fn assert_select(&mut self) -> Result<()> {
        self.queue_pins(true)
    }

    /// Queue CS going inactive.
    pub fn clear_select(&mut self) -> Result<()> {
        self.queue_pins(false)
    }

    fn queue_pins(&mut self, selected: bool) -> Result<()> {
        let mut value = if selected == self.config.select_active_high { PIN_CS } else { 0 };
        if self.config.mode.clock_idle_high() {
            value |= PIN_SCK;
        }

        let mut builder = MpsseCmdBuilder::new();
        for _ in 0..SELECT_SETTLE_WRITES {
            builder = builder.set_gpio_lower(value, OUTPUT_PINS);
        }
        self.mpsse.enqueue(builder.as_slice())
    }

    /// Clock in `bit_count` bits.  A final partial byte is right aligned.
    pub fn read_bits(&mut self, bit_count: usize) -> Result<Vec<u8>> {
        let (bytes, extra) = (bit_count / 8, bit_count % 8);
        let mode = self.config.mode;

        let mut builder = MpsseCmdBuilder::new();
        let mut remaining = bytes;
        while remaining > 0 {
            let len = remaining.min(MAX_SHIFT_BYTES);
            builder = builder.clock_data_in(mode.bytes_in(), len);
            remaining -= len;
        }
        if extra > 0 {
            builder = builder.clock_bits_in(mode.bits_in(), extra as u8);
        }
        self.mpsse.enqueue(builder.as_slice())?;
        self.mpsse.send_immediate()?;
        self.mpsse.execute()?;
        self.mpsse.read(bit_count.div_ceil(8))
    }

    /// Queue `bit_count` bits of `data` for output.  A final partial byte is sent from its top
    /// bits.
    pub fn write_bits(&mut self, bit_count: usize, data: &[u8]) -> Result<()> {
        let (bytes, extra) = split_bits(bit_count, data.len())?;
        let mode = self.config.mode;

        let mut builder = MpsseCmdBuilder::new();
        for chunk in data[..bytes].chunks(MAX_SHIFT_BYTES) {
            builder = builder.clock_data_out(mode.bytes_out(), chunk);
        }
        if extra > 0 {
            builder = builder.clock_bits_out(mode.bits_out(), data[bytes], extra as u8);
        }
        self.mpsse.enqueue(builder.as_slice())
    }

    /// Shift `bit_count` bits out and in at the same time.
    pub fn read_write_bits(&mut self, bit_count: usize, data: &[u8]) -> Result<Vec<u8>> {
        self.queue_read_write(bit_count, data)?;
        self.mpsse.send_immediate()?;
        self.mpsse.execute()?;
        self.mpsse.read(data.len())
    }

    fn queue_read_write(&mut self, bit_count: usize, data: &[u8]) -> Result<()> {
        let (bytes, extra) = split_bits(bit_count, data.len())?;
        let mode = self.config.mode;

        let mut builder = MpsseCmdBuilder::new();
        for chunk in data[..bytes].chunks(MAX_SHIFT_BYTES) {
            builder = builder.clock_data(mode.bytes_in_out(), chunk);
        }
        if extra > 0 {
            builder = builder.clock_bits(mode.bits_in_out(), data[bytes], extra as u8);
        }
        self.mpsse.enqueue(builder.as_slice())
    }

    /// Select the target, write `data` and deselect.
    pub fn transact_write(&mut self, data: &[u8]) -> Result<()> {
        self.transact_write_bits(8 * data.len(), data)
    }

    pub fn transact_write_bits(&mut self, bit_count: usize, data: &[u8]) -> Result<()> {
        split_bits(bit_count, data.len())?;
        log::trace!("spi write: {} bits", bit_count);
        self.assert_select()?;
        self.write_bits(bit_count, data)?;
        self.clear_select()?;
        self.mpsse.execute()
    }

    /// Select the target, exchange `data` for as many bytes and deselect.
    pub fn transact_read_write(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.transact(8 * data.len(), data)
    }

    /// Select the target, exchange `bit_count` bits and deselect, all in one transfer.
    pub fn transact(&mut self, bit_count: usize, data: &[u8]) -> Result<Vec<u8>> {
        split_bits(bit_count, data.len())?;
        log::trace!("spi transact: {} bits", bit_count);
        self.assert_select()?;
        self.queue_read_write(bit_count, data)?;
        self.clear_select()?;
        self.mpsse.send_immediate()?;
        self.mpsse.execute()?;
        self.mpsse.read(data.len())
    }

    /// Keep the target selected and poll the low pins until `mask` reads `high`, for example an
    /// EEPROM signalling ready on MISO.  Gives up after `max_polls` reads and returns whether the
    /// level was seen.
    pub fn wait_for_pin(&mut self, mask: u8, high: bool, max_polls: usize) -> Result<bool> {
        self.assert_select()?;
        self.mpsse.execute()?;

        let mut seen = false;
        for _ in 0..max_polls {
            if (self.mpsse.read_data_bits_low()? & mask != 0) == high {
                seen = true;
                break;
            }
        }

        self.clear_select()?;
        self.mpsse.execute()?;
        Ok(seen)
    }

    pub fn read_data_bits_low(&mut self) -> Result<u8> {
        self.mpsse.read_data_bits_low()
    }

    pub fn read_data_bits_high(&mut self) -> Result<u8> {
        self.mpsse.read_data_bits_high()
    }

    /// Drive the xCBUS pins.  Queued until the next transfer.
    pub fn set_data_bits_high(&mut self, value: u8, direction: u8) -> Result<()> {
        self.mpsse.set_data_bits_high(value, direction)
    }

    /// Send anything still queued.
    pub fn execute(&mut self) -> Result<()> {
        self.mpsse.execute()
    }

    pub fn config(&self) -> &SpiConfig {
        &self.config
    }

    pub fn mpsse(&self) -> &Mpsse<T> {
        &self.mpsse
    }

    pub fn mpsse_mut(&mut self) -> &mut Mpsse<T> {
        &mut self.mpsse
    }

    pub fn into_inner(self) -> Mpsse<T> {
        self.mpsse
    }
}

impl<T: Transport> embedded_hal::spi::ErrorType for Spi<T> {
    type Error = Error;
}

impl<T: Transport> Spi<T> {
    fn run(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<()> {
        for op in operations {
            match op {
                Operation::Read(buf) => {
                    if !buf.is_empty() {
                        let data = self.read_bits(8 * buf.len())?;
                        buf.copy_from_slice(&data);
                    }
                }
                Operation::Write(data) => self.write_bits(8 * data.len(), data)?,
                Operation::Transfer(read, write) => {
                    let mut out = write.to_vec();
                    out.resize(read.len().max(write.len()), 0);
                    if !out.is_empty() {
                        let data = self.read_write_bits(8 * out.len(), &out)?;
                        read.copy_from_slice(&data[..read.len()]);
                    }
                }
                Operation::TransferInPlace(buf) => {
                    if !buf.is_empty() {
                        let data = self.read_write_bits(8 * buf.len(), buf)?;
                        buf.copy_from_slice(&data);
                    }
                }
                Operation::DelayNs(ns) => {
                    self.mpsse.execute()?;
                    thread::sleep(Duration::from_nanos(u64::from(*ns)));
                }
            }
        }
        Ok(())
    }
}

impl<T: Transport> SpiDevice for Spi<T> {
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<()> {
        self.assert_select()?;
        let result = self.run(operations);
        // CS is released even when an operation failed
        let deselect = self.clear_select().and_then(|()| self.mpsse.execute());
        result.and(deselect)
    }
}
