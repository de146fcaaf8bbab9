//! I2C master over the MPSSE engine, after AN255.  SCL is ADBUS0 and SDA is ADBUS1 (tied to
//! ADBUS2 for reading).  On the FT232H the two lines are put in open drain mode; other chips
//! release a line by turning its pin into an input and letting the pull-up take it high.
//!
//! Acknowledge bits are returned as plain `bool`s.  Only the `embedded-hal` adapter turns a NAK
//! into an error.
use embedded_hal::i2c::Operation;
use ftdi_mpsse::{ClockBitsIn, ClockBitsOut, ClockDataIn, ClockDataOut, MpsseCmdBuilder};

use crate::error::AckPhase;
use crate::mpsse::Mpsse;
use crate::transport::Transport;
use crate::{Error, Result};

pub const ONE_HUNDRED_KHZ: u32 = 100_000;
pub const FOUR_HUNDRED_KHZ: u32 = 400_000;

const PIN_SCL: u8 = 1;
const PIN_SDA: u8 = 1 << 1;
const BOTH: u8 = PIN_SCL | PIN_SDA;

/// Four identical pin writes hold a level for roughly one bit time.
const HOLD_WRITES: usize = 4;

#[derive(Debug, Clone)]
pub struct I2cConfig {
    /// SCL frequency in hertz.
    pub frequency: u32,
    /// Use three-phase data clocking.  Only enhanced chips have it.
    pub three_phase: bool,
}

impl Default for I2cConfig {
    fn default() -> Self {
        Self {
            frequency: FOUR_HUNDRED_KHZ,
            three_phase: true,
        }
    }
}

pub struct I2c<T> {
    mpsse: Mpsse<T>,
    config: I2cConfig,
    open_drain: bool,
}

impl<T: Transport> I2c<T> {
    pub fn new(mpsse: Mpsse<T>, config: I2cConfig) -> Self {
        let open_drain = mpsse.capabilities().open_drain;
        Self {
            mpsse,
            config,
            open_drain,
        }
    }

    /// Bring up the MPSSE, release both lines and start SCL.
    pub fn open(&mut self) -> Result<()> {
        log::debug!("I2c::open({:?}, open drain: {})", self.config, self.open_drain);
        self.mpsse.open()?;

        if self.config.three_phase {
            self.mpsse.enable_three_phase_clock()?;
            self.mpsse.execute()?;
        }
        if self.open_drain {
            self.mpsse.configure_open_drain_outputs(BOTH, 0)?;
        }
        self.idle()?;

        self.mpsse.start_clock(self.clock_frequency())?;
        self.mpsse.expect_no_input()
    }

    /// Three-phase clocking spends three half periods per bit instead of two; ask for 50% more
    /// to end up at the configured rate (AN255).
    fn clock_frequency(&self) -> u32 {
        if self.config.three_phase && self.mpsse.capabilities().enhanced {
            self.config.frequency.saturating_mul(3) / 2
        } else {
            self.config.frequency
        }
    }

    pub fn close(&mut self) -> Result<()> {
        self.mpsse.close()
    }

    /// Queue both lines released, letting the pull-ups take them high.
    pub fn idle(&mut self) -> Result<()> {
        let builder = self.lines_high(MpsseCmdBuilder::new(), 1);
        self.mpsse.enqueue(builder.as_slice())
    }

    /// Queue a start condition: SDA falls while SCL is high, then SCL falls.
    pub fn start(&mut self) -> Result<()> {
        let builder = self.scl_high_sda_low(MpsseCmdBuilder::new());
        let builder = Self::lines_low(builder);
        self.mpsse.enqueue(builder.as_slice())
    }

    /// Queue a repeated start: release SDA, then SCL, then issue a start.
    pub fn repeated_start(&mut self) -> Result<()> {
        let mut builder = MpsseCmdBuilder::new();
        for _ in 0..HOLD_WRITES {
            builder = self.release_sda(builder);
        }
        let builder = self.lines_high(builder, HOLD_WRITES);
        self.mpsse.enqueue(builder.as_slice())?;
        self.start()
    }

    /// Send a stop condition: SCL rises while SDA is low, then SDA rises.
    pub fn stop(&mut self) -> Result<()> {
        let builder = Self::lines_low(MpsseCmdBuilder::new());
        let builder = self.scl_high_sda_low(builder);
        let builder = self.lines_high(builder, HOLD_WRITES).send_immediate();
        self.mpsse.enqueue(builder.as_slice())?;
        self.mpsse.execute()
    }

    /// Write one byte and return whether the target acknowledged it.
    pub fn write_byte(&mut self, value: u8) -> Result<bool> {
        let builder = MpsseCmdBuilder::new()
            .set_gpio_lower(0, BOTH)
            .clock_data_out(ClockDataOut::MsbNeg, &[value]);
        let builder = self
            .release_sda(builder)
            .clock_bits_in(ClockBitsIn::MsbPos, 1)
            .send_immediate();
        self.mpsse.enqueue(builder.as_slice())?;
        self.mpsse.execute()?;

        let ack = self.mpsse.read(1)?[0] & 1 == 0;
        log::trace!("i2c write {:#04x}: {}", value, if ack { "ACK" } else { "NAK" });
        Ok(ack)
    }

    /// Write a 7-bit address with the direction bit.
    pub fn write_address(&mut self, address: u8, read: bool) -> Result<bool> {
        self.write_byte((address << 1) | u8::from(read))
    }

    /// Read one byte, then answer with ACK (`ack` true) or NAK.
    pub fn read_byte(&mut self, ack: bool) -> Result<u8> {
        let builder = self
            .release_sda(MpsseCmdBuilder::new())
            .clock_data_in(ClockDataIn::MsbPos, 1)
            .set_gpio_lower(0, BOTH)
            .clock_bits_out(ClockBitsOut::MsbNeg, if ack { 0x00 } else { 0xff }, 1);
        let builder = self.release_sda(builder).send_immediate();
        self.mpsse.enqueue(builder.as_slice())?;
        self.mpsse.execute()?;
        Ok(self.mpsse.read(1)?[0])
    }

    pub fn read_with_ack(&mut self) -> Result<u8> {
        self.read_byte(true)
    }

    pub fn read_with_nak(&mut self) -> Result<u8> {
        self.read_byte(false)
    }

    /// Read `count` bytes from `address`.  Returns `None` if the address is not acknowledged.
    pub fn transact_read(&mut self, address: u8, count: usize) -> Result<Option<Vec<u8>>> {
        self.start()?;
        let mut result = None;
        if self.write_address(address, true)? {
            let mut data = Vec::with_capacity(count);
            for i in 0..count {
                data.push(self.read_byte(i + 1 < count)?);
            }
            result = Some(data);
        }
        self.stop()?;
        Ok(result)
    }

    /// Write `data` to `address`, stopping at the first byte that is not acknowledged.  Returns
    /// the number of bytes acknowledged, zero if the address itself was not.
    pub fn transact_write(&mut self, address: u8, data: &[u8]) -> Result<usize> {
        self.start()?;
        let mut written = 0;
        if self.write_address(address, false)? {
            for &byte in data {
                if !self.write_byte(byte)? {
                    break;
                }
                written += 1;
            }
        }
        self.stop()?;
        Ok(written)
    }

    /// Send anything still queued.
    pub fn execute(&mut self) -> Result<()> {
        self.mpsse.execute()
    }

    pub fn config(&self) -> &I2cConfig {
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

    /// SCL driven low, SDA released.
    fn release_sda(&self, builder: MpsseCmdBuilder) -> MpsseCmdBuilder {
        if self.open_drain {
            builder.set_gpio_lower(PIN_SDA, BOTH)
        } else {
            builder.set_gpio_lower(PIN_SDA, PIN_SCL)
        }
    }

    /// Both lines released, `writes` times.
    fn lines_high(&self, mut builder: MpsseCmdBuilder, writes: usize) -> MpsseCmdBuilder {
        for _ in 0..writes {
            builder = if self.open_drain {
                builder.set_gpio_lower(BOTH, BOTH)
            } else {
                builder.set_gpio_lower(BOTH, 0)
            };
        }
        builder
    }

    fn scl_high_sda_low(&self, mut builder: MpsseCmdBuilder) -> MpsseCmdBuilder {
        for _ in 0..HOLD_WRITES {
            builder = if self.open_drain {
                builder.set_gpio_lower(PIN_SCL, BOTH)
            } else {
                builder.set_gpio_lower(PIN_SCL, PIN_SDA)
            };
        }
        builder
    }

    fn lines_low(mut builder: MpsseCmdBuilder) -> MpsseCmdBuilder {
        for _ in 0..HOLD_WRITES {
            builder = builder.set_gpio_lower(0, BOTH);
        }
        builder
    }

    fn run(&mut self, address: u8, operations: &mut [Operation<'_>]) -> Result<()> {
        let mut reading = None;
        for i in 0..operations.len() {
            let next_is_read = matches!(operations.get(i + 1), Some(Operation::Read(_)));
            let is_read = matches!(operations[i], Operation::Read(_));

            if reading != Some(is_read) {
                if reading.is_none() {
                    self.start()?;
                } else {
                    self.repeated_start()?;
                }
                if !self.write_address(address, is_read)? {
                    return Err(Error::NoAcknowledge(AckPhase::Address));
                }
                reading = Some(is_read);
            }

            match &mut operations[i] {
                Operation::Read(buf) => {
                    let len = buf.len();
                    for (j, slot) in buf.iter_mut().enumerate() {
                        // NAK the byte before the next start or the stop
                        *slot = self.read_byte(next_is_read || j + 1 < len)?;
                    }
                }
                Operation::Write(data) => {
                    for &byte in data.iter() {
                        if !self.write_byte(byte)? {
                            return Err(Error::NoAcknowledge(AckPhase::Data));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

impl<T: Transport> embedded_hal::i2c::ErrorType for I2c<T> {
    type Error = Error;
}

impl<T: Transport> embedded_hal::i2c::I2c for I2c<T> {
    fn transaction(&mut self, address: u8, operations: &mut [Operation<'_>]) -> Result<()> {
        let result = self.run(address, operations);
        let stop = self.stop();
        result.and(stop)
    }
}
