//! Protocol independent MPSSE handling, as described in FTDI AN108.  `Mpsse` owns the command
//! queue for one channel and knows how to bring the engine up, keep the command and response
//! streams aligned and set the clock.  [`Jtag`](crate::jtag::Jtag), [`Spi`](crate::spi::Spi)
//! and [`I2c`](crate::i2c::I2c) wrap it and add their own pin handling.
//!
//! Commands that only exist on the FT2232H, FT4232H and FT232H (clock divider control, adaptive
//! and three-phase clocking) are silently skipped on older chips.
use std::thread;
use std::time::Duration;

use ftdi_mpsse::MpsseCmdBuilder;

use crate::queue::{self, CommandQueue};
use crate::transport::{BitMode, Capabilities, Transport};
use crate::{Error, Result};

const TWELVE_MHZ: u32 = 12_000_000;
const SIXTY_MHZ: u32 = 60_000_000;

/// An opcode the MPSSE does not know.  The chip answers it with [`BAD_COMMAND`] followed by the
/// opcode itself.
pub const CMD_BOGUS: u8 = 0xAA;
pub const BAD_COMMAND: u8 = 0xFA;

const DISABLE_CLOCK_DIVIDE: u8 = 0x8A;
const ENABLE_CLOCK_DIVIDE: u8 = 0x8B;
/// Outputs only drive zeros and tristate on ones.  FT232H only.
const CONFIGURE_OPEN_DRAIN: u8 = 0x9E;

/// Driver settings applied when a channel is opened.
#[derive(Debug, Clone)]
pub struct MpsseConfig {
    /// Size of the command queue in bytes.
    pub queue_capacity: usize,
    pub usb_in_transfer_size: u32,
    pub usb_out_transfer_size: u32,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub latency_timer: Duration,
    /// Pause after the bit mode change before talking to the engine.
    pub configure_delay: Duration,
    /// Pause after setting the clock.
    pub clock_delay: Duration,
    /// Pause after disabling loopback.
    pub loopback_delay: Duration,
    /// How many times the input queue is polled for the synchronisation answer.
    pub sync_polls: usize,
}

impl Default for MpsseConfig {
    fn default() -> Self {
        Self {
            queue_capacity: queue::DEFAULT_CAPACITY,
            usb_in_transfer_size: 65536,
            usb_out_transfer_size: 65535,
            read_timeout: Duration::from_millis(3000),
            write_timeout: Duration::from_millis(3000),
            latency_timer: Duration::from_millis(1),
            configure_delay: Duration::from_millis(50),
            clock_delay: Duration::from_millis(20),
            loopback_delay: Duration::from_millis(30),
            sync_polls: 10_000,
        }
    }
}

impl MpsseConfig {
    /// The default settings without any of the settle delays.
    pub fn without_delays() -> Self {
        Self {
            configure_delay: Duration::ZERO,
            clock_delay: Duration::ZERO,
            loopback_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Divisor giving the fastest clock that does not exceed `frequency`.  `high_speed` selects the
/// 60 MHz master clock (divide-by-5 off), otherwise the 12 MHz one is used.  The resulting
/// clock is `base / ((1 + divisor) * 2)`; frequencies too low to reach give the slowest setting.
pub fn clock_divisor(frequency: u32, high_speed: bool) -> u16 {
    let base = if high_speed { SIXTY_MHZ } else { TWELVE_MHZ };
    if frequency == 0 {
        return u16::MAX;
    }

    let per_period = 2 * u64::from(frequency);
    let periods = (u64::from(base) + per_period - 1) / per_period;
    periods.saturating_sub(1).min(u64::from(u16::MAX)) as u16
}

/// Clock frequency produced by `divisor`, rounded down.
pub fn actual_frequency(divisor: u16, high_speed: bool) -> u32 {
    let base = if high_speed { SIXTY_MHZ } else { TWELVE_MHZ };
    base / ((1 + u32::from(divisor)) * 2)
}

pub struct Mpsse<T> {
    queue: CommandQueue<T>,
    caps: Capabilities,
    config: MpsseConfig,
}

impl<T: Transport> Mpsse<T> {
    /// Wrap a transport for MPSSE use.  Devices without an MPSSE engine are refused.
    pub fn new(transport: T, config: MpsseConfig) -> Result<Self> {
        let caps = Capabilities::of(&transport);
        if !caps.mpsse {
            return Err(Error::NotMpsseCapable);
        }

        Ok(Self {
            queue: CommandQueue::new(transport, config.queue_capacity),
            caps,
            config,
        })
    }

    /// Claim the channel, switch it to MPSSE mode and synchronise with the engine.
    pub fn open(&mut self) -> Result<()> {
        log::debug!("Mpsse::open(caps = {:?})", self.caps);
        self.queue.channel_mut().open()?;
        self.configure()?;
        self.settle(self.config.configure_delay);

        self.disable_clock_divider()?;
        self.disable_adaptive_clock()?;
        self.disable_three_phase_clock()?;
        self.execute()?;

        self.synchronise()
    }

    /// Driver level setup, as per the AN129 sample code.
    fn configure(&mut self) -> Result<()> {
        self.queue.clear();
        let ft = self.queue.channel_mut();

        // Throw away whatever a previous user left behind
        let stale = ft.queued_byte_count()?;
        if stale > 0 {
            log::debug!("discarding {} stale input bytes", stale);
            let mut junk = vec![0; stale];
            ft.read(&mut junk)?;
        }

        ft.set_usb_transfer_sizes(
            self.config.usb_in_transfer_size,
            self.config.usb_out_transfer_size,
        )?;
        ft.set_timeouts(self.config.read_timeout, self.config.write_timeout)?;
        ft.set_latency_timer(self.config.latency_timer)?;
        ft.set_bit_mode(0, BitMode::Reset)?;
        ft.set_bit_mode(0, BitMode::Mpsse)
    }

    /// Send a bogus opcode and wait for the chip to complain about it.  Once the complaint has
    /// been read, commands and responses are known to line up.  See AN135, section 5.3.1.
    fn synchronise(&mut self) -> Result<()> {
        self.queue.enqueue_byte(CMD_BOGUS)?;
        self.queue.flush()?;

        let mut available = 0;
        for _ in 0..self.config.sync_polls {
            available = self.queue.queued_input_count()?;
            if available != 0 {
                break;
            }
        }
        if available == 0 {
            log::warn!("no answer to the synchronisation opcode");
            return Err(Error::Sync {
                response: Vec::new(),
            });
        }

        let response = self.queue.read_exact(available)?;
        if response != [BAD_COMMAND, CMD_BOGUS] {
            log::warn!("bad synchronisation response {:02x?}", response);
            return Err(Error::Sync { response });
        }
        log::debug!("MPSSE synchronised");
        Ok(())
    }

    /// Put the chip back into reset mode so no pins are left driven, then release the channel.
    pub fn close(&mut self) -> Result<()> {
        log::debug!("Mpsse::close()");
        self.queue.clear();
        let ft = self.queue.channel_mut();
        let reset = ft.set_bit_mode(0, BitMode::Reset);
        let close = ft.close();
        reset.and(close)
    }

    /// Queue a clock divisor for the fastest rate not above `frequency` and return it.  Rates
    /// above 12 MHz need the 60 MHz master clock, which only enhanced chips have.
    pub fn configure_clock(&mut self, frequency: u32) -> Result<u16> {
        let high_speed = self.caps.enhanced && frequency > TWELVE_MHZ;
        if high_speed {
            self.disable_clock_divider()?;
        } else {
            self.enable_clock_divider()?;
        }

        let divisor = clock_divisor(frequency, high_speed);
        log::debug!(
            "clock: requested {} Hz, divisor {} gives {} Hz",
            frequency,
            divisor,
            actual_frequency(divisor, high_speed)
        );
        self.enqueue(MpsseCmdBuilder::new().set_clock(u32::from(divisor), None).as_slice())?;
        Ok(divisor)
    }

    /// Set the clock, then take the engine out of loopback.  The last step of every protocol's
    /// `open`.
    pub(crate) fn start_clock(&mut self, frequency: u32) -> Result<u16> {
        let divisor = self.configure_clock(frequency)?;
        self.execute()?;
        self.settle(self.config.clock_delay);

        self.disable_loopback()?;
        self.execute()?;
        self.settle(self.config.loopback_delay);
        Ok(divisor)
    }

    /// Fail if the chip has sent anything nobody asked for.
    pub fn expect_no_input(&mut self) -> Result<()> {
        match self.queue.queued_input_count()? {
            0 => Ok(()),
            n => Err(Error::UnexpectedInput(n)),
        }
    }

    /// Switch to the 60 MHz master clock.
    pub fn disable_clock_divider(&mut self) -> Result<()> {
        if self.caps.enhanced {
            self.queue.enqueue_byte(DISABLE_CLOCK_DIVIDE)?;
        }
        Ok(())
    }

    /// Divide the master clock by 5, giving the 12 MHz clock of the FT2232D.
    pub fn enable_clock_divider(&mut self) -> Result<()> {
        if self.caps.enhanced {
            self.queue.enqueue_byte(ENABLE_CLOCK_DIVIDE)?;
        }
        Ok(())
    }

    /// Wait for RTCK (on GPIOL3) to follow TCK before each clock change, as ARM cores need.
    pub fn enable_adaptive_clock(&mut self) -> Result<()> {
        if self.caps.enhanced {
            self.enqueue(MpsseCmdBuilder::new().enable_adaptive_data_clocking().as_slice())?;
        }
        Ok(())
    }

    pub fn disable_adaptive_clock(&mut self) -> Result<()> {
        if self.caps.enhanced {
            self.enqueue(MpsseCmdBuilder::new().disable_adaptive_data_clocking().as_slice())?;
        }
        Ok(())
    }

    /// Keep data valid on both clock edges (setup, clock, hold), as I2C requires.
    pub fn enable_three_phase_clock(&mut self) -> Result<()> {
        if self.caps.enhanced {
            self.enqueue(MpsseCmdBuilder::new().enable_3phase_data_clocking().as_slice())?;
        }
        Ok(())
    }

    pub fn disable_three_phase_clock(&mut self) -> Result<()> {
        if self.caps.enhanced {
            self.enqueue(MpsseCmdBuilder::new().disable_3phase_data_clocking().as_slice())?;
        }
        Ok(())
    }

    /// Connect TDI/DO to TDO/DI internally.
    pub fn enable_loopback(&mut self) -> Result<()> {
        self.enqueue(MpsseCmdBuilder::new().enable_loopback().as_slice())
    }

    pub fn disable_loopback(&mut self) -> Result<()> {
        self.enqueue(MpsseCmdBuilder::new().disable_loopback().as_slice())
    }

    /// Every set bit in `lower` / `upper` makes the matching xDBUS / xCBUS pin open drain.
    pub fn configure_open_drain_outputs(&mut self, lower: u8, upper: u8) -> Result<()> {
        self.enqueue(&[CONFIGURE_OPEN_DRAIN, lower, upper])
    }

    /// Drive the xDBUS pins.  A 1 in `direction` makes the pin an output.
    pub fn set_data_bits_low(&mut self, value: u8, direction: u8) -> Result<()> {
        self.enqueue(MpsseCmdBuilder::new().set_gpio_lower(value, direction).as_slice())
    }

    /// Drive the xCBUS pins.  A 1 in `direction` makes the pin an output.
    pub fn set_data_bits_high(&mut self, value: u8, direction: u8) -> Result<()> {
        self.enqueue(MpsseCmdBuilder::new().set_gpio_upper(value, direction).as_slice())
    }

    /// Current level of the xDBUS pins.  Flushes the queue.
    pub fn read_data_bits_low(&mut self) -> Result<u8> {
        self.enqueue(MpsseCmdBuilder::new().gpio_lower().send_immediate().as_slice())?;
        self.execute()?;
        Ok(self.read(1)?[0])
    }

    /// Current level of the xCBUS pins.  Flushes the queue.
    pub fn read_data_bits_high(&mut self) -> Result<u8> {
        self.enqueue(MpsseCmdBuilder::new().gpio_upper().send_immediate().as_slice())?;
        self.execute()?;
        Ok(self.read(1)?[0])
    }

    /// Make the chip act on, and answer, everything queued before this point.
    pub fn send_immediate(&mut self) -> Result<()> {
        self.enqueue(MpsseCmdBuilder::new().send_immediate().as_slice())
    }

    pub fn enqueue(&mut self, data: &[u8]) -> Result<()> {
        self.queue.enqueue_bytes(data)
    }

    /// Send the queued commands to the chip.
    pub fn execute(&mut self) -> Result<()> {
        self.queue.flush()
    }

    /// Blocking read of the data captured by earlier commands.
    pub fn read(&mut self, count: usize) -> Result<Vec<u8>> {
        self.queue.read_exact(count)
    }

    /// Bytes waiting in the chip's input queue.
    pub fn queued_input_count(&mut self) -> Result<usize> {
        self.queue.queued_input_count()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    pub fn config(&self) -> &MpsseConfig {
        &self.config
    }

    pub fn queue(&self) -> &CommandQueue<T> {
        &self.queue
    }

    pub fn transport(&self) -> &T {
        self.queue.channel()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.queue.channel_mut()
    }

    pub fn into_transport(self) -> T {
        self.queue.into_channel()
    }

    fn settle(&self, delay: Duration) {
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_device::SimDevice;
    use crate::transport::{ChipType, MockTransport};
    use mockall::predicate::*;
    use mockall::Sequence;

    fn open(device: SimDevice) -> Mpsse<SimDevice> {
        let mut mpsse = Mpsse::new(device, MpsseConfig::without_delays()).unwrap();
        mpsse.open().unwrap();
        mpsse
    }

    #[test]
    fn refuses_devices_without_mpsse() {
        let result = Mpsse::new(SimDevice::new(ChipType::Ft232R), MpsseConfig::default());
        assert!(matches!(result, Err(Error::NotMpsseCapable)));
    }

    #[test]
    fn open_configures_and_synchronises() {
        let mpsse = open(SimDevice::ft2232h());
        let ft = mpsse.transport();

        assert!(ft.open);
        assert_eq!(ft.transfer_sizes, Some((65536, 65535)));
        assert_eq!(
            ft.timeouts,
            Some((Duration::from_millis(3000), Duration::from_millis(3000)))
        );
        assert_eq!(ft.latency, Some(Duration::from_millis(1)));
        assert_eq!(ft.bit_modes, [(0, BitMode::Reset), (0, BitMode::Mpsse)]);
        assert_eq!(ft.writes, [vec![0x8a, 0x97, 0x8d], vec![CMD_BOGUS]]);
        assert!(ft.input.is_empty());
    }

    #[test]
    fn open_on_older_chip_skips_enhanced_commands() {
        let mpsse = open(SimDevice::ft2232c());
        assert_eq!(mpsse.transport().writes, [vec![CMD_BOGUS]]);
    }

    #[test]
    fn open_discards_stale_input() {
        let mut device = SimDevice::ft232h();
        device.input.extend([1, 2, 3]);
        let mpsse = open(device);
        assert!(mpsse.transport().input.is_empty());
    }

    #[test]
    fn extra_bytes_break_synchronisation() {
        let mut device = SimDevice::ft232h();
        device.sync_noise = vec![0x55];
        let mut mpsse = Mpsse::new(device, MpsseConfig::without_delays()).unwrap();

        match mpsse.open() {
            Err(Error::Sync { response }) => assert_eq!(response, [BAD_COMMAND, CMD_BOGUS, 0x55]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn silent_device_fails_synchronisation() {
        let mut ft = MockTransport::new();
        ft.expect_supports_mpsse().return_const(true);
        ft.expect_supports_enhanced_mpsse().return_const(false);
        ft.expect_supports_open_drain().return_const(false);
        ft.expect_open().times(1).returning(|| Ok(()));
        ft.expect_queued_byte_count().returning(|| Ok(0));
        ft.expect_set_usb_transfer_sizes().returning(|_, _| Ok(()));
        ft.expect_set_timeouts().returning(|_, _| Ok(()));
        ft.expect_set_latency_timer().returning(|_| Ok(()));
        ft.expect_set_bit_mode().returning(|_, _| Ok(()));
        ft.expect_write()
            .with(eq(vec![CMD_BOGUS]))
            .times(1)
            .returning(|_: &[u8]| Ok(()));

        let mut config = MpsseConfig::without_delays();
        config.sync_polls = 3;
        let mut mpsse = Mpsse::new(ft, config).unwrap();
        assert!(matches!(mpsse.open(), Err(Error::Sync { .. })));
    }

    #[test]
    fn close_resets_bit_mode_before_releasing() {
        let mut ft = MockTransport::new();
        let mut seq = Sequence::new();
        ft.expect_supports_mpsse().return_const(true);
        ft.expect_supports_enhanced_mpsse().return_const(true);
        ft.expect_supports_open_drain().return_const(true);
        ft.expect_set_bit_mode()
            .with(eq(0), eq(BitMode::Reset))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(Error::transport("stalled")));
        ft.expect_close()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));

        let mut mpsse = Mpsse::new(ft, MpsseConfig::default()).unwrap();
        assert!(matches!(mpsse.close(), Err(Error::Transport(_))));
    }

    #[test]
    fn divisor_never_overshoots() {
        for device in [SimDevice::ft232h(), SimDevice::ft2232c()] {
            let mut mpsse = open(device);
            let enhanced = mpsse.capabilities().enhanced;
            let mut previous = 0;
            let mut frequency = 100u32;
            while frequency <= SIXTY_MHZ {
                let divisor = mpsse.configure_clock(frequency).unwrap();
                mpsse.execute().unwrap();

                let high_speed = enhanced && frequency > TWELVE_MHZ;
                let base = if high_speed { SIXTY_MHZ } else { TWELVE_MHZ };
                // exact comparison, no rounding
                assert!(
                    u64::from(base) <= u64::from(frequency) * 2 * (1 + u64::from(divisor)),
                    "{} Hz, divisor {}",
                    frequency,
                    divisor
                );
                let actual = actual_frequency(divisor, high_speed);
                assert!(actual <= frequency, "{} Hz gave {} Hz", frequency, actual);
                assert!(actual >= previous, "{} Hz slower than {} Hz", frequency, previous);
                previous = actual;
                frequency = frequency + frequency / 16 + 1;
            }
        }
    }

    #[test]
    fn divisor_is_monotonic_across_the_divider_switch() {
        let below = actual_frequency(clock_divisor(TWELVE_MHZ, false), false);
        let above = actual_frequency(clock_divisor(TWELVE_MHZ + 1, true), true);
        assert_eq!(below, 6_000_000);
        assert_eq!(above, 10_000_000);
    }

    #[test]
    fn divisor_examples() {
        assert_eq!(clock_divisor(100_000, false), 59);
        assert_eq!(clock_divisor(600_000, false), 9);
        assert_eq!(clock_divisor(30_000_000, true), 0);
        assert_eq!(clock_divisor(100, false), 59_999);
        assert_eq!(clock_divisor(1, false), u16::MAX);
        assert_eq!(clock_divisor(0, true), u16::MAX);
        assert_eq!(clock_divisor(SIXTY_MHZ, false), 0);
    }

    #[test]
    fn clock_command_follows_capabilities() {
        let mut mpsse = open(SimDevice::ft232h());
        mpsse.transport_mut().clear_log();

        assert_eq!(mpsse.configure_clock(100_000).unwrap(), 59);
        assert_eq!(mpsse.configure_clock(30_000_000).unwrap(), 0);
        mpsse.execute().unwrap();
        assert_eq!(
            mpsse.transport().writes,
            [vec![0x8b, 0x86, 59, 0, 0x8a, 0x86, 0, 0]]
        );

        let mut old = open(SimDevice::ft2232c());
        old.transport_mut().clear_log();
        assert_eq!(old.configure_clock(30_000_000).unwrap(), 0);
        assert_eq!(old.configure_clock(100).unwrap(), 59_999);
        old.execute().unwrap();
        assert_eq!(old.transport().writes, [vec![0x86, 0, 0, 0x86, 0x5f, 0xea]]);
    }

    #[test]
    fn gated_commands_are_skipped_on_older_chips() {
        let mut mpsse = open(SimDevice::ft2232c());
        mpsse.transport_mut().clear_log();
        mpsse.enable_adaptive_clock().unwrap();
        mpsse.enable_three_phase_clock().unwrap();
        mpsse.enable_clock_divider().unwrap();
        mpsse.enable_loopback().unwrap();
        assert_eq!(mpsse.queue().pending(), &[0x84]);
    }

    #[test]
    fn pin_access() {
        let mut mpsse = open(SimDevice::ft232h());
        mpsse.transport_mut().clear_log();
        mpsse.transport_mut().pins_low = 0x04;
        mpsse.transport_mut().pins_high = 0x80;

        mpsse.set_data_bits_low(0x08, 0x0b).unwrap();
        mpsse.set_data_bits_high(0x00, 0x00).unwrap();
        mpsse.configure_open_drain_outputs(0x03, 0x00).unwrap();
        assert_eq!(mpsse.read_data_bits_low().unwrap(), 0x04);
        assert_eq!(mpsse.read_data_bits_high().unwrap(), 0x80);
        assert_eq!(
            mpsse.transport().writes[0],
            [0x80, 0x08, 0x0b, 0x82, 0x00, 0x00, 0x9e, 0x03, 0x00, 0x81, 0x87]
        );
        mpsse.expect_no_input().unwrap();
    }

    #[test]
    fn stray_input_is_reported() {
        let mut mpsse = open(SimDevice::ft232h());
        mpsse.transport_mut().input.extend([0xfa, 0x00]);
        assert!(matches!(mpsse.expect_no_input(), Err(Error::UnexpectedInput(2))));
    }
}
