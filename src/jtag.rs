//! JTAG over the MPSSE engine.  TCK, TDI, TDO and TMS sit on ADBUS0..3; the other pins are left
//! as inputs.  `Jtag` tracks the TAP state and moves between stable states along the paths SVF
//! prescribes.
use ftdi_mpsse::{ClockBits, ClockData, ClockTMS, ClockTMSOut, MpsseCmdBuilder};

use crate::mpsse::Mpsse;
use crate::statemachine::{pack_tms, TapState, RESET_TMS};
use crate::transport::Transport;
use crate::{Error, Result};

// Lower pins.  TDO (ADBUS2) stays an input.
const PIN_TCK: u8 = 1;
const PIN_TDI: u8 = 1 << 1;
const PIN_TMS: u8 = 1 << 3;
const LOWER_OUTPUT_PINS: u8 = PIN_TCK | PIN_TDI | PIN_TMS;

/// A single TMS command clocks at most 7 bits.
const MAX_TMS_BITS: usize = 7;
/// A single byte shift command moves at most 65536 bytes.
const MAX_SHIFT_BYTES: usize = 65536;

#[derive(Debug, Clone)]
pub struct JtagConfig {
    /// TCK frequency in hertz.
    pub frequency: u32,
    /// State the TAP is left in after an IR scan.
    pub end_ir: TapState,
    /// State the TAP is left in after a DR scan.
    pub end_dr: TapState,
}

impl Default for JtagConfig {
    fn default() -> Self {
        Self {
            frequency: 100_000,
            end_ir: TapState::Idle,
            end_dr: TapState::Idle,
        }
    }
}

pub struct Jtag<T> {
    mpsse: Mpsse<T>,
    state: TapState,
    end_ir: TapState,
    end_dr: TapState,
    frequency: u32,
}

/// Scans end in Exit1 and must be able to reach the end state from there.
fn check_end_state(exit: TapState, end: TapState) -> Result<TapState> {
    if end.is_stable() && exit.svf_path(end).is_some() {
        Ok(end)
    } else {
        Err(Error::NoPath {
            from: exit,
            to: end,
        })
    }
}

impl<T: Transport> Jtag<T> {
    pub fn new(mpsse: Mpsse<T>, config: JtagConfig) -> Result<Self> {
        Ok(Self {
            mpsse,
            state: TapState::Reset,
            end_ir: check_end_state(TapState::Exit1IR, config.end_ir)?,
            end_dr: check_end_state(TapState::Exit1DR, config.end_dr)?,
            frequency: config.frequency,
        })
    }

    /// Bring up the MPSSE, drive the JTAG pins, start TCK and reset the TAP.
    pub fn open(&mut self) -> Result<()> {
        log::debug!("Jtag::open({} Hz)", self.frequency);
        self.mpsse.open()?;

        // TCK, TDI low, TMS high; TDO and the GPIOs are inputs
        self.mpsse.set_data_bits_low(PIN_TMS, LOWER_OUTPUT_PINS)?;
        self.mpsse.set_data_bits_high(0, 0)?;
        self.mpsse.start_clock(self.frequency)?;

        self.reset()?;
        self.mpsse.expect_no_input()
    }

    pub fn close(&mut self) -> Result<()> {
        self.mpsse.close()
    }

    /// Hold TMS high for five clocks, which reaches Reset from any state.
    pub fn reset(&mut self) -> Result<()> {
        self.queue_tms(&RESET_TMS)?;
        self.mpsse.execute()?;
        self.state = TapState::Reset;
        Ok(())
    }

    /// Clock `count` (1 to 7) TMS bits from `value`, LSB first.  The tracked state follows.
    pub fn alter_tms(&mut self, count: usize, value: u8) -> Result<()> {
        if count == 0 || count > MAX_TMS_BITS {
            return Err(Error::InvalidBitCount {
                bits: count,
                bytes: 1,
            });
        }

        let tms: Vec<bool> = (0..count).map(|bit| value & (1 << bit) != 0).collect();
        self.queue_tms(&tms)?;
        self.mpsse.execute()?;
        self.state = tms.iter().fold(self.state, |state, &bit| state.next(bit));
        Ok(())
    }

    /// Move the TAP to `to` along the SVF path.
    pub fn transition_to(&mut self, to: TapState) -> Result<()> {
        self.queue_transition(to)?;
        self.mpsse.execute()
    }

    /// Shift `bit_count` bits of `out` (LSB first) through the instruction register, then move
    /// to the IR end state.  Returns the bits captured from TDO, packed the same way.
    pub fn scan_ir(&mut self, bit_count: usize, out: &[u8]) -> Result<Vec<u8>> {
        self.scan(TapState::ShiftIR, TapState::Exit1IR, self.end_ir, bit_count, out)
    }

    /// Shift `bit_count` bits of `out` (LSB first) through the data register, then move to the
    /// DR end state.  Returns the bits captured from TDO, packed the same way.
    pub fn scan_dr(&mut self, bit_count: usize, out: &[u8]) -> Result<Vec<u8>> {
        self.scan(TapState::ShiftDR, TapState::Exit1DR, self.end_dr, bit_count, out)
    }

    /// Read the data register while shifting in zeros.
    pub fn scan_dr_zeros(&mut self, bit_count: usize) -> Result<Vec<u8>> {
        let zeros = vec![0; bit_count.div_ceil(8)];
        self.scan_dr(bit_count, &zeros)
    }

    /// State to enter after IR scans.  Only Reset, Idle, PauseDR and PauseIR are allowed.
    pub fn set_end_ir(&mut self, state: TapState) -> Result<()> {
        self.end_ir = check_end_state(TapState::Exit1IR, state)?;
        Ok(())
    }

    /// State to enter after DR scans.  Only Reset, Idle, PauseDR and PauseIR are allowed.
    pub fn set_end_dr(&mut self, state: TapState) -> Result<()> {
        self.end_dr = check_end_state(TapState::Exit1DR, state)?;
        Ok(())
    }

    pub fn state(&self) -> TapState {
        self.state
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

    fn scan(
        &mut self,
        shift: TapState,
        exit: TapState,
        end: TapState,
        bit_count: usize,
        out: &[u8],
    ) -> Result<Vec<u8>> {
        let bytes = bit_count.div_ceil(8);
        if bit_count == 0 || out.len() != bytes {
            return Err(Error::InvalidBitCount {
                bits: bit_count,
                bytes: out.len(),
            });
        }
        log::trace!("scan {:?}: {} bits", shift, bit_count);

        // The whole scan goes out in one transfer.  If anything fails the TAP position is unknown
        // and the caller has to reset.
        self.queue_transition(shift)?;
        let (full, extra) = self.queue_shift(bit_count, out)?;
        self.state = exit;
        self.queue_transition(end)?;
        self.mpsse.send_immediate()?;
        self.mpsse.execute()?;

        let response_len = full + usize::from(extra > 1) + 1;
        let raw = self.mpsse.read(response_len)?;
        Ok(unpack_scan(&raw, full, extra))
    }

    /// Queue the data shift.  The last bit goes out with the TMS command that leaves the shift
    /// state, so the register is exited on the same clock that captures it.  Returns the number
    /// of whole bytes and the number of bits (1 to 8) in the final byte.
    fn queue_shift(&mut self, bit_count: usize, out: &[u8]) -> Result<(usize, usize)> {
        let mut full = bit_count / 8;
        let mut extra = bit_count % 8;
        if extra == 0 {
            full -= 1;
            extra = 8;
        }

        let mut builder = MpsseCmdBuilder::new();
        for chunk in out[..full].chunks(MAX_SHIFT_BYTES) {
            builder = builder.clock_data(ClockData::LsbPosIn, chunk);
        }
        let last_byte = out[full];
        if extra > 1 {
            builder = builder.clock_bits(ClockBits::LsbPosIn, last_byte, (extra - 1) as u8);
        }
        let last_bit = last_byte & (1 << (extra - 1)) != 0;
        builder = builder.clock_tms(ClockTMS::NegTMSPosTDO, 1, last_bit, 1);

        self.mpsse.enqueue(builder.as_slice())?;
        Ok((full, extra))
    }

    fn queue_transition(&mut self, to: TapState) -> Result<()> {
        let tms = self.state.tms_path(to)?;
        self.queue_tms(&tms)?;
        self.state = to;
        Ok(())
    }

    fn queue_tms(&mut self, tms: &[bool]) -> Result<()> {
        let mut builder = MpsseCmdBuilder::new();
        for chunk in tms.chunks(MAX_TMS_BITS) {
            builder = builder.clock_tms_out(
                ClockTMSOut::NegEdge,
                pack_tms(chunk),
                false,
                chunk.len() as u8,
            );
        }
        self.mpsse.enqueue(builder.as_slice())
    }
}

/// Reassemble the bytes read back for a scan.  The bit shift's byte holds its bits at the top
/// and the TMS command returns its single bit in bit 7.
fn unpack_scan(raw: &[u8], full: usize, extra: usize) -> Vec<u8> {
    let mut result = raw[..full].to_vec();
    let mut next = full;

    let mut last = 0;
    if extra > 1 {
        last = raw[next] >> (8 - (extra - 1));
        next += 1;
    }
    last |= (raw[next] >> 7) << (extra - 1);
    result.push(last);
    result
}
