//! A software stand-in for an MPSSE channel.  It decodes the command stream well enough to know
//! how many bytes each command sends back, answers the bad-command opcode the way the chip does and
//! follows TMS so tests can check which TAP states a JTAG sequence visits.
use std::collections::VecDeque;
use std::time::Duration;

use crate::statemachine::TapState;
use crate::transport::{BitMode, Capabilities, ChipType, Transport};
use crate::{Error, Result};

pub struct SimDevice {
    pub caps: Capabilities,
    /// Every transfer written, in order.
    pub writes: Vec<Vec<u8>>,
    /// Every command decoded from `writes`, opcode first.
    pub commands: Vec<Vec<u8>>,
    /// Bytes waiting to be read by the host.
    pub input: VecDeque<u8>,
    /// Bytes the target drives back for data clocking commands, consumed in order.  Once empty,
    /// zeros are returned.
    pub script: VecDeque<u8>,
    /// Value returned by the read-pins commands.
    pub pins_low: u8,
    pub pins_high: u8,
    pub bit_modes: Vec<(u8, BitMode)>,
    pub transfer_sizes: Option<(u32, u32)>,
    pub timeouts: Option<(Duration, Duration)>,
    pub latency: Option<Duration>,
    pub open: bool,
    pub fail_writes: bool,
    /// Reads return nothing, as if the chip stopped answering.
    pub mute: bool,
    /// Extra bytes answered to the synchronisation opcode.
    pub sync_noise: Vec<u8>,
    pub tap: TapState,
    /// Each TAP state entered, in order.
    pub tap_trace: Vec<TapState>,
    tms: bool,
}

impl SimDevice {
    pub fn new(chip: ChipType) -> Self {
        Self {
            caps: chip.capabilities(),
            writes: Vec::new(),
            commands: Vec::new(),
            input: VecDeque::new(),
            script: VecDeque::new(),
            pins_low: 0,
            pins_high: 0,
            bit_modes: Vec::new(),
            transfer_sizes: None,
            timeouts: None,
            latency: None,
            open: false,
            fail_writes: false,
            mute: false,
            sync_noise: Vec::new(),
            tap: TapState::Idle,
            tap_trace: Vec::new(),
            tms: false,
        }
    }

    pub fn ft232h() -> Self {
        Self::new(ChipType::Ft232H)
    }

    pub fn ft2232h() -> Self {
        Self::new(ChipType::Ft2232H)
    }

    pub fn ft2232c() -> Self {
        Self::new(ChipType::Ft2232C)
    }

    /// Commands starting with `opcode`.
    pub fn commands_with(&self, opcode: u8) -> Vec<&[u8]> {
        self.commands
            .iter()
            .filter(|cmd| cmd[0] == opcode)
            .map(|cmd| cmd.as_slice())
            .collect()
    }

    /// Forget everything recorded so far.
    pub fn clear_log(&mut self) {
        self.writes.clear();
        self.commands.clear();
        self.tap_trace.clear();
    }

    fn respond(&mut self, count: usize) {
        for _ in 0..count {
            let byte = self.script.pop_front().unwrap_or(0);
            self.input.push_back(byte);
        }
    }

    fn clock_tap(&mut self, tms: bool, clocks: usize) {
        for _ in 0..clocks {
            let next = self.tap.next(tms);
            if next != self.tap {
                self.tap_trace.push(next);
            }
            self.tap = next;
        }
        self.tms = tms;
    }

    /// Decode one command at the start of `data`, returning its length.
    fn execute(&mut self, data: &[u8]) -> usize {
        let opcode = data[0];
        let len = match opcode {
            0x80 | 0x82 => {
                if opcode == 0x80 && data[2] & 0x08 != 0 {
                    self.tms = data[1] & 0x08 != 0;
                }
                3
            }
            0x81 => {
                self.input.push_back(self.pins_low);
                1
            }
            0x83 => {
                self.input.push_back(self.pins_high);
                1
            }
            0x86 | 0x9e => 3,
            0x84 | 0x85 | 0x87 | 0x8a | 0x8b | 0x8c | 0x8d | 0x96 | 0x97 => 1,
            op if op < 0x80 => {
                let reads = op & 0x20 != 0;
                let writes = op & 0x10 != 0;
                if op & 0x40 != 0 {
                    let clocks = data[1] as usize + 1;
                    let value = data[2];
                    for bit in 0..clocks {
                        self.clock_tap(value & (1 << bit) != 0, 1);
                    }
                    if reads {
                        self.respond(1);
                    }
                    3
                } else if op & 0x02 != 0 {
                    let clocks = data[1] as usize + 1;
                    self.clock_tap(self.tms, clocks);
                    if reads {
                        self.respond(1);
                    }
                    if writes {
                        3
                    } else {
                        2
                    }
                } else {
                    let count = u16::from_le_bytes([data[1], data[2]]) as usize + 1;
                    self.clock_tap(self.tms, count * 8);
                    if reads {
                        self.respond(count);
                    }
                    if writes {
                        3 + count
                    } else {
                        3
                    }
                }
            }
            op => {
                self.input.push_back(0xfa);
                self.input.push_back(op);
                if op == 0xaa {
                    let noise = self.sync_noise.clone();
                    self.input.extend(noise);
                }
                1
            }
        };
        self.commands.push(data[..len].to_vec());
        len
    }
}

impl Transport for SimDevice {
    fn open(&mut self) -> Result<()> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.fail_writes {
            return Err(Error::transport("device unplugged"));
        }
        self.writes.push(data.to_vec());
        let mut offset = 0;
        while offset < data.len() {
            offset += self.execute(&data[offset..]);
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.mute {
            return Ok(0);
        }
        let n = buf.len().min(self.input.len());
        for (slot, byte) in buf.iter_mut().zip(self.input.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn queued_byte_count(&mut self) -> Result<usize> {
        Ok(self.input.len())
    }

    fn set_bit_mode(&mut self, direction_mask: u8, mode: BitMode) -> Result<()> {
        self.bit_modes.push((direction_mask, mode));
        Ok(())
    }

    fn set_usb_transfer_sizes(&mut self, in_size: u32, out_size: u32) -> Result<()> {
        self.transfer_sizes = Some((in_size, out_size));
        Ok(())
    }

    fn set_timeouts(&mut self, read: Duration, write: Duration) -> Result<()> {
        self.timeouts = Some((read, write));
        Ok(())
    }

    fn set_latency_timer(&mut self, latency: Duration) -> Result<()> {
        self.latency = Some(latency);
        Ok(())
    }

    fn supports_mpsse(&self) -> bool {
        self.caps.mpsse
    }

    fn supports_enhanced_mpsse(&self) -> bool {
        self.caps.enhanced
    }

    fn supports_open_drain(&self) -> bool {
        self.caps.open_drain
    }
}
