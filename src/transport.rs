//! The USB side of an MPSSE channel lives behind the `Transport` trait.  Implementations only need
//! to move bytes and apply the handful of driver settings used while opening a channel; everything
//! protocol related is built on top of it by [`Mpsse`](crate::mpsse::Mpsse).
#[cfg(feature = "ftd2xx")]
pub mod ftd2xx;

use std::time::Duration;

use crate::Result;

/// Bit modes understood by the chip's mode register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BitMode {
    Reset = 0x00,
    AsyncBitbang = 0x01,
    Mpsse = 0x02,
    SyncBitbang = 0x04,
    McuHost = 0x08,
    FastSerial = 0x10,
    CbusBitbang = 0x20,
    SyncFifo = 0x40,
}

#[cfg_attr(test, mockall::automock)]
pub trait Transport {
    /// Claim the channel.
    fn open(&mut self) -> Result<()>;
    /// Release the channel.
    fn close(&mut self) -> Result<()>;
    /// Send all of `data` as one transfer.  A partial write is an error.
    fn write(&mut self, data: &[u8]) -> Result<()>;
    /// Read up to `buf.len()` bytes, blocking until the buffer is full or the read timeout
    /// elapses.  Returns the number of bytes read.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
    /// Number of bytes waiting in the device's input queue.
    fn queued_byte_count(&mut self) -> Result<usize>;
    fn set_bit_mode(&mut self, direction_mask: u8, mode: BitMode) -> Result<()>;
    fn set_usb_transfer_sizes(&mut self, in_size: u32, out_size: u32) -> Result<()>;
    fn set_timeouts(&mut self, read: Duration, write: Duration) -> Result<()>;
    fn set_latency_timer(&mut self, latency: Duration) -> Result<()>;

    fn supports_mpsse(&self) -> bool;
    /// FT2232H, FT4232H and FT232H understand the extra clocking commands (divide-by-5 bypass,
    /// adaptive and three-phase clocking).
    fn supports_enhanced_mpsse(&self) -> bool;
    /// Only the FT232H can drive its outputs open drain.
    fn supports_open_drain(&self) -> bool;
}

/// What the MPSSE engine on a particular chip can do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub mpsse: bool,
    pub enhanced: bool,
    pub open_drain: bool,
}

impl Capabilities {
    pub fn of<T: Transport + ?Sized>(transport: &T) -> Self {
        Self {
            mpsse: transport.supports_mpsse(),
            enhanced: transport.supports_enhanced_mpsse(),
            open_drain: transport.supports_open_drain(),
        }
    }
}

/// FTDI chip families, as far as the MPSSE engine is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipType {
    Ft232Bm,
    Ft232Am,
    Ft100Ax,
    Ft2232C,
    Ft232R,
    Ft2232H,
    Ft4232H,
    Ft232H,
    FtXSeries,
    Ft4222,
    Unknown,
}

impl ChipType {
    pub fn capabilities(self) -> Capabilities {
        match self {
            ChipType::Ft2232C => Capabilities {
                mpsse: true,
                enhanced: false,
                open_drain: false,
            },
            ChipType::Ft2232H | ChipType::Ft4232H => Capabilities {
                mpsse: true,
                enhanced: true,
                open_drain: false,
            },
            ChipType::Ft232H => Capabilities {
                mpsse: true,
                enhanced: true,
                open_drain: true,
            },
            _ => Capabilities::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_ft232h_has_open_drain_outputs() {
        for chip in [
            ChipType::Ft232Bm,
            ChipType::Ft2232C,
            ChipType::Ft232R,
            ChipType::Ft2232H,
            ChipType::Ft4232H,
            ChipType::FtXSeries,
            ChipType::Ft4222,
        ] {
            assert!(!chip.capabilities().open_drain, "{:?}", chip);
        }
        assert_eq!(
            ChipType::Ft232H.capabilities(),
            Capabilities {
                mpsse: true,
                enhanced: true,
                open_drain: true,
            }
        );
    }

    #[test]
    fn ft2232c_is_not_enhanced() {
        let caps = ChipType::Ft2232C.capabilities();
        assert!(caps.mpsse);
        assert!(!caps.enhanced);
        assert!(!ChipType::Ft232R.capabilities().mpsse);
    }

    #[test]
    fn capabilities_follow_the_transport_queries() {
        let mut transport = MockTransport::new();
        transport.expect_supports_mpsse().return_const(true);
        transport.expect_supports_enhanced_mpsse().return_const(true);
        transport.expect_supports_open_drain().return_const(false);

        let caps = Capabilities::of(&transport);
        assert_eq!(caps, ChipType::Ft2232H.capabilities());
    }
}
