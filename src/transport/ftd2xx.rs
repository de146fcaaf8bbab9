//! `Transport` on top of FTDI's D2XX driver.  Needs the vendor library at link time, hence the
//! `ftd2xx` feature.
use std::fmt;
use std::time::Duration;

use libftd2xx::{DeviceInfo, DeviceType, Ftdi, FtdiCommon};

use crate::transport::{BitMode, ChipType, Transport};
use crate::{Error, Result};

#[derive(Debug, Clone)]
enum Selector {
    Description(String),
    SerialNumber(String),
}

impl Selector {
    fn matches(&self, info: &DeviceInfo) -> bool {
        match self {
            Selector::Description(description) => info.description == *description,
            Selector::SerialNumber(serial) => info.serial_number == *serial,
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Description(description) => write!(f, "with description {:?}", description),
            Selector::SerialNumber(serial) => write!(f, "with serial number {:?}", serial),
        }
    }
}

fn chip_type(device_type: DeviceType) -> ChipType {
    match device_type {
        DeviceType::FTBM => ChipType::Ft232Bm,
        DeviceType::FTAM => ChipType::Ft232Am,
        DeviceType::FT100AX => ChipType::Ft100Ax,
        DeviceType::FT2232C => ChipType::Ft2232C,
        DeviceType::FT232R => ChipType::Ft232R,
        DeviceType::FT2232H => ChipType::Ft2232H,
        DeviceType::FT4232H => ChipType::Ft4232H,
        DeviceType::FT232H => ChipType::Ft232H,
        DeviceType::FT_X_SERIES => ChipType::FtXSeries,
        _ => ChipType::Unknown,
    }
}

/// One channel of an FTDI chip, e.g. "Dual RS232-HS A" for the first channel of an FT2232H.
/// The device is located when the transport is created and opened by [`Transport::open`].
pub struct Ftd2xxTransport {
    selector: Selector,
    chip: ChipType,
    ft: Option<Ftdi>,
}

impl Ftd2xxTransport {
    pub fn with_description(description: &str) -> Result<Self> {
        Self::find(Selector::Description(description.to_owned()))
    }

    pub fn with_serial_number(serial_number: &str) -> Result<Self> {
        Self::find(Selector::SerialNumber(serial_number.to_owned()))
    }

    fn find(selector: Selector) -> Result<Self> {
        let devices = libftd2xx::list_devices().map_err(Error::transport)?;
        let info = devices
            .iter()
            .find(|info| selector.matches(info))
            .ok_or_else(|| Error::transport(format!("no FTDI device {}", selector)))?;

        let chip = chip_type(info.device_type);
        log::debug!("found {:?} {}", chip, selector);
        Ok(Self {
            selector,
            chip,
            ft: None,
        })
    }

    pub fn chip_type(&self) -> ChipType {
        self.chip
    }

    fn ft(&mut self) -> Result<&mut Ftdi> {
        self.ft.as_mut().ok_or_else(|| Error::transport("device is not open"))
    }
}

impl Transport for Ftd2xxTransport {
    fn open(&mut self) -> Result<()> {
        let ft = match &self.selector {
            Selector::Description(description) => Ftdi::with_description(description),
            Selector::SerialNumber(serial) => Ftdi::with_serial_number(serial),
        };
        self.ft = Some(ft.map_err(Error::transport)?);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut ft) = self.ft.take() {
            ft.close().map_err(Error::transport)?;
        }
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.ft()?.write_all(data).map_err(Error::transport)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.ft()?.read(buf).map_err(Error::transport)
    }

    fn queued_byte_count(&mut self) -> Result<usize> {
        self.ft()?.queue_status().map_err(Error::transport)
    }

    fn set_bit_mode(&mut self, direction_mask: u8, mode: BitMode) -> Result<()> {
        let mode = match mode {
            BitMode::Reset => libftd2xx::BitMode::Reset,
            BitMode::AsyncBitbang => libftd2xx::BitMode::AsyncBitbang,
            BitMode::Mpsse => libftd2xx::BitMode::Mpsse,
            BitMode::SyncBitbang => libftd2xx::BitMode::SyncBitbang,
            BitMode::McuHost => libftd2xx::BitMode::McuHost,
            BitMode::FastSerial => libftd2xx::BitMode::FastSerial,
            BitMode::CbusBitbang => libftd2xx::BitMode::CbusBitbang,
            BitMode::SyncFifo => libftd2xx::BitMode::SyncFifo,
        };
        self.ft()?.set_bit_mode(direction_mask, mode).map_err(Error::transport)
    }

    fn set_usb_transfer_sizes(&mut self, in_size: u32, _out_size: u32) -> Result<()> {
        // D2XX ignores the OUT size, libftd2xx only takes the IN one
        self.ft()?.set_usb_parameters(in_size).map_err(Error::transport)
    }

    fn set_timeouts(&mut self, read: Duration, write: Duration) -> Result<()> {
        self.ft()?.set_timeouts(read, write).map_err(Error::transport)
    }

    fn set_latency_timer(&mut self, latency: Duration) -> Result<()> {
        self.ft()?.set_latency_timer(latency).map_err(Error::transport)
    }

    fn supports_mpsse(&self) -> bool {
        self.chip.capabilities().mpsse
    }

    fn supports_enhanced_mpsse(&self) -> bool {
        self.chip.capabilities().enhanced
    }

    fn supports_open_drain(&self) -> bool {
        self.chip.capabilities().open_drain
    }
}
