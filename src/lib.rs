//! This crate drives JTAG, SPI and I2C buses through the MPSSE engine found in FTDI's
//! FT2232C/D, FT2232H, FT4232H and FT232H USB bridges.
//!
//! At the bottom sits the `Transport` trait, which moves bytes to and from one channel of the
//! chip.  With the `ftd2xx` feature enabled, `Ftd2xxTransport` implements it on top of FTDI's
//! D2XX driver.  Anything else that can talk to the chip (or a simulation of it) can implement
//! it too.
//!
//! `Mpsse` owns a transport and a fixed size command queue.  It brings the engine up,
//! synchronises the command and response streams, works out clock divisors and knows which
//! commands the older FT2232C lacks.
//!
//! `Jtag`, `Spi` and `I2c` sit on top of an `Mpsse` and implement the bus protocols.  `Jtag`
//! keeps track of the TAP state and follows the SVF paths between stable states; `Spi` and `I2c`
//! also implement the `embedded-hal` bus traits.
//!
//! # Example
//! ```no_run
//! # #[cfg(feature = "ftd2xx")]
//! # fn main() -> mpsse_taps::Result<()> {
//! use mpsse_taps::jtag::{Jtag, JtagConfig};
//! use mpsse_taps::mpsse::{Mpsse, MpsseConfig};
//! use mpsse_taps::transport::ftd2xx::Ftd2xxTransport;
//!
//! let ft = Ftd2xxTransport::with_description("Dual RS232-HS A")?;
//! let mut jtag = Jtag::new(Mpsse::new(ft, MpsseConfig::default())?, JtagConfig::default())?;
//! jtag.open()?;
//!
//! jtag.scan_ir(8, &[0xfe])?;
//! let idcode = jtag.scan_dr_zeros(32)?;
//! println!("{:02x?}", idcode);
//! jtag.close()
//! # }
//! # #[cfg(not(feature = "ftd2xx"))]
//! # fn main() {}
//! ```

mod error;

pub mod i2c;
pub mod jtag;
pub mod mpsse;
pub mod queue;
pub mod spi;
pub mod statemachine;
pub mod transport;

#[cfg(test)]
mod mock_device;

pub use error::{AckPhase, Error, Result};
