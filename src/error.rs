use std::error;

use crate::statemachine::TapState;

/// Which part of an I2C transfer was not acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckPhase {
    Address,
    Data,
}

/// The error type used by this library.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The transport (USB driver, D2XX library, ...) reported a failure.
    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn error::Error + Send + Sync>),

    /// Fewer bytes than expected arrived before the read timeout elapsed.
    #[error("read timed out: expected {expected} bytes, received {received}")]
    Timeout { expected: usize, received: usize },

    /// The bad-command echo used to align the command and response streams did not match.
    #[error("unable to synchronise MPSSE, response was {response:02x?}")]
    Sync { response: Vec<u8> },

    /// Bytes were waiting in the input queue once setup finished.
    #[error("{0} unexpected bytes in the input queue")]
    UnexpectedInput(usize),

    /// The device has no MPSSE engine.
    #[error("device is not MPSSE capable")]
    NotMpsseCapable,

    /// The MPSSE engine can only clock SPI data on a single edge (modes 0 and 2).
    #[error("SPI mode is not supported by the MPSSE engine")]
    UnsupportedSpiMode,

    /// A shift was requested with a bit count that does not fit the supplied data.
    #[error("cannot shift {bits} bits with {bytes} bytes of data")]
    InvalidBitCount { bits: usize, bytes: usize },

    /// The command queue cannot hold the bytes of the current transaction.
    #[error("command queue overflow: {requested} bytes requested, {available} available")]
    QueueOverflow { requested: usize, available: usize },

    /// The TAP cannot be navigated between these states.
    #[error("no TAP path from {from:?} to {to:?}")]
    NoPath { from: TapState, to: TapState },

    /// An I2C target did not acknowledge (only reported by the `embedded-hal` adapter).
    #[error("I2C {0:?} phase not acknowledged")]
    NoAcknowledge(AckPhase),
}

impl Error {
    /// Wrap an error raised by a [`Transport`](crate::transport::Transport) implementation.
    pub fn transport(inner: impl Into<Box<dyn error::Error + Send + Sync>>) -> Self {
        Error::Transport(inner.into())
    }
}

impl embedded_hal::i2c::Error for Error {
    fn kind(&self) -> embedded_hal::i2c::ErrorKind {
        use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};

        match self {
            Error::NoAcknowledge(AckPhase::Address) => {
                ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)
            }
            Error::NoAcknowledge(AckPhase::Data) => {
                ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data)
            }
            Error::Transport(_) | Error::Timeout { .. } => ErrorKind::Bus,
            _ => ErrorKind::Other,
        }
    }
}

impl embedded_hal::spi::Error for Error {
    fn kind(&self) -> embedded_hal::spi::ErrorKind {
        match self {
            Error::UnsupportedSpiMode => embedded_hal::spi::ErrorKind::FrameFormat,
            _ => embedded_hal::spi::ErrorKind::Other,
        }
    }
}

/// A result type with the error hardwired to [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
