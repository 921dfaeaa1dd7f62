//! DLMS/COSEM metering client for smart meters attached over HDLC serial links.
//!
//! This crate implements the client side of the two nested protocols used to
//! read electrical measurements from a DLMS meter on a half-duplex RS-485
//! line:
//!
//! - an HDLC data-link layer (IEC 62056-46): CRC-16 checked, flag-delimited
//!   Type-3 frames with modulo-8 sequence numbering ([`hdlc`]), and
//! - a DLMS/COSEM application layer (IEC 62056-53/62): AARQ/AARE association
//!   establishment with LLS password authentication ([`association`]),
//!   GET.request/GET.response attribute access ([`get`]) and the COSEM typed
//!   value encoding ([`data`]).
//!
//! On top of the codec sits a blocking session orchestrator
//! ([`client::MeterClient`], `std` only) that drives a full
//! connect → associate → read → release → disconnect cycle against a catalog
//! of OBIS-addressed register attributes, caching scaler/unit multipliers and
//! skipping attributes the connected meter refuses.
//!
//! The codec modules are `no_std + alloc`; the session client, transport
//! trait and readings record require the default `std` feature.
//!
//! # Example
//!
//! ```no_run
//! use dlms_meter::{MeterClient, MeterConfig};
//! # #[derive(Debug)]
//! # struct Rs485;
//! # impl dlms_meter::Transport for Rs485 {
//! #     type Error = std::io::Error;
//! #     fn send(&mut self, _data: &[u8]) -> Result<usize, Self::Error> { Ok(0) }
//! #     fn recv(&mut self, _buf: &mut [u8], _timeout: std::time::Duration) -> Result<usize, Self::Error> { Ok(0) }
//! #     fn flush_rx(&mut self) {}
//! # }
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let port = Rs485; // any half-duplex serial transport
//! let mut client = MeterClient::new(port, MeterConfig::default());
//!
//! let readings = client.poll()?;
//! println!("U_r = {:.1} V, f = {:.2} Hz", readings.voltage_r, readings.frequency);
//! # Ok(())
//! # }
//! ```

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod association;
mod crc;
pub mod data;
pub mod get;
pub mod hdlc;
mod obis_code;
pub mod unit;

#[cfg(feature = "std")]
pub mod client;
#[cfg(feature = "std")]
pub mod readings;
#[cfg(feature = "std")]
pub mod transport;


pub use crate::crc::crc16;
pub use crate::data::{Data, DataType};
pub use crate::obis_code::ObisCode;
pub use crate::unit::{ScalerUnit, Unit};

#[cfg(feature = "std")]
pub use crate::client::{ClientError, MeterClient, MeterConfig, MeterState};
#[cfg(feature = "std")]
pub use crate::readings::{MeterReadings, OBIS_TABLE, ObisMapping, ReadingSlot};
#[cfg(feature = "std")]
pub use crate::transport::Transport;

use core::fmt;

/// Protocol-level error kinds shared by the framer and the PDU codec.
///
/// Codec functions are pure: they report failures to the immediate caller
/// and never mutate session state. Only [`client::MeterClient`] decides
/// whether a failure is fatal to the association.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Bad input to a builder (empty or oversized information field, short
    /// buffer).
    InvalidArgument,
    /// HCS or FCS disagreed with the received checksum.
    ChecksumMismatch,
    /// Wrong tag, unexpected control byte or malformed structure.
    ProtocolError,
    /// The declared type or length needs more bytes than remain.
    InsufficientData,
    /// Unknown COSEM type tag, or a GET response subtype this client does
    /// not implement (block transfer).
    UnsupportedType(u8),
    /// COSEM Data-Access-Result error, carrying the numeric reason.
    AccessDenied(u8),
    /// The server rejected the association, carrying the AARE result code.
    AssociationRejected(u8),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument => write!(f, "invalid argument"),
            Error::ChecksumMismatch => write!(f, "HDLC checksum mismatch"),
            Error::ProtocolError => write!(f, "protocol error"),
            Error::InsufficientData => write!(f, "insufficient data"),
            Error::UnsupportedType(tag) => write!(f, "unsupported type 0x{tag:02X}"),
            Error::AccessDenied(code) => write!(f, "data access error {code}"),
            Error::AssociationRejected(result) => {
                write!(f, "association rejected (result={result})")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

impl<I> nom::error::ParseError<I> for Error {
    fn from_error_kind(_input: I, _kind: nom::error::ErrorKind) -> Self {
        Error::ProtocolError
    }

    fn append(_input: I, _kind: nom::error::ErrorKind, other: Self) -> Self {
        other
    }
}

/// Collapses a nom error into the crate error, mapping `Incomplete` onto
/// [`Error::InsufficientData`].
pub(crate) fn map_nom_error(err: nom::Err<Error>) -> Error {
    match err {
        nom::Err::Incomplete(_) => Error::InsufficientData,
        nom::Err::Error(e) | nom::Err::Failure(e) => e,
    }
}
