//! COSEM typed value decoding (A-XDR, IEC 62056-62).
//!
//! The GET service returns attribute values as a type tag followed by a
//! big-endian payload. [`Data::decode`] maps `(tag, bytes)` to a typed
//! variant plus the number of bytes consumed.
//!
//! The decoder is deliberately non-recursive: for `Structure` and `Array`
//! only the element count is captured and the caller walks the elements —
//! the only aggregate this client ever unwraps is the Register class
//! scaler_unit structure (see [`crate::unit::ScalerUnit`]).

use alloc::vec::Vec;
use core::convert::TryFrom;

use derive_try_from_primitive::TryFromPrimitive;
use nom::{
    IResult, Parser,
    bytes::streaming::take,
    number::streaming::{be_f32, be_f64, be_i16, be_i32, be_i64, be_u16, be_u32, be_u64, i8, u8},
};

use crate::{Error, map_nom_error};

/// Longest octet-string/visible-string content kept by the decoder; longer
/// sources are truncated to this capture size (the declared length is still
/// consumed).
pub const STRING_CAPTURE_MAX: usize = 128;

/// COSEM data type tags (Blue Book, Table "Data" choice).
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
#[non_exhaustive]
#[rustfmt::skip]
pub enum DataType {
    Null               =  0,
    Array              =  1,
    Structure          =  2,
    Bool               =  3,
    DoubleLong         =  5,
    DoubleLongUnsigned =  6,
    OctetString        =  9,
    VisibleString      = 10,
    Integer            = 15,
    Long               = 16,
    Unsigned           = 17,
    LongUnsigned       = 18,
    Long64             = 20,
    Long64Unsigned     = 21,
    Enum               = 22,
    Float32            = 23,
    Float64            = 24,
}

/// A decoded COSEM value.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
#[non_exhaustive]
pub enum Data {
    Null,
    Bool(bool),
    Integer(i8),
    Unsigned(u8),
    Long(i16),
    LongUnsigned(u16),
    DoubleLong(i32),
    DoubleLongUnsigned(u32),
    Long64(i64),
    Long64Unsigned(u64),
    Float32(f32),
    Float64(f64),
    Enum(u8),
    OctetString(Vec<u8>),
    VisibleString(Vec<u8>),
    /// Element count only; the elements follow in the input.
    Structure(u8),
    /// Element count only; the elements follow in the input.
    Array(u8),
}

impl Data {
    pub fn parse(input: &[u8]) -> IResult<&[u8], Self, Error> {
        let (input, tag) = u8(input)?;
        let data_type = DataType::try_from(tag)
            .map_err(|tag| nom::Err::Failure(Error::UnsupportedType(tag)))?;

        Ok(match data_type {
            DataType::Null => (input, Data::Null),
            DataType::Bool => {
                let (input, b) = u8(input)?;
                (input, Data::Bool(b != 0))
            }
            DataType::Integer => {
                let (input, n) = i8(input)?;
                (input, Data::Integer(n))
            }
            DataType::Unsigned => {
                let (input, n) = u8(input)?;
                (input, Data::Unsigned(n))
            }
            DataType::Long => {
                let (input, n) = be_i16(input)?;
                (input, Data::Long(n))
            }
            DataType::LongUnsigned => {
                let (input, n) = be_u16(input)?;
                (input, Data::LongUnsigned(n))
            }
            DataType::DoubleLong => {
                let (input, n) = be_i32(input)?;
                (input, Data::DoubleLong(n))
            }
            DataType::DoubleLongUnsigned => {
                let (input, n) = be_u32(input)?;
                (input, Data::DoubleLongUnsigned(n))
            }
            DataType::Long64 => {
                let (input, n) = be_i64(input)?;
                (input, Data::Long64(n))
            }
            DataType::Long64Unsigned => {
                let (input, n) = be_u64(input)?;
                (input, Data::Long64Unsigned(n))
            }
            DataType::Float32 => {
                let (input, n) = be_f32(input)?;
                (input, Data::Float32(n))
            }
            DataType::Float64 => {
                let (input, n) = be_f64(input)?;
                (input, Data::Float64(n))
            }
            DataType::Enum => {
                let (input, n) = u8(input)?;
                (input, Data::Enum(n))
            }
            DataType::OctetString => {
                let (input, bytes) = parse_string(input)?;
                (input, Data::OctetString(bytes))
            }
            DataType::VisibleString => {
                let (input, bytes) = parse_string(input)?;
                (input, Data::VisibleString(bytes))
            }
            DataType::Structure => {
                let (input, count) = u8(input)?;
                (input, Data::Structure(count))
            }
            DataType::Array => {
                let (input, count) = u8(input)?;
                (input, Data::Array(count))
            }
        })
    }

    /// Decodes one value, returning it together with the number of bytes
    /// consumed from `input`.
    ///
    /// Fails with [`Error::InsufficientData`] when the tag's declared size
    /// exceeds the remaining buffer and [`Error::UnsupportedType`] for any
    /// tag outside [`DataType`].
    pub fn decode(input: &[u8]) -> Result<(Self, usize), Error> {
        match Self::parse(input) {
            Ok((rest, value)) => Ok((value, input.len() - rest.len())),
            Err(err) => Err(map_nom_error(err)),
        }
    }

    /// Widens a numeric value to `f64`: unsigned types (and `Enum`) as
    /// unsigned, signed types as signed, floats pass through. `None` for
    /// every non-numeric variant.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Data::Unsigned(n) => Some(n as f64),
            Data::LongUnsigned(n) => Some(n as f64),
            Data::DoubleLongUnsigned(n) => Some(n as f64),
            Data::Long64Unsigned(n) => Some(n as f64),
            Data::Enum(n) => Some(n as f64),
            Data::Integer(n) => Some(n as f64),
            Data::Long(n) => Some(n as f64),
            Data::DoubleLong(n) => Some(n as f64),
            Data::Long64(n) => Some(n as f64),
            Data::Float32(n) => Some(n as f64),
            Data::Float64(n) => Some(n),
            _ => None,
        }
    }
}

/// Length-prefixed string content, truncated to [`STRING_CAPTURE_MAX`].
fn parse_string(input: &[u8]) -> IResult<&[u8], Vec<u8>, Error> {
    let (input, len) = u8(input)?;
    let (input, bytes) = take(len as usize).parse(input)?;
    let keep = bytes.len().min(STRING_CAPTURE_MAX);
    Ok((input, bytes[..keep].to_vec()))
}
