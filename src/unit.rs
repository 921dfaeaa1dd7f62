//! DLMS unit codes and the Register scaler_unit attribute.

use core::convert::TryFrom;
use core::fmt;

use derive_try_from_primitive::TryFromPrimitive;

use crate::{Data, Error};

/// DLMS unit codes reported by electricity meters (Blue Book unit table,
/// electrical subset).
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
#[non_exhaustive]
#[rustfmt::skip]
pub enum Unit {
    Watt           =  27,
    VoltAmpere     =  28,
    Var            =  29,
    WattHour       =  30,
    VoltAmpereHour =  31,
    VarHour        =  32,
    Ampere         =  33,
    Volt           =  35,
    Hertz          =  44,
    /// Reserved "other" unit.
    Other          = 254,
    /// Unitless count (power factor and friends).
    Count          = 255,
}

impl Unit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::Watt => "W",
            Unit::VoltAmpere => "VA",
            Unit::Var => "var",
            Unit::WattHour => "Wh",
            Unit::VoltAmpereHour => "VAh",
            Unit::VarHour => "varh",
            Unit::Ampere => "A",
            Unit::Volt => "V",
            Unit::Hertz => "Hz",
            Unit::Other => "?",
            Unit::Count => "",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Unit {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

/// The Register/Extended-Register scaler_unit attribute: a structure of two
/// elements, `{integer scaler, enum unit}`.
///
/// The stored value of such an object is `raw * 10^scaler` in `unit`.
/// Unit codes outside [`Unit`] are kept as `None` rather than failing —
/// the multiplier must never be lost to an exotic unit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ScalerUnit {
    pub scaler: i8,
    pub unit: Option<Unit>,
}

impl ScalerUnit {
    /// Parses the structure-of-two from raw A-XDR bytes, walking the
    /// elements the count-only decoder leaves in place.
    pub fn parse(input: &[u8]) -> Result<Self, Error> {
        let (header, consumed) = Data::decode(input)?;
        if header != Data::Structure(2) {
            return Err(Error::ProtocolError);
        }

        let (element, element_len) = Data::decode(&input[consumed..])?;
        let Data::Integer(scaler) = element else {
            return Err(Error::ProtocolError);
        };

        let unit = match Data::decode(&input[consumed + element_len..])? {
            (Data::Enum(code), _) => Unit::try_from(code).ok(),
            _ => None,
        };

        Ok(Self { scaler, unit })
    }

    /// The decimal multiplier `10^scaler`.
    pub fn multiplier(&self) -> f64 {
        let mut m = 1.0;
        for _ in 0..self.scaler.unsigned_abs() {
            m *= 10.0;
        }
        if self.scaler < 0 { 1.0 / m } else { m }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_from_wire_codes() {
        assert_eq!(Unit::try_from(27).unwrap(), Unit::Watt);
        assert_eq!(Unit::try_from(30).unwrap(), Unit::WattHour);
        assert_eq!(Unit::try_from(33).unwrap(), Unit::Ampere);
        assert_eq!(Unit::try_from(35).unwrap(), Unit::Volt);
        assert_eq!(Unit::try_from(44).unwrap(), Unit::Hertz);
        assert_eq!(Unit::try_from(255).unwrap(), Unit::Count);
        assert!(Unit::try_from(0).is_err());
        assert!(Unit::try_from(13).is_err());
    }

    #[test]
    fn test_unit_display() {
        assert_eq!(format!("{}", Unit::Volt), "V");
        assert_eq!(format!("{}", Unit::VarHour), "varh");
        assert_eq!(format!("{}", Unit::Count), "");
    }

    #[test]
    fn test_scaler_unit_parse() {
        // 02 02 0F FF 16 23 — structure(2) { integer(-1), enum(35 = V) }
        let su = ScalerUnit::parse(&[0x02, 0x02, 0x0F, 0xFF, 0x16, 0x23]).unwrap();
        assert_eq!(su.scaler, -1);
        assert_eq!(su.unit, Some(Unit::Volt));
    }

    #[test]
    fn test_scaler_unit_parse_unknown_unit_kept_as_none() {
        let su = ScalerUnit::parse(&[0x02, 0x02, 0x0F, 0x03, 0x16, 0xF0]).unwrap();
        assert_eq!(su.scaler, 3);
        assert_eq!(su.unit, None);
    }

    #[test]
    fn test_scaler_unit_parse_rejects_wrong_shape() {
        // Not a structure.
        assert_eq!(ScalerUnit::parse(&[0x0F, 0xFF]), Err(Error::ProtocolError));
        // Wrong element count.
        assert_eq!(
            ScalerUnit::parse(&[0x02, 0x03, 0x0F, 0xFF, 0x16, 0x23]),
            Err(Error::ProtocolError)
        );
        // Scaler element is not an integer.
        assert_eq!(
            ScalerUnit::parse(&[0x02, 0x02, 0x11, 0x02, 0x16, 0x23]),
            Err(Error::ProtocolError)
        );
        // Truncated.
        assert_eq!(ScalerUnit::parse(&[0x02, 0x02, 0x0F]), Err(Error::InsufficientData));
    }

    #[test]
    fn test_multiplier() {
        assert_eq!(ScalerUnit { scaler: 0, unit: None }.multiplier(), 1.0);
        assert_eq!(ScalerUnit { scaler: 3, unit: Some(Unit::Watt) }.multiplier(), 1000.0);
        assert_eq!(ScalerUnit { scaler: -2, unit: Some(Unit::Ampere) }.multiplier(), 0.01);
        assert_eq!(ScalerUnit { scaler: 6, unit: None }.multiplier(), 1_000_000.0);
    }
}
