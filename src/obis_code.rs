use core::fmt::{self, Debug, Display};

use nom::{IResult, Parser, number::streaming::u8};
#[cfg(feature = "serde")]
use serde::{Serialize, Serializer};

use crate::Error;

/// A 6-byte OBIS logical name, `A-B:C.D.E*F` (IEC 62056-61).
///
/// Identifies one COSEM object; compared byte-wise, never mutated after
/// definition.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ObisCode {
    pub a: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub f: u8,
}

impl ObisCode {
    pub const fn new(a: u8, b: u8, c: u8, d: u8, e: u8, f: u8) -> Self {
        Self { a, b, c, d, e, f }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self, Error> {
        let (input, (a, b, c, d, e, f)) = (u8, u8, u8, u8, u8, u8).parse(input)?;
        Ok((input, Self::new(a, b, c, d, e, f)))
    }

    /// The wire form: the six value groups in order.
    pub fn encode(&self) -> [u8; 6] {
        [self.a, self.b, self.c, self.d, self.e, self.f]
    }
}

impl Display for ObisCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-{}:{}.{}.{}*{}", self.a, self.b, self.c, self.d, self.e, self.f)
    }
}

impl Debug for ObisCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ObisCode({})", self)
    }
}

#[cfg(feature = "serde")]
impl Serialize for ObisCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use alloc::string::ToString;
        serializer.serialize_str(&self.to_string())
    }
}
