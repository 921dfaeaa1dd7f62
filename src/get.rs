//! GET service PDUs (DLMS Green Book, GET-Request / GET-Response).
//!
//! Only the `normal` variants are implemented: one attribute per request,
//! one value or Data-Access-Result per response. `with-datablock` responses
//! (segmented block transfer) are detected and rejected as unsupported;
//! `with-list` never occurs because requests are always built as `normal`.

use alloc::vec::Vec;
use core::convert::TryFrom;

use derive_try_from_primitive::TryFromPrimitive;

use crate::{Error, ObisCode};

/// GET-Request APDU tag.
pub const GET_REQUEST_TAG: u8 = 0xC0;
/// GET-Response APDU tag.
pub const GET_RESPONSE_TAG: u8 = 0xC4;

/// Request/response subtype: normal (single attribute).
pub const GET_NORMAL: u8 = 0x01;
/// Response subtype: with-datablock (segmented transfer, unsupported).
pub const GET_WITH_DATABLOCK: u8 = 0x02;

/// Identifies one readable attribute: interface class, OBIS logical name
/// and attribute index (e.g. class 3 Register, attribute 2 = value,
/// attribute 3 = scaler_unit).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeDescriptor {
    pub class_id: u16,
    pub obis: ObisCode,
    pub attribute_id: i8,
}

/// GET-Request-normal. Fixed encoding:
///
/// ```text
/// C0 01 <invoke> <class hi> <class lo> <obis × 6> <attr> 00
/// ```
///
/// The trailing zero means "no selective access".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetRequestNormal {
    pub invoke_id: u8,
    pub attribute: AttributeDescriptor,
}

impl GetRequestNormal {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(13);
        buf.push(GET_REQUEST_TAG);
        buf.push(GET_NORMAL);
        buf.push(self.invoke_id);
        buf.extend_from_slice(&self.attribute.class_id.to_be_bytes());
        buf.extend_from_slice(&self.attribute.obis.encode());
        buf.push(self.attribute.attribute_id as u8);
        buf.push(0x00); // no selective access
        buf
    }
}

/// Result carried by a GET-Response-normal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetDataResult<'a> {
    /// Raw A-XDR bytes of the attribute value, starting at the type tag.
    ///
    /// Left undecoded so the caller can either decode a scalar with
    /// [`crate::Data::decode`] or walk a scaler_unit structure.
    Data(&'a [u8]),
    /// Data-Access-Result error code from the server.
    DataAccessError(u8),
}

/// A parsed GET-Response-normal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetResponseNormal<'a> {
    pub invoke_id: u8,
    pub result: GetDataResult<'a>,
}

impl<'a> GetResponseNormal<'a> {
    /// Parses a GET-Response PDU.
    ///
    /// `with-datablock` responses fail with [`Error::UnsupportedType`]
    /// (segmented transfer is out of scope); an error result is surfaced
    /// as [`GetDataResult::DataAccessError`], never as a spurious value.
    pub fn parse(input: &'a [u8]) -> Result<Self, Error> {
        if input.len() < 4 {
            return Err(Error::InsufficientData);
        }
        if input[0] != GET_RESPONSE_TAG {
            return Err(Error::ProtocolError);
        }

        match input[1] {
            GET_NORMAL => {}
            GET_WITH_DATABLOCK => return Err(Error::UnsupportedType(GET_WITH_DATABLOCK)),
            _ => return Err(Error::ProtocolError),
        }

        let invoke_id = input[2];
        let result = match input[3] {
            0x00 => GetDataResult::Data(&input[4..]),
            0x01 => {
                if input.len() < 5 {
                    return Err(Error::InsufficientData);
                }
                GetDataResult::DataAccessError(input[4])
            }
            _ => return Err(Error::ProtocolError),
        };

        Ok(Self { invoke_id, result })
    }
}

/// Named Data-Access-Result codes (Blue Book). Used for log rendering; the
/// raw byte is what travels in errors and is never gated on being known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
#[non_exhaustive]
pub enum DataAccessResult {
    Success = 0,
    HardwareFault = 1,
    TemporaryFailure = 2,
    ReadWriteDenied = 3,
    ObjectUndefined = 4,
    ObjectClassInconsistent = 9,
    ObjectUnavailable = 11,
    TypeUnmatched = 12,
    ScopeOfAccessViolated = 13,
    DataBlockUnavailable = 14,
    LongGetAborted = 15,
    NoLongGetInProgress = 16,
    LongSetAborted = 17,
    NoLongSetInProgress = 18,
    DataBlockNumberInvalid = 19,
    OtherReason = 250,
}

/// Renders an access error code for logs, naming it when it is a standard
/// code.
pub fn describe_access_error(code: u8) -> &'static str {
    match DataAccessResult::try_from(code) {
        Ok(DataAccessResult::Success) => "success",
        Ok(DataAccessResult::HardwareFault) => "hardware fault",
        Ok(DataAccessResult::TemporaryFailure) => "temporary failure",
        Ok(DataAccessResult::ReadWriteDenied) => "read-write denied",
        Ok(DataAccessResult::ObjectUndefined) => "object undefined",
        Ok(DataAccessResult::ObjectClassInconsistent) => "object class inconsistent",
        Ok(DataAccessResult::ObjectUnavailable) => "object unavailable",
        Ok(DataAccessResult::TypeUnmatched) => "type unmatched",
        Ok(DataAccessResult::ScopeOfAccessViolated) => "scope of access violated",
        Ok(DataAccessResult::DataBlockUnavailable) => "data block unavailable",
        Ok(DataAccessResult::LongGetAborted) => "long GET aborted",
        Ok(DataAccessResult::NoLongGetInProgress) => "no long GET in progress",
        Ok(DataAccessResult::LongSetAborted) => "long SET aborted",
        Ok(DataAccessResult::NoLongSetInProgress) => "no long SET in progress",
        Ok(DataAccessResult::DataBlockNumberInvalid) => "data block number invalid",
        Ok(DataAccessResult::OtherReason) => "other reason",
        Err(_) => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Data;

    fn voltage_r_value() -> AttributeDescriptor {
        AttributeDescriptor {
            class_id: 3,
            obis: ObisCode::new(1, 1, 32, 7, 0, 255),
            attribute_id: 2,
        }
    }

    #[test]
    fn test_request_encoding_layout() {
        let request = GetRequestNormal { invoke_id: 0x41, attribute: voltage_r_value() };
        let encoded = request.encode();

        assert_eq!(
            encoded,
            [0xC0, 0x01, 0x41, 0x00, 0x03, 0x01, 0x01, 0x20, 0x07, 0x00, 0xFF, 0x02, 0x00]
        );
    }

    #[test]
    fn test_request_encoding_scaler_unit_attribute() {
        let mut attribute = voltage_r_value();
        attribute.attribute_id = 3;
        let encoded = GetRequestNormal { invoke_id: 0, attribute }.encode();

        assert_eq!(encoded[11], 0x03);
        assert_eq!(*encoded.last().unwrap(), 0x00);
    }

    #[test]
    fn test_response_with_data() {
        let pdu = [0xC4, 0x01, 0x41, 0x00, 0x12, 0x09, 0x01];
        let response = GetResponseNormal::parse(&pdu).unwrap();

        assert_eq!(response.invoke_id, 0x41);
        let GetDataResult::Data(bytes) = response.result else {
            panic!("expected data result");
        };
        assert_eq!(Data::decode(bytes).unwrap(), (Data::LongUnsigned(2305), 3));
    }

    #[test]
    fn test_response_with_access_error() {
        // Error choice must surface the code, never a value.
        let pdu = [0xC4, 0x01, 0x07, 0x01, 0x04];
        let response = GetResponseNormal::parse(&pdu).unwrap();

        assert_eq!(response.result, GetDataResult::DataAccessError(4));
    }

    #[test]
    fn test_response_unknown_access_error_code_preserved() {
        let pdu = [0xC4, 0x01, 0x07, 0x01, 0x7B];
        let response = GetResponseNormal::parse(&pdu).unwrap();

        assert_eq!(response.result, GetDataResult::DataAccessError(0x7B));
        assert_eq!(describe_access_error(0x7B), "unknown");
    }

    #[test]
    fn test_response_with_datablock_rejected() {
        let pdu = [0xC4, 0x02, 0x07, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00];
        assert_eq!(GetResponseNormal::parse(&pdu), Err(Error::UnsupportedType(0x02)));
    }

    #[test]
    fn test_response_wrong_tag() {
        let pdu = [0xC1, 0x01, 0x07, 0x00, 0x00];
        assert_eq!(GetResponseNormal::parse(&pdu), Err(Error::ProtocolError));
    }

    #[test]
    fn test_response_truncated() {
        assert_eq!(GetResponseNormal::parse(&[0xC4, 0x01, 0x07]), Err(Error::InsufficientData));
        assert_eq!(
            GetResponseNormal::parse(&[0xC4, 0x01, 0x07, 0x01]),
            Err(Error::InsufficientData)
        );
    }

    #[test]
    fn test_access_error_names() {
        assert_eq!(describe_access_error(3), "read-write denied");
        assert_eq!(describe_access_error(4), "object undefined");
        assert_eq!(describe_access_error(250), "other reason");
    }
}
