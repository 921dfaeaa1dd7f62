//! Association establishment and release (ACSE AARQ/AARE/RLRQ).
//!
//! Logical-Name referencing without ciphering, with optional Low-Level
//! Security (password) authentication. The AARQ is a fixed BER-style
//! structure — everything except the password bytes and the two backpatched
//! length bytes is a compile-time constant — and the AARE parser scans
//! tolerantly for the association-result element instead of walking the
//! full ACSE syntax, because the optional fields preceding it vary by
//! server. General BER is deliberately not implemented.

use alloc::vec::Vec;

use crate::Error;

/// AARQ APDU tag (APPLICATION 0, constructed).
pub const AARQ_TAG: u8 = 0x60;
/// AARE APDU tag (APPLICATION 1, constructed).
pub const AARE_TAG: u8 = 0x61;
/// RLRQ APDU tag (APPLICATION 2, constructed).
pub const RLRQ_TAG: u8 = 0x62;
/// RLRE APDU tag (APPLICATION 3, constructed).
pub const RLRE_TAG: u8 = 0x63;

/// Application context name for LN referencing without ciphering,
/// OID 2.16.756.5.8.1.1.
const APP_CONTEXT_LN: [u8; 7] = [0x60, 0x85, 0x74, 0x05, 0x08, 0x01, 0x01];

/// Mechanism name for Low-Level Security, OID 2.16.756.5.8.2.1.
const MECHANISM_LLS: [u8; 7] = [0x60, 0x85, 0x74, 0x05, 0x08, 0x02, 0x01];

/// The fixed xDLMS InitiateRequest: no dedicated key, response allowed,
/// quality-of-service 0, DLMS version 6, conformance block
/// (get + set + selective-access + block-transfer), 128-byte
/// client-max-receive-pdu-size.
const INITIATE_REQUEST: [u8; 14] = [
    0x01, // InitiateRequest
    0x00, // dedicated-key absent
    0x00, // response-allowed = TRUE
    0x00, // proposed-quality-of-service
    0x06, // proposed-dlms-version-number = 6
    0x5F, 0x1F, // conformance tag
    0x04, // conformance length
    0x00, // unused bits
    0x00, 0x18, 0x1D, // conformance block
    0x00, 0x80, // client-max-receive-pdu-size = 128
];

/// AARQ (A-Associate Request), tag 0x60.
///
/// With a password the request carries sender-ACSE-requirements, the LLS
/// mechanism name and the calling-authentication-value; without, those
/// three fields are omitted entirely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AarqApdu {
    pub password: Option<Vec<u8>>,
}

impl AarqApdu {
    pub fn new(password: Option<&[u8]>) -> Self {
        Self { password: password.map(|p| p.to_vec()) }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        buf.push(AARQ_TAG);
        buf.push(0x00); // overall length, backpatched below

        // A1: application-context-name
        buf.push(0xA1);
        buf.push(0x09);
        buf.push(0x06); // OBJECT IDENTIFIER
        buf.push(0x07);
        buf.extend_from_slice(&APP_CONTEXT_LN);

        if let Some(password) = self.password.as_deref().filter(|p| !p.is_empty()) {
            // 8A: sender-acse-requirements — authentication functional unit
            buf.extend_from_slice(&[0x8A, 0x02, 0x07, 0x80]);

            // 8B: mechanism-name — Low-Level Security
            buf.push(0x8B);
            buf.push(0x07);
            buf.extend_from_slice(&MECHANISM_LLS);

            // AC: calling-authentication-value, charstring choice
            buf.push(0xAC);
            buf.push(password.len() as u8 + 2);
            buf.push(0x80);
            buf.push(password.len() as u8);
            buf.extend_from_slice(password);
        }

        // BE: user-information — xDLMS InitiateRequest in an OCTET STRING
        buf.push(0xBE);
        buf.push(INITIATE_REQUEST.len() as u8 + 2);
        buf.push(0x04);
        buf.push(INITIATE_REQUEST.len() as u8);
        buf.extend_from_slice(&INITIATE_REQUEST);

        buf[1] = (buf.len() - 2) as u8;
        buf
    }
}

/// Parses an AARE (A-Associate Response), tag 0x61.
///
/// Scans for the association-result element `A2 03 02 01 <result>`; the
/// scan tolerates the optional fields before it, whose exact layout varies
/// by server. Result 0 is acceptance; anything else is reported as
/// [`Error::AssociationRejected`] with the numeric reason.
pub fn parse_aare(input: &[u8]) -> Result<(), Error> {
    if input.len() < 3 {
        return Err(Error::InsufficientData);
    }
    if input[0] != AARE_TAG {
        log::error!("AARE: wrong tag 0x{:02X}", input[0]);
        return Err(Error::ProtocolError);
    }

    for window in input[2..].windows(5) {
        if window[..4] == [0xA2, 0x03, 0x02, 0x01] {
            let result = window[4];
            if result == 0 {
                log::info!("AARE: association accepted");
                return Ok(());
            }
            log::error!("AARE: association rejected (result={result})");
            return Err(Error::AssociationRejected(result));
        }
    }

    log::warn!("AARE: association-result element not found");
    Err(Error::ProtocolError)
}

/// RLRQ (Release Request), the fixed 2-byte release-request-normal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RlrqApdu;

impl RlrqApdu {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(2);
        buf.push(RLRQ_TAG);
        buf.push(0x00);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aarq_without_password() {
        let encoded = AarqApdu::new(None).encode();

        assert_eq!(encoded[0], AARQ_TAG);
        assert_eq!(encoded[1] as usize, encoded.len() - 2);

        // application-context-name with the LN OID
        assert_eq!(&encoded[2..6], &[0xA1, 0x09, 0x06, 0x07]);
        assert_eq!(&encoded[6..13], &APP_CONTEXT_LN);

        // ACSE requirements, mechanism name and auth value omitted entirely
        assert!(!encoded.contains(&0x8A));
        assert!(!encoded.contains(&0x8B));
        assert!(!encoded.contains(&0xAC));

        // user-information wraps the InitiateRequest octet string
        assert_eq!(encoded[13], 0xBE);
        assert_eq!(encoded[14] as usize, INITIATE_REQUEST.len() + 2);
        assert_eq!(encoded[15], 0x04);
        assert_eq!(encoded[16] as usize, INITIATE_REQUEST.len());
        assert_eq!(&encoded[17..], &INITIATE_REQUEST);
    }

    #[test]
    fn test_aarq_with_password() {
        let encoded = AarqApdu::new(Some(b"22222222".as_slice())).encode();

        assert_eq!(encoded[0], AARQ_TAG);
        assert_eq!(encoded[1] as usize, encoded.len() - 2);

        // 8A 02 07 80 — authentication functional unit
        assert_eq!(&encoded[13..17], &[0x8A, 0x02, 0x07, 0x80]);

        // 8B 07 + LLS OID
        assert_eq!(&encoded[17..19], &[0x8B, 0x07]);
        assert_eq!(&encoded[19..26], &MECHANISM_LLS);

        // AC <len+2> 80 <len> <password>
        assert_eq!(encoded[26], 0xAC);
        assert_eq!(encoded[27], 8 + 2);
        assert_eq!(encoded[28], 0x80);
        assert_eq!(encoded[29], 8);
        assert_eq!(&encoded[30..38], b"22222222");

        assert_eq!(encoded[38], 0xBE);
    }

    #[test]
    fn test_aarq_empty_password_treated_as_none() {
        assert_eq!(AarqApdu::new(Some(b"".as_slice())).encode(), AarqApdu::new(None).encode());
    }

    #[test]
    fn test_aarq_dlms_version_and_pdu_size() {
        let encoded = AarqApdu::new(None).encode();
        // DLMS version 6 right before the conformance tag, 128-byte PDU
        // size at the end.
        assert_eq!(encoded[encoded.len() - 10], 0x06);
        assert_eq!(&encoded[encoded.len() - 2..], &[0x00, 0x80]);
    }

    #[test]
    fn test_aare_accepted() {
        let pdu = [0x61, 0x05, 0xA2, 0x03, 0x02, 0x01, 0x00];
        assert_eq!(parse_aare(&pdu), Ok(()));
    }

    #[test]
    fn test_aare_rejected_with_reason() {
        let pdu = [0x61, 0x05, 0xA2, 0x03, 0x02, 0x01, 0x01];
        assert_eq!(parse_aare(&pdu), Err(Error::AssociationRejected(1)));
    }

    #[test]
    fn test_aare_result_after_optional_fields() {
        // Preceding application-context-name must not confuse the scan.
        let pdu = [
            0x61, 0x10, 0xA1, 0x09, 0x06, 0x07, 0x60, 0x85, 0x74, 0x05, 0x08, 0x01, 0x01, 0xA2,
            0x03, 0x02, 0x01, 0x00,
        ];
        assert_eq!(parse_aare(&pdu), Ok(()));
    }

    #[test]
    fn test_aare_wrong_tag() {
        let pdu = [0x60, 0x05, 0xA2, 0x03, 0x02, 0x01, 0x00];
        assert_eq!(parse_aare(&pdu), Err(Error::ProtocolError));
    }

    #[test]
    fn test_aare_missing_result_element() {
        let pdu = [0x61, 0x04, 0xA1, 0x02, 0x06, 0x00];
        assert_eq!(parse_aare(&pdu), Err(Error::ProtocolError));
    }

    #[test]
    fn test_aare_truncated() {
        assert_eq!(parse_aare(&[0x61, 0x00]), Err(Error::InsufficientData));
    }

    #[test]
    fn test_rlrq_fixed_encoding() {
        assert_eq!(RlrqApdu.encode(), [0x62, 0x00]);
    }
}
