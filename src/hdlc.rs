//! HDLC framing for DLMS/COSEM over serial links (IEC 62056-46).
//!
//! Builds and parses Type-3 HDLC frames with 1-byte addressing:
//!
//! ```text
//! +------+--------+------+------+------+-----+--------+-----+------+
//! | Flag | Format | Dst  | Src  | Ctrl | HCS | [Info  | FCS]| Flag |
//! | 0x7E | (2)    | (1)  | (1)  | (1)  | (2) | (N)    | (2) | 0x7E |
//! +------+--------+------+------+------+-----+--------+-----+------+
//! ```
//!
//! The format field packs the frame type in the upper nibble (0xA0 for
//! Type 3) and the frame length, excluding both flags, in the low 11 bits.
//! HCS covers format through control; FCS covers format through the end of
//! the information field. Frames without an information field carry no FCS
//! (the HCS already covers everything).
//!
//! Checksum failures and malformed headers are reported, never silently
//! corrected; the session layer decides whether to retry or abort.

use alloc::vec::Vec;

use crate::{Error, crc::crc16};

/// Frame delimiter, opening and closing every frame.
pub const FLAG: u8 = 0x7E;

/// Type-3 frame format identifier (upper nibble of the format field).
pub const FORMAT_TYPE_3: u8 = 0xA0;

/// Maximum length of an information field.
pub const MAX_INFO_LEN: usize = 256;

/// Maximum length of a complete frame, used for receive buffer sizing.
pub const MAX_FRAME_LEN: usize = 300;

/// Set Normal Response Mode (connection setup).
pub const CTRL_SNRM: u8 = 0x93;
/// Unnumbered Acknowledge.
pub const CTRL_UA: u8 = 0x73;
/// Disconnect.
pub const CTRL_DISC: u8 = 0x53;
/// Disconnected Mode.
pub const CTRL_DM: u8 = 0x1F;

/// Minimum frame: flag + format(2) + dst + src + ctrl + HCS(2) + flag.
const MIN_FRAME_LEN: usize = 9;
/// Minimum frame carrying an information field (one info byte + FCS).
const MIN_INFO_FRAME_LEN: usize = MIN_FRAME_LEN + 1 + 2;

/// Packs an I-frame control byte: `RRR P SSS 0`.
pub fn iframe_control(send_seq: u8, recv_seq: u8, poll: bool) -> u8 {
    ((recv_seq & 0x07) << 5) | if poll { 0x10 } else { 0x00 } | ((send_seq & 0x07) << 1)
}

/// SNRM negotiation parameters, encoded as the `81 80` parameter group in
/// the SNRM information field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HdlcParams {
    /// Maximum information field length, transmit direction.
    pub max_info_tx: u16,
    /// Maximum information field length, receive direction.
    pub max_info_rx: u16,
    /// Transmit window size.
    pub window_tx: u8,
    /// Receive window size.
    pub window_rx: u8,
}

/// A parsed HDLC frame. `parse` only returns a frame once both checksums
/// have been verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HdlcFrame {
    pub dst_addr: u8,
    pub src_addr: u8,
    pub control: u8,
    pub info: Vec<u8>,
    /// S-bit of the format field.
    pub segmented: bool,
}

/// Outcome of scanning a raw receive buffer for a flag-delimited frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSearch {
    /// A complete `7E .. 7E` region at `start`, `len` bytes including both
    /// flags.
    Found { start: usize, len: usize },
    /// No closing flag yet; receive more bytes and re-scan.
    Incomplete,
}

/// Writes opening flag, format field and header bytes, returning the buffer
/// positioned after the control byte. `frame_len` excludes both flags.
fn push_header(dst_addr: u8, src_addr: u8, control: u8, frame_len: u16) -> Vec<u8> {
    let mut buf = Vec::with_capacity(frame_len as usize + 2);
    buf.push(FLAG);
    buf.push(FORMAT_TYPE_3 | ((frame_len >> 8) & 0x07) as u8);
    buf.push((frame_len & 0xFF) as u8);
    buf.push(dst_addr);
    buf.push(src_addr);
    buf.push(control);
    buf
}

/// Appends a checksum in wire order (low byte first).
fn push_crc(buf: &mut Vec<u8>, crc: u16) {
    buf.push((crc & 0xFF) as u8);
    buf.push((crc >> 8) as u8);
}

/// Encodes a 1- or 2-byte TLV parameter value for the SNRM group.
fn push_param(info: &mut Vec<u8>, tag: u8, value: u16) {
    info.push(tag);
    if value <= 0xFF {
        info.push(0x01);
        info.push(value as u8);
    } else {
        info.push(0x02);
        info.push((value >> 8) as u8);
        info.push((value & 0xFF) as u8);
    }
}

/// Builds an SNRM frame.
///
/// With `params`, the information field carries the `81 80` negotiation
/// group (max info field lengths as tags 05/06, window sizes as 07/08).
/// Without, the frame is minimal: no information field and no FCS — the
/// target meters handle a minimal SNRM more reliably than a negotiated one.
pub fn build_snrm(client_addr: u8, server_addr: u8, params: Option<&HdlcParams>) -> Vec<u8> {
    let mut info = Vec::new();
    if let Some(p) = params {
        info.push(0x81);
        info.push(0x80);
        info.push(0x00); // group length, patched below
        push_param(&mut info, 0x05, p.max_info_tx);
        push_param(&mut info, 0x06, p.max_info_rx);
        push_param(&mut info, 0x07, p.window_tx as u16);
        push_param(&mut info, 0x08, p.window_rx as u16);
        info[2] = (info.len() - 3) as u8;
    }

    let frame_len = 5 + 2 + if info.is_empty() { 0 } else { info.len() + 2 };
    let mut buf = push_header(server_addr, client_addr, CTRL_SNRM, frame_len as u16);

    let hcs = crc16(&buf[1..6]);
    push_crc(&mut buf, hcs);

    if !info.is_empty() {
        buf.extend_from_slice(&info);
        let fcs = crc16(&buf[1..]);
        push_crc(&mut buf, fcs);
    }

    buf.push(FLAG);
    buf
}

/// Builds a DISC frame (no information field).
pub fn build_disc(client_addr: u8, server_addr: u8) -> Vec<u8> {
    let mut buf = push_header(server_addr, client_addr, CTRL_DISC, 7);
    let hcs = crc16(&buf[1..6]);
    push_crc(&mut buf, hcs);
    buf.push(FLAG);
    buf
}

/// Builds an I-frame carrying `info` with the poll bit set.
///
/// Fails with [`Error::InvalidArgument`] if `info` is empty or longer than
/// [`MAX_INFO_LEN`].
pub fn build_iframe(
    client_addr: u8,
    server_addr: u8,
    send_seq: u8,
    recv_seq: u8,
    info: &[u8],
) -> Result<Vec<u8>, Error> {
    if info.is_empty() || info.len() > MAX_INFO_LEN {
        return Err(Error::InvalidArgument);
    }

    let control = iframe_control(send_seq, recv_seq, true);
    let frame_len = (5 + 2 + info.len() + 2) as u16;
    let mut buf = push_header(server_addr, client_addr, control, frame_len);

    let hcs = crc16(&buf[1..6]);
    push_crc(&mut buf, hcs);

    buf.extend_from_slice(info);
    let fcs = crc16(&buf[1..]);
    push_crc(&mut buf, fcs);

    buf.push(FLAG);
    Ok(buf)
}

impl HdlcFrame {
    /// Parses a complete flag-delimited frame.
    ///
    /// The declared 11-bit length is checked against the actual byte count
    /// but a mismatch is only logged — real meters are inexact here and the
    /// checksums decide validity.
    pub fn parse(raw: &[u8]) -> Result<Self, Error> {
        if raw.len() < MIN_FRAME_LEN {
            return Err(Error::InsufficientData);
        }
        if raw[0] != FLAG || raw[raw.len() - 1] != FLAG {
            return Err(Error::ProtocolError);
        }

        let format_hi = raw[1];
        let format_lo = raw[2];
        if format_hi & 0xF0 != FORMAT_TYPE_3 {
            return Err(Error::ProtocolError);
        }

        let segmented = format_hi & 0x08 != 0;
        let declared_len = (((format_hi & 0x07) as usize) << 8) | format_lo as usize;
        if declared_len + 2 != raw.len() {
            log::warn!(
                "HDLC length mismatch: format declares {declared_len}, frame has {}",
                raw.len() - 2
            );
        }

        let dst_addr = raw[3];
        let src_addr = raw[4];
        let control = raw[5];

        let hcs_calc = crc16(&raw[1..6]);
        let hcs_recv = raw[6] as u16 | (raw[7] as u16) << 8;
        if hcs_calc != hcs_recv {
            return Err(Error::ChecksumMismatch);
        }

        let mut info = Vec::new();
        if raw.len() > MIN_FRAME_LEN {
            if raw.len() < MIN_INFO_FRAME_LEN {
                return Err(Error::ProtocolError);
            }
            let info_len = raw.len() - MIN_FRAME_LEN - 2;
            if info_len > MAX_INFO_LEN {
                return Err(Error::InvalidArgument);
            }
            info.extend_from_slice(&raw[8..8 + info_len]);

            let fcs_calc = crc16(&raw[1..raw.len() - 3]);
            let fcs_recv = raw[raw.len() - 3] as u16 | (raw[raw.len() - 2] as u16) << 8;
            if fcs_calc != fcs_recv {
                return Err(Error::ChecksumMismatch);
            }
        }

        Ok(Self { dst_addr, src_addr, control, info, segmented })
    }
}

/// Locates the first complete `7E .. 7E` region in a raw receive buffer.
///
/// Runs of consecutive flags are collapsed, treating the last one as the
/// true opening flag. Returns [`FrameSearch::Incomplete`] until a closing
/// flag arrives, which lets callers accumulate bytes across partial
/// transport reads and re-scan.
pub fn find_frame(buf: &[u8]) -> FrameSearch {
    let Some(first) = buf.iter().position(|&b| b == FLAG) else {
        return FrameSearch::Incomplete;
    };

    let mut start = first;
    let mut end = start + 1;
    while end < buf.len() && buf[end] == FLAG {
        start = end;
        end += 1;
    }

    while end < buf.len() && buf[end] != FLAG {
        end += 1;
    }

    if end >= buf.len() {
        return FrameSearch::Incomplete;
    }

    FrameSearch::Found { start, len: end - start + 1 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_iframe_control_packing() {
        assert_eq!(iframe_control(0, 0, true), 0x10);
        assert_eq!(iframe_control(1, 0, true), 0x12);
        assert_eq!(iframe_control(0, 1, true), 0x30);
        assert_eq!(iframe_control(3, 5, true), 0xB6);
        assert_eq!(iframe_control(3, 5, false), 0xA6);
        // Sequence numbers wrap at 8.
        assert_eq!(iframe_control(8, 8, true), iframe_control(0, 0, true));
    }

    #[test]
    fn test_build_snrm_minimal() {
        let frame = build_snrm(0x03, 0x03, None);

        // flag + format(2) + dst + src + ctrl + HCS(2) + flag
        assert_eq!(frame.len(), 9);
        assert_eq!(frame[0], FLAG);
        assert_eq!(frame[1], FORMAT_TYPE_3);
        assert_eq!(frame[2], 7); // frame length excluding flags
        assert_eq!(frame[3], 0x03); // dst = server
        assert_eq!(frame[4], 0x03); // src = client
        assert_eq!(frame[5], CTRL_SNRM);
        assert_eq!(frame[8], FLAG);
    }

    #[test]
    fn test_build_snrm_with_params() {
        let params = HdlcParams { max_info_tx: 128, max_info_rx: 128, window_tx: 1, window_rx: 1 };
        let frame = build_snrm(0x03, 0x21, Some(&params));

        let parsed = HdlcFrame::parse(&frame).unwrap();
        assert_eq!(parsed.control, CTRL_SNRM);
        // 81 80 <len> 05 01 80 06 01 80 07 01 01 08 01 01
        assert_eq!(parsed.info[0], 0x81);
        assert_eq!(parsed.info[1], 0x80);
        assert_eq!(parsed.info[2] as usize, parsed.info.len() - 3);
        assert_eq!(&parsed.info[3..6], &[0x05, 0x01, 128]);
        assert_eq!(&parsed.info[6..9], &[0x06, 0x01, 128]);
        assert_eq!(&parsed.info[9..12], &[0x07, 0x01, 1]);
        assert_eq!(&parsed.info[12..15], &[0x08, 0x01, 1]);
    }

    #[test]
    fn test_build_snrm_two_byte_param_values() {
        let params = HdlcParams { max_info_tx: 0x0200, max_info_rx: 64, window_tx: 1, window_rx: 7 };
        let frame = build_snrm(0x03, 0x21, Some(&params));
        let parsed = HdlcFrame::parse(&frame).unwrap();

        assert_eq!(&parsed.info[3..7], &[0x05, 0x02, 0x02, 0x00]);
        assert_eq!(&parsed.info[7..10], &[0x06, 0x01, 64]);
    }

    #[test]
    fn test_build_disc_roundtrip() {
        let frame = build_disc(0x03, 0x21);
        let parsed = HdlcFrame::parse(&frame).unwrap();

        assert_eq!(parsed.dst_addr, 0x21);
        assert_eq!(parsed.src_addr, 0x03);
        assert_eq!(parsed.control, CTRL_DISC);
        assert!(parsed.info.is_empty());
        assert!(!parsed.segmented);
    }

    #[test]
    fn test_build_iframe_roundtrip() {
        let info = [0xE6, 0xE6, 0x00, 0xC0, 0x01, 0x00];
        let frame = build_iframe(0x03, 0x21, 2, 5, &info).unwrap();
        let parsed = HdlcFrame::parse(&frame).unwrap();

        assert_eq!(parsed.dst_addr, 0x21);
        assert_eq!(parsed.src_addr, 0x03);
        assert_eq!(parsed.control, iframe_control(2, 5, true));
        assert_eq!(parsed.info, info);
    }

    #[test]
    fn test_build_iframe_rejects_empty_info() {
        assert_eq!(build_iframe(0x03, 0x21, 0, 0, &[]), Err(Error::InvalidArgument));
    }

    #[test]
    fn test_build_iframe_rejects_oversized_info() {
        let info = [0u8; MAX_INFO_LEN + 1];
        assert_eq!(build_iframe(0x03, 0x21, 0, 0, &info), Err(Error::InvalidArgument));
    }

    #[test]
    fn test_build_iframe_max_info() {
        let info = [0x55u8; MAX_INFO_LEN];
        let frame = build_iframe(0x03, 0x21, 0, 0, &info).unwrap();
        let parsed = HdlcFrame::parse(&frame).unwrap();
        assert_eq!(parsed.info.len(), MAX_INFO_LEN);
    }

    #[test]
    fn test_parse_rejects_short_input() {
        assert_eq!(HdlcFrame::parse(&[0x7E, 0xA0, 0x07]), Err(Error::InsufficientData));
    }

    #[test]
    fn test_parse_rejects_missing_flags() {
        let mut frame = build_disc(0x03, 0x21);
        frame[0] = 0x00;
        assert_eq!(HdlcFrame::parse(&frame), Err(Error::ProtocolError));
    }

    #[test]
    fn test_parse_rejects_wrong_format_type() {
        let mut frame = build_disc(0x03, 0x21);
        frame[1] = 0x50 | (frame[1] & 0x07);
        assert_eq!(HdlcFrame::parse(&frame), Err(Error::ProtocolError));
    }

    #[test]
    fn test_parse_tolerates_declared_length_mismatch() {
        // Patch the declared length and fix the checksum: the frame must
        // still parse (real meters are inexact here), only a warning is
        // logged.
        let mut frame = build_disc(0x03, 0x21);
        frame[2] += 1;
        let hcs = crc16(&frame[1..6]);
        frame[6] = (hcs & 0xFF) as u8;
        frame[7] = (hcs >> 8) as u8;

        let parsed = HdlcFrame::parse(&frame).unwrap();
        assert_eq!(parsed.control, CTRL_DISC);
    }

    #[test]
    fn test_single_bit_corruption_detected() {
        let info = [0xE6, 0xE6, 0x00, 0xC0, 0x01, 0x2A];
        let frame = build_iframe(0x03, 0x21, 1, 1, &info).unwrap();

        // Every single-bit flip between the flags must make parsing fail;
        // flips outside the format field must fail the checksum check
        // specifically.
        for byte in 1..frame.len() - 1 {
            for bit in 0..8 {
                let mut corrupted = frame.clone();
                corrupted[byte] ^= 1 << bit;
                let result = HdlcFrame::parse(&corrupted);
                assert!(result.is_err(), "flip at byte {byte} bit {bit} went undetected");
                if byte > 2 {
                    assert_eq!(result, Err(Error::ChecksumMismatch));
                }
            }
        }
    }

    #[test]
    fn test_find_frame_embedded_in_garbage() {
        let frame = build_disc(0x03, 0x21);
        let mut buf = vec![0x12, 0x34, 0x56];
        let expected_start = buf.len();
        buf.extend_from_slice(&frame);
        buf.extend_from_slice(&[0xAB, 0xCD]);

        match find_frame(&buf) {
            FrameSearch::Found { start, len } => {
                assert_eq!(start, expected_start);
                assert_eq!(len, frame.len());
                assert!(HdlcFrame::parse(&buf[start..start + len]).is_ok());
            }
            FrameSearch::Incomplete => panic!("frame not found"),
        }
    }

    #[test]
    fn test_find_frame_skips_consecutive_flags() {
        let frame = build_disc(0x03, 0x21);
        let mut buf = vec![FLAG, FLAG, FLAG];
        buf.extend_from_slice(&frame[1..]);

        match find_frame(&buf) {
            FrameSearch::Found { start, len } => {
                assert_eq!(start, 2);
                assert_eq!(len, frame.len());
            }
            FrameSearch::Incomplete => panic!("frame not found"),
        }
    }

    #[test]
    fn test_find_frame_incomplete() {
        let frame = build_iframe(0x03, 0x21, 0, 0, &[0x01, 0x02]).unwrap();
        // Drop the closing flag: the scanner must ask for more bytes.
        assert_eq!(find_frame(&frame[..frame.len() - 1]), FrameSearch::Incomplete);
        assert_eq!(find_frame(&[0x00, 0x01]), FrameSearch::Incomplete);
        assert_eq!(find_frame(&[]), FrameSearch::Incomplete);
    }
}
