//! Shared LLC/SNAP framing for the four non-LLDP protocols (CDP, EDP, FDP, NDP). Each rides on
//! 802.2 LLC with a SNAP header rather than an EtherType directly: destination MAC, source MAC,
//! length (not EtherType), `AA AA 03` LLC header, 3-octet OUI, 2-octet PID, then the
//! protocol-specific payload.

use crate::error::Result;
use crate::tlv::{FrameReader, FrameWriter};

const LLC_SNAP_HEADER: [u8; 3] = [0xaa, 0xaa, 0x03];

pub fn check(frame: &[u8], dest_mac: [u8; 6], oui: [u8; 3], pid: u16) -> bool {
    frame.len() >= 22
        && frame[0..6] == dest_mac
        && frame[14..17] == LLC_SNAP_HEADER
        && frame[17..20] == oui
        && u16::from_be_bytes([frame[20], frame[21]]) == pid
}

/// Writes the common 22-byte header (dest/src MAC, length placeholder, LLC/SNAP) and returns the
/// writer positioned at the start of the protocol payload. The length field is backpatched by
/// [`finish`].
pub fn start_frame(dest_mac: [u8; 6], local_mac: [u8; 6], oui: [u8; 3], pid: u16, cap: usize) -> Result<FrameWriter> {
    let mut w = FrameWriter::new(cap);
    w.put_bytes(&dest_mac)?;
    w.put_bytes(&local_mac)?;
    w.put_u16(0)?; // length, backpatched in `finish`
    w.put_bytes(&LLC_SNAP_HEADER)?;
    w.put_bytes(&oui)?;
    w.put_u16(pid)?;
    Ok(w)
}

/// Pads to the Ethernet minimum, backpatches the 802.3 length field (bytes 12-13) with the number
/// of bytes following the Ethernet header — LLC/SNAP header, payload, and padding together — and
/// returns the written length.
pub fn finish(mut w: FrameWriter) -> (usize, [u8; crate::tlv::ETHER_MAX_LEN]) {
    let _ = w.pad_to(crate::tlv::ETHER_MIN_LEN);
    let (len, mut buf) = w.finish();
    let length_field = (len - 14) as u16;
    buf[12..14].copy_from_slice(&length_field.to_be_bytes());
    (len, buf)
}

pub fn reader_after_header(frame: &[u8]) -> Result<FrameReader<'_>> {
    let mut r = FrameReader::new(frame);
    r.skip(22)?;
    Ok(r)
}
