//! Extreme Discovery Protocol: LLC/SNAP dest `00:e0:2b:00:00:00`, OUI `00:e0:2b`, PID `0x0000`.
//!
//! EDP's TLVs use a 1-octet type, 1-octet marker (always `0x99`), and 2-octet length covering only
//! the value, which simplifies the cursor code relative to CDP's "length includes header" scheme.

use crate::error::{AppError, Result};
use crate::sysinfo::SysInfo;
use crate::tlv::FrameWriter;

use super::llc;
use super::{Neighbor, Proto, ProtocolModule};

const DEST_MAC: [u8; 6] = [0x00, 0xe0, 0x2b, 0x00, 0x00, 0x00];
const OUI: [u8; 3] = [0x00, 0xe0, 0x2b];
const PID: u16 = 0x0000;
const TLV_MARKER: u8 = 0x99;

const TYPE_DISPLAY: u8 = 0x02; // chassis/system name
const TYPE_PORT: u8 = 0x03;
const TYPE_NULL: u8 = 0xff;

pub struct Edp;

impl ProtocolModule for Edp {
    fn proto(&self) -> Proto {
        Proto::Edp
    }

    fn dest_mac(&self) -> [u8; 6] {
        DEST_MAC
    }

    fn default_ttl_secs(&self) -> u16 {
        120
    }

    fn check(&self, frame: &[u8]) -> bool {
        llc::check(frame, DEST_MAC, OUI, PID)
    }

    fn encode(
        &self,
        info: &SysInfo,
        local_mac: [u8; 6],
        ifname: &str,
        _ifindex: u32,
        _local_ipv4: Option<std::net::Ipv4Addr>,
        ttl_secs: u16,
        out: &mut [u8],
    ) -> Result<usize> {
        let mut w = llc::start_frame(DEST_MAC, local_mac, OUI, PID, out.len())?;
        w.put_u8(1)?; // version
        w.put_u8(ttl_secs.min(255) as u8)?;
        w.put_u16(0)?; // sequence, unused on encode

        put_edp_tlv(&mut w, TYPE_DISPLAY, info.hostname.as_bytes())?;
        put_edp_tlv(&mut w, TYPE_PORT, ifname.as_bytes())?;
        w.put_u8(TYPE_NULL)?;
        w.put_u8(TLV_MARKER)?;
        w.put_u16(0)?;

        let written = w.pos();
        let (len, buf) = llc::finish(w);
        out[..len].copy_from_slice(&buf[..len]);
        Ok(written)
    }

    fn decode(&self, frame: &[u8]) -> Result<Neighbor> {
        let mut r = llc::reader_after_header(frame)?;
        r.skip(1)?; // version
        let ttl_secs = r.get_u8()? as u16;
        r.skip(2)?; // sequence

        let mut neighbor = Neighbor::default();
        neighbor.ttl_secs = ttl_secs;
        loop {
            let ty = r.get_u8()?;
            let marker = r.get_u8()?;
            if marker != TLV_MARKER {
                return Err(AppError::malformed("edp", "missing tlv marker byte"));
            }
            let len = r.get_u16()? as usize;
            if ty == TYPE_NULL {
                break;
            }
            let value = r.get_bytes(len)?;
            match ty {
                TYPE_DISPLAY => neighbor.sysname = Some(String::from_utf8_lossy(value).into_owned()),
                TYPE_PORT => neighbor.port_id = String::from_utf8_lossy(value).into_owned(),
                _ => {}
            }
            if r.remaining() == 0 {
                return Err(AppError::malformed("edp", "missing null tlv terminator"));
            }
        }
        if neighbor.chassis_id.is_empty() {
            neighbor.chassis_id = neighbor.sysname.clone().unwrap_or_default();
        }
        Ok(neighbor)
    }
}

fn put_edp_tlv(w: &mut FrameWriter, ty: u8, value: &[u8]) -> Result<()> {
    w.put_u8(ty)?;
    w.put_u8(TLV_MARKER)?;
    w.put_u16(value.len() as u16)?;
    w.put_bytes(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sysinfo::{Capabilities, MedDeviceType};

    fn sample_info() -> SysInfo {
        SysInfo {
            hostname: "edge1".to_string(),
            os_name: "Linux".to_string(),
            os_release: "6.1.0".to_string(),
            started_at: std::time::Instant::now(),
            uptime_at_start: std::time::Duration::from_secs(0),
            mgmt_addr: None,
            capabilities: Capabilities::STATION,
            med_device_type: MedDeviceType::NotDefined,
            country: None,
            location: None,
            physif_count: 1,
        }
    }

    #[test]
    fn encode_decode_round_trip_recovers_sysname() {
        let info = sample_info();
        let mut out = [0u8; crate::tlv::ETHER_MAX_LEN];
        let n = Edp
            .encode(&info, [9, 9, 9, 9, 9, 9], "eth0", 5, None, Edp.default_ttl_secs(), &mut out)
            .unwrap();
        assert!(Edp.check(&out[..n]));
        let neighbor = Edp.decode(&out[..n]).unwrap();
        assert_eq!(neighbor.sysname.as_deref(), Some("edge1"));
        assert_eq!(neighbor.port_id, "eth0");
        assert_eq!(neighbor.ttl_secs, Edp.default_ttl_secs());
    }

    #[test]
    fn goodbye_decodes_with_zero_ttl() {
        let info = sample_info();
        let mut out = [0u8; crate::tlv::ETHER_MAX_LEN];
        let n = Edp.encode(&info, [9, 9, 9, 9, 9, 9], "eth0", 5, None, 0, &mut out).unwrap();
        let neighbor = Edp.decode(&out[..n]).unwrap();
        assert_eq!(neighbor.ttl_secs, 0);
    }

    #[test]
    fn decode_rejects_bad_marker_byte() {
        let mut w = llc::start_frame(DEST_MAC, [0; 6], OUI, PID, 128).unwrap();
        w.put_u8(1).unwrap();
        w.put_u8(Edp.default_ttl_secs().min(255) as u8).unwrap();
        w.put_u16(0).unwrap();
        w.put_u8(TYPE_DISPLAY).unwrap();
        w.put_u8(0x00).unwrap(); // wrong marker
        w.put_u16(0).unwrap();
        let (len, buf) = llc::finish(w);
        let err = Edp.decode(&buf[..len]).unwrap_err();
        assert!(matches!(err, AppError::Malformed { .. }));
    }
}
