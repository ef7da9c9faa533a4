//! Cisco Discovery Protocol: LLC/SNAP dest `01:00:0c:cc:cc:cc`, OUI `00:00:0c`, PID `0x2000`.
//!
//! CDP's TLVs use a 2-octet type and a 2-octet length that, unlike LLDP, *includes* the 4-octet
//! header itself. The body is prefixed by a 1-octet version and 1-octet TTL (in seconds, unlike
//! LLDP's 2-octet TTL) and a 2-octet checksum nothing in this crate verifies on receive since the
//! kernel already validated the frame's own FCS.

use crate::error::{AppError, Result};
use crate::sysinfo::SysInfo;
use crate::tlv::{FrameReader, FrameWriter};

use super::llc;
use super::{Neighbor, Proto, ProtocolModule};

const DEST_MAC: [u8; 6] = [0x01, 0x00, 0x0c, 0xcc, 0xcc, 0xcc];
const OUI: [u8; 3] = [0x00, 0x00, 0x0c];
const PID: u16 = 0x2000;

const TYPE_CHASSIS: u16 = 0x0001; // "Device ID"
const TYPE_PORT: u16 = 0x0003;
const TYPE_CAPABILITIES: u16 = 0x0004;
const TYPE_SOFTWARE: u16 = 0x0005;

pub struct Cdp;

impl ProtocolModule for Cdp {
    fn proto(&self) -> Proto {
        Proto::Cdp
    }

    fn dest_mac(&self) -> [u8; 6] {
        DEST_MAC
    }

    fn default_ttl_secs(&self) -> u16 {
        180
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
        w.put_u8(2)?; // version
        w.put_u8(ttl_secs.min(255) as u8)?;
        w.put_u16(0)?; // checksum, left unset: not verified anywhere downstream

        put_cdp_tlv(&mut w, TYPE_CHASSIS, info.hostname.as_bytes())?;
        put_cdp_tlv(&mut w, TYPE_PORT, ifname.as_bytes())?;
        if ttl_secs > 0 {
            put_cdp_tlv(&mut w, TYPE_CAPABILITIES, &info.capabilities.bits().to_be_bytes())?;
            put_cdp_tlv(&mut w, TYPE_SOFTWARE, info.sys_descr().as_bytes())?;
        }

        let written = w.pos();
        let (len, buf) = llc::finish(w);
        out[..len].copy_from_slice(&buf[..len]);
        Ok(written)
    }

    fn decode(&self, frame: &[u8]) -> Result<Neighbor> {
        let mut r = llc::reader_after_header(frame)?;
        r.skip(1)?; // version
        let ttl_secs = r.get_u8()? as u16;
        r.skip(2)?; // checksum

        let mut neighbor = Neighbor::default();
        neighbor.ttl_secs = ttl_secs;
        while r.remaining() >= 4 {
            let ty = r.get_u16()?;
            let total_len = r.get_u16()? as usize;
            if total_len < 4 {
                return Err(AppError::malformed("cdp", "tlv length shorter than header"));
            }
            let value = r.get_bytes(total_len - 4)?;
            match ty {
                TYPE_CHASSIS => neighbor.chassis_id = String::from_utf8_lossy(value).into_owned(),
                TYPE_PORT => neighbor.port_id = String::from_utf8_lossy(value).into_owned(),
                TYPE_CAPABILITIES if value.len() >= 2 => {
                    neighbor.capabilities = u16::from_be_bytes([value[0], value[1]]);
                }
                TYPE_SOFTWARE => neighbor.sys_descr = Some(String::from_utf8_lossy(value).into_owned()),
                _ => {}
            }
        }
        Ok(neighbor)
    }
}

fn put_cdp_tlv(w: &mut FrameWriter, ty: u16, value: &[u8]) -> Result<()> {
    w.put_u16(ty)?;
    w.put_u16((value.len() + 4) as u16)?;
    w.put_bytes(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sysinfo::{Capabilities, MedDeviceType};

    fn sample_info() -> SysInfo {
        SysInfo {
            hostname: "core-sw".to_string(),
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
    fn encode_decode_round_trip_recovers_device_id() {
        let info = sample_info();
        let mut out = [0u8; crate::tlv::ETHER_MAX_LEN];
        let n = Cdp
            .encode(&info, [1, 2, 3, 4, 5, 6], "eth0", 2, None, Cdp.default_ttl_secs(), &mut out)
            .unwrap();
        assert!(Cdp.check(&out[..n]));
        let neighbor = Cdp.decode(&out[..n]).unwrap();
        assert_eq!(neighbor.chassis_id, "core-sw");
        assert_eq!(neighbor.port_id, "eth0");
        assert_eq!(neighbor.ttl_secs, Cdp.default_ttl_secs());
    }

    #[test]
    fn goodbye_decodes_with_zero_ttl() {
        let info = sample_info();
        let mut out = [0u8; crate::tlv::ETHER_MAX_LEN];
        let n = Cdp.encode(&info, [1, 2, 3, 4, 5, 6], "eth0", 2, None, 0, &mut out).unwrap();
        let neighbor = Cdp.decode(&out[..n]).unwrap();
        assert_eq!(neighbor.ttl_secs, 0);
    }

    #[test]
    fn check_rejects_wrong_oui() {
        let mut frame = vec![0u8; 24];
        frame[0..6].copy_from_slice(&DEST_MAC);
        frame[14..17].copy_from_slice(&[0xaa, 0xaa, 0x03]);
        frame[17..20].copy_from_slice(&[0, 0, 1]);
        assert!(!Cdp.check(&frame));
    }
}
