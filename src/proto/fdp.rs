//! Foundry Discovery Protocol: LLC/SNAP dest `01:e0:52:cc:cc:cc`, OUI `00:e0:52`, PID `0x2000`.
//!
//! FDP is Foundry's fork of CDP and keeps CDP's "2-octet type, 2-octet length including header"
//! TLV shape; only the destination MAC, OUI, and a couple of type codes differ.

use crate::error::{AppError, Result};
use crate::sysinfo::SysInfo;
use crate::tlv::FrameWriter;

use super::llc;
use super::{Neighbor, Proto, ProtocolModule};

const DEST_MAC: [u8; 6] = [0x01, 0xe0, 0x52, 0xcc, 0xcc, 0xcc];
const OUI: [u8; 3] = [0x00, 0xe0, 0x52];
const PID: u16 = 0x2000;

const TYPE_CHASSIS: u16 = 0x0001;
const TYPE_PORT: u16 = 0x0003;
const TYPE_CAPABILITIES: u16 = 0x0004;

pub struct Fdp;

impl ProtocolModule for Fdp {
    fn proto(&self) -> Proto {
        Proto::Fdp
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
        w.put_u8(1)?; // version
        w.put_u8(ttl_secs.min(255) as u8)?;
        w.put_u16(0)?; // checksum

        put_fdp_tlv(&mut w, TYPE_CHASSIS, info.hostname.as_bytes())?;
        put_fdp_tlv(&mut w, TYPE_PORT, ifname.as_bytes())?;
        if ttl_secs > 0 {
            put_fdp_tlv(&mut w, TYPE_CAPABILITIES, &info.capabilities.bits().to_be_bytes())?;
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
                return Err(AppError::malformed("fdp", "tlv length shorter than header"));
            }
            let value = r.get_bytes(total_len - 4)?;
            match ty {
                TYPE_CHASSIS => neighbor.chassis_id = String::from_utf8_lossy(value).into_owned(),
                TYPE_PORT => neighbor.port_id = String::from_utf8_lossy(value).into_owned(),
                TYPE_CAPABILITIES if value.len() >= 2 => {
                    neighbor.capabilities = u16::from_be_bytes([value[0], value[1]]);
                }
                _ => {}
            }
        }
        Ok(neighbor)
    }
}

fn put_fdp_tlv(w: &mut FrameWriter, ty: u16, value: &[u8]) -> Result<()> {
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
            hostname: "fastiron1".to_string(),
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
    fn encode_decode_round_trip_recovers_chassis_id() {
        let info = sample_info();
        let mut out = [0u8; crate::tlv::ETHER_MAX_LEN];
        let n = Fdp
            .encode(&info, [4, 4, 4, 4, 4, 4], "eth0", 4, None, Fdp.default_ttl_secs(), &mut out)
            .unwrap();
        assert!(Fdp.check(&out[..n]));
        let neighbor = Fdp.decode(&out[..n]).unwrap();
        assert_eq!(neighbor.chassis_id, "fastiron1");
        assert_eq!(neighbor.port_id, "eth0");
        assert_eq!(neighbor.ttl_secs, Fdp.default_ttl_secs());
    }

    #[test]
    fn goodbye_decodes_with_zero_ttl() {
        let info = sample_info();
        let mut out = [0u8; crate::tlv::ETHER_MAX_LEN];
        let n = Fdp.encode(&info, [4, 4, 4, 4, 4, 4], "eth0", 4, None, 0, &mut out).unwrap();
        let neighbor = Fdp.decode(&out[..n]).unwrap();
        assert_eq!(neighbor.ttl_secs, 0);
    }
}
