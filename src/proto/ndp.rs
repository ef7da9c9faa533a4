//! Nortel (Bay Networks) Discovery Protocol: LLC/SNAP dest `01:00:81:00:01:00`, OUI `00:00:81`,
//! PID `0x01a1`.
//!
//! Unlike the other four protocols, NDP carries no TLVs and no explicit TTL: the body is a fixed
//! 11-octet header (local ipv4, a 3-octet segment id whose last octet is the egress ifindex,
//! chassis and backplane type constants, the host's physical interface count, and a 1-octet
//! topology-state field that doubles as the liveness signal). This crate still needs a concrete
//! neighbor lifetime to drive its expiry timer, so it resolves that gap by treating every accepted
//! NDP frame as refreshing the neighbor for a fixed [`NDP_DEFAULT_TTL`] — double the default 30s
//! advertise cadence, matching how the other protocols size their default TTL relative to theirs.

use std::net::Ipv4Addr;

use crate::error::Result;
use crate::sysinfo::SysInfo;
use super::llc;
use super::{Neighbor, Proto, ProtocolModule};

const DEST_MAC: [u8; 6] = [0x01, 0x00, 0x81, 0x00, 0x01, 0x00];
const OUI: [u8; 3] = [0x00, 0x00, 0x81];
const PID: u16 = 0x01a1;

/// Fixed neighbor lifetime applied on every accepted NDP frame, since NDP itself advertises no
/// TTL. See module docs.
pub const NDP_DEFAULT_TTL: u16 = 180;

const SEGMENT_ID_LEN: usize = 3;

const CHASSIS_OTHER: u8 = 1;
const BACKPLANE_ETH_FE_GE: u8 = 9;
const TOPOLOGY_NEW: u8 = 1;
const TOPOLOGY_DOWN: u8 = 0;

pub struct Ndp;

impl ProtocolModule for Ndp {
    fn proto(&self) -> Proto {
        Proto::Ndp
    }

    fn dest_mac(&self) -> [u8; 6] {
        DEST_MAC
    }

    fn default_ttl_secs(&self) -> u16 {
        NDP_DEFAULT_TTL
    }

    fn check(&self, frame: &[u8]) -> bool {
        llc::check(frame, DEST_MAC, OUI, PID)
    }

    fn encode(
        &self,
        info: &SysInfo,
        local_mac: [u8; 6],
        _ifname: &str,
        ifindex: u32,
        local_ipv4: Option<Ipv4Addr>,
        ttl_secs: u16,
        out: &mut [u8],
    ) -> Result<usize> {
        let mut w = llc::start_frame(DEST_MAC, local_mac, OUI, PID, out.len())?;
        w.put_bytes(&local_ipv4.unwrap_or(Ipv4Addr::UNSPECIFIED).octets())?;
        w.put_bytes(&[0, 0, ifindex.min(u8::MAX as u32) as u8])?; // seg[2] = ifindex
        w.put_u8(CHASSIS_OTHER)?;
        w.put_u8(BACKPLANE_ETH_FE_GE)?;
        w.put_u8(info.physif_count.min(u8::MAX as usize) as u8)?;
        // NDP has no wire TTL field; a goodbye is expressed as topology state "down" instead of
        // the steady-state "new".
        w.put_u8(if ttl_secs > 0 { TOPOLOGY_NEW } else { TOPOLOGY_DOWN })?;

        let written = w.pos();
        let (len, buf) = llc::finish(w);
        out[..len].copy_from_slice(&buf[..len]);
        Ok(written)
    }

    fn decode(&self, frame: &[u8]) -> Result<Neighbor> {
        let mut r = llc::reader_after_header(frame)?;
        let addr = Ipv4Addr::from(r.get_u32()?);
        let seg = r.get_bytes(SEGMENT_ID_LEN)?;
        let ifindex = seg[2];
        r.skip(2)?; // chassis, backplane
        r.skip(1)?; // links
        let topology_state = r.get_u8()?;

        Ok(Neighbor {
            chassis_id: addr.to_string(),
            port_id: ifindex.to_string(),
            mgmt_addr: Some(std::net::IpAddr::V4(addr)),
            ttl_secs: if topology_state == TOPOLOGY_DOWN { 0 } else { NDP_DEFAULT_TTL },
            ..Neighbor::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sysinfo::{Capabilities, MedDeviceType};

    fn sample_info() -> SysInfo {
        SysInfo {
            hostname: "bay-hub".to_string(),
            os_name: "Linux".to_string(),
            os_release: "6.1.0".to_string(),
            started_at: std::time::Instant::now(),
            uptime_at_start: std::time::Duration::from_secs(0),
            mgmt_addr: None,
            capabilities: Capabilities::STATION,
            med_device_type: MedDeviceType::NotDefined,
            country: None,
            location: None,
            physif_count: 3,
        }
    }

    #[test]
    fn encode_decode_round_trip_recovers_addr_ifindex_and_fixed_ttl() {
        let info = sample_info();
        let addr = Ipv4Addr::new(10, 0, 0, 7);
        let mut out = [0u8; crate::tlv::ETHER_MAX_LEN];
        let n = Ndp
            .encode(&info, [7, 7, 7, 7, 7, 7], "eth2", 9, Some(addr), Ndp.default_ttl_secs(), &mut out)
            .unwrap();
        assert!(Ndp.check(&out[..n]));
        let neighbor = Ndp.decode(&out[..n]).unwrap();
        assert_eq!(neighbor.chassis_id, "10.0.0.7");
        assert_eq!(neighbor.port_id, "9");
        assert_eq!(neighbor.mgmt_addr, Some(std::net::IpAddr::V4(addr)));
        assert_eq!(neighbor.ttl_secs, NDP_DEFAULT_TTL);
    }

    #[test]
    fn goodbye_writes_topology_state_down_and_decodes_to_zero_ttl() {
        let info = sample_info();
        let mut out = [0u8; crate::tlv::ETHER_MAX_LEN];
        let n = Ndp.encode(&info, [7, 7, 7, 7, 7, 7], "eth2", 9, None, 0, &mut out).unwrap();
        let neighbor = Ndp.decode(&out[..n]).unwrap();
        assert_eq!(neighbor.ttl_secs, 0);
    }

    #[test]
    fn encode_truncates_ifindex_over_255_into_segment_id() {
        let info = sample_info();
        let mut out = [0u8; crate::tlv::ETHER_MAX_LEN];
        let n = Ndp
            .encode(&info, [7, 7, 7, 7, 7, 7], "eth2", 300, None, Ndp.default_ttl_secs(), &mut out)
            .unwrap();
        let neighbor = Ndp.decode(&out[..n]).unwrap();
        assert_eq!(neighbor.port_id, "255");
    }
}
