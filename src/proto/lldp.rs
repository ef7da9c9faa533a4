//! IEEE 802.1AB Link Layer Discovery Protocol: EtherType 0x88cc, destination
//! `01:80:c2:00:00:0e`, frame body is a flat sequence of LLDP TLVs terminated by the
//! zero-length End-of-LLDPDU TLV.

use crate::error::{AppError, Result};
use crate::sysinfo::SysInfo;
use crate::tlv::{FrameReader, FrameWriter};

use super::{Neighbor, Proto, ProtocolModule};

const ETHERTYPE_LLDP: u16 = 0x88cc;
const DEST_MAC: [u8; 6] = [0x01, 0x80, 0xc2, 0x00, 0x00, 0x0e];

const TLV_END: u8 = 0;
const TLV_CHASSIS_ID: u8 = 1;
const TLV_PORT_ID: u8 = 2;
const TLV_TTL: u8 = 3;
const TLV_PORT_DESCR: u8 = 4;
const TLV_SYS_NAME: u8 = 5;
const TLV_SYS_DESCR: u8 = 6;
const TLV_CAPABILITIES: u8 = 7;
const TLV_MGMT_ADDR: u8 = 8;

const CHASSIS_SUBTYPE_MAC: u8 = 4;
const PORT_SUBTYPE_IFNAME: u8 = 5;

pub struct Lldp;

impl ProtocolModule for Lldp {
    fn proto(&self) -> Proto {
        Proto::Lldp
    }

    fn dest_mac(&self) -> [u8; 6] {
        DEST_MAC
    }

    fn default_ttl_secs(&self) -> u16 {
        120
    }

    fn check(&self, frame: &[u8]) -> bool {
        frame.len() >= 14
            && frame[0..6] == DEST_MAC
            && u16::from_be_bytes([frame[12], frame[13]]) == ETHERTYPE_LLDP
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
        let mut w = FrameWriter::new(out.len());
        w.put_bytes(&DEST_MAC)?;
        w.put_bytes(&local_mac)?;
        w.put_u16(ETHERTYPE_LLDP)?;

        let mut chassis = Vec::with_capacity(7);
        chassis.push(CHASSIS_SUBTYPE_MAC);
        chassis.extend_from_slice(&local_mac);
        w.put_tlv(TLV_CHASSIS_ID, &chassis)?;

        let mut port = Vec::with_capacity(1 + ifname.len());
        port.push(PORT_SUBTYPE_IFNAME);
        port.extend_from_slice(ifname.as_bytes());
        w.put_tlv(TLV_PORT_ID, &port)?;

        w.put_tlv(TLV_TTL, &ttl_secs.to_be_bytes())?;
        // A goodbye (ttl_secs == 0) carries only chassis/port/TTL, per §4.2's "shorter TLV set".
        if ttl_secs > 0 {
            w.put_tlv(TLV_SYS_NAME, info.hostname.as_bytes())?;
            w.put_tlv(TLV_SYS_DESCR, info.sys_descr().as_bytes())?;
            w.put_tlv(TLV_CAPABILITIES, &caps_bytes(info))?;
            if let Some(addr) = info.mgmt_addr {
                w.put_tlv(TLV_MGMT_ADDR, &mgmt_addr_bytes(addr))?;
            }
        }
        w.put_tlv(TLV_END, &[])?;
        w.pad_to(crate::tlv::ETHER_MIN_LEN)?;

        let written = w.pos();
        let (len, buf) = w.finish();
        out[..len].copy_from_slice(&buf[..len]);
        Ok(written)
    }

    fn decode(&self, frame: &[u8]) -> Result<Neighbor> {
        let mut r = FrameReader::new(frame);
        r.skip(14)?; // dest, src, ethertype

        let mut neighbor = Neighbor::default();
        loop {
            let (ty, value) = r.get_tlv()?;
            match ty {
                TLV_END => break,
                TLV_CHASSIS_ID if !value.is_empty() => {
                    neighbor.chassis_id = hex_or_utf8(&value[1..]);
                }
                TLV_PORT_ID if !value.is_empty() => {
                    neighbor.port_id = hex_or_utf8(&value[1..]);
                }
                TLV_TTL if value.len() == 2 => {
                    neighbor.ttl_secs = u16::from_be_bytes([value[0], value[1]]);
                }
                TLV_PORT_DESCR => {
                    neighbor.port_descr = Some(String::from_utf8_lossy(value).into_owned());
                }
                TLV_SYS_NAME => {
                    neighbor.sysname = Some(String::from_utf8_lossy(value).into_owned());
                }
                TLV_SYS_DESCR => {
                    neighbor.sys_descr = Some(String::from_utf8_lossy(value).into_owned());
                }
                TLV_CAPABILITIES if value.len() >= 2 => {
                    neighbor.capabilities = u16::from_be_bytes([value[0], value[1]]);
                }
                _ => {}
            }
            if r.remaining() == 0 {
                return Err(AppError::malformed("lldp", "missing End-of-LLDPDU TLV"));
            }
        }
        Ok(neighbor)
    }
}

fn caps_bytes(info: &SysInfo) -> [u8; 4] {
    let caps = info.capabilities.bits();
    // Capability + enabled bitmaps, both set identically: this crate doesn't model per-capability
    // enablement separately from presence.
    let b = caps.to_be_bytes();
    [b[0], b[1], b[0], b[1]]
}

fn mgmt_addr_bytes(addr: std::net::IpAddr) -> Vec<u8> {
    match addr {
        std::net::IpAddr::V4(v4) => {
            let mut out = vec![5, 1]; // length of address subtype+addr, IANA AFN=1 (IPv4)
            out.extend_from_slice(&v4.octets());
            out.push(2); // interface numbering subtype: ifindex
            out.extend_from_slice(&0u32.to_be_bytes());
            out.push(0); // OID length
            out
        }
        std::net::IpAddr::V6(v6) => {
            let mut out = vec![17, 2]; // AFN=2 (IPv6)
            out.extend_from_slice(&v6.octets());
            out.push(2);
            out.extend_from_slice(&0u32.to_be_bytes());
            out.push(0);
            out
        }
    }
}

fn hex_or_utf8(bytes: &[u8]) -> String {
    if bytes.len() == 6 {
        bytes
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(":")
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::net::{IpAddr, Ipv4Addr};

    fn sample_info() -> SysInfo {
        SysInfo {
            hostname: "switch1".to_string(),
            os_name: "Linux".to_string(),
            os_release: "6.1.0".to_string(),
            started_at: std::time::Instant::now(),
            uptime_at_start: std::time::Duration::from_secs(10),
            mgmt_addr: Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1))),
            capabilities: crate::sysinfo::Capabilities::STATION,
            med_device_type: crate::sysinfo::MedDeviceType::NetworkConnectivity,
            country: None,
            location: None,
            physif_count: 1,
        }
    }

    #[test]
    fn check_accepts_only_matching_ethertype_and_dest() {
        let mut frame = vec![0u8; 20];
        frame[0..6].copy_from_slice(&DEST_MAC);
        frame[12..14].copy_from_slice(&ETHERTYPE_LLDP.to_be_bytes());
        assert!(Lldp.check(&frame));
        frame[13] = 0;
        assert!(!Lldp.check(&frame));
    }

    #[test]
    fn encode_then_decode_round_trips_ttl_and_sysname() {
        let info = sample_info();
        let mut out = [0u8; crate::tlv::ETHER_MAX_LEN];
        let n = Lldp
            .encode(&info, [0, 1, 2, 3, 4, 5], "eth0", 3, None, Lldp.default_ttl_secs(), &mut out)
            .unwrap();
        assert!(Lldp.check(&out[..n]));
        let neighbor = Lldp.decode(&out[..n]).unwrap();
        assert_eq!(neighbor.ttl_secs, Lldp.default_ttl_secs());
        assert_eq!(neighbor.sysname.as_deref(), Some("switch1"));
    }

    #[test]
    fn goodbye_has_zero_ttl_and_drops_optional_tlvs() {
        let info = sample_info();
        let mut out = [0u8; crate::tlv::ETHER_MAX_LEN];
        let n = Lldp.encode(&info, [0, 1, 2, 3, 4, 5], "eth0", 3, None, 0, &mut out).unwrap();
        let neighbor = Lldp.decode(&out[..n]).unwrap();
        assert_eq!(neighbor.ttl_secs, 0);
        assert!(neighbor.sysname.is_none());
    }

    #[test]
    fn decode_rejects_frame_missing_end_tlv() {
        let mut w = FrameWriter::new(64);
        w.put_bytes(&DEST_MAC).unwrap();
        w.put_bytes(&[0u8; 6]).unwrap();
        w.put_u16(ETHERTYPE_LLDP).unwrap();
        w.put_tlv(TLV_SYS_NAME, b"x").unwrap();
        let (len, buf) = w.finish();
        let err = Lldp.decode(&buf[..len]).unwrap_err();
        assert!(matches!(err, AppError::Malformed { .. }));
    }
}
