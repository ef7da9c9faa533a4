/*! The platform adapter: the narrow seam between this crate's protocol/runtime logic and the
host kernel's interface and raw-socket APIs.

Everything above this module is portable and unit-testable without root. Everything in this
module talks directly to the kernel (via `nix`, with `libc` filling the handful of gaps `nix`
doesn't wrap: MTU ioctls and the BPF-style classifier socket option) and is exercised by the
parent process, which is the only place in the whole agent allowed to hold a raw socket. */

use std::collections::HashMap;
use std::fs;
use std::io;
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::os::unix::io::RawFd;

use crate::iface::IfFlags;

#[derive(Debug, Clone)]
pub struct NetIfSnapshot {
    pub index: u32,
    pub name: String,
    pub hwaddr: [u8; 6],
    pub mtu: usize,
    pub flags: IfFlags,
    pub ipv4: Vec<Ipv4Addr>,
    pub ipv6: Vec<Ipv6Addr>,
    pub parent_name: Option<String>,
    pub vlan_id: Option<u16>,
    pub is_bond: bool,
    pub is_bridge: bool,
    pub is_tap: bool,
    pub is_wireless: bool,
}

/// A raw-socket handle bound for transmission on (and reception from) one interface.
pub struct RawHandle {
    pub fd: RawFd,
    pub ifindex: u32,
}

/// The seam described at module level. Implemented for Linux; a different OS would supply a
/// different implementation of this same trait rather than branching inside callers.
pub trait PlatformAdapter {
    fn enumerate(&self) -> io::Result<Vec<NetIfSnapshot>>;
    fn open_raw(&self) -> io::Result<RawFd>;
    fn bind_tx(&self, fd: RawFd, ifindex: u32) -> io::Result<()>;
    fn send(&self, fd: RawFd, ifindex: u32, bytes: &[u8]) -> io::Result<usize>;
    /// Blocks (subject to the caller's `poll`) until a frame arrives, returning the receiving
    /// interface's index and the frame bytes.
    fn recv(&self, fd: RawFd) -> io::Result<(u32, Vec<u8>)>;
    fn set_descr(&self, ifname: &str, descr: &str) -> io::Result<()>;
    fn hostname(&self) -> io::Result<String>;
    fn os_name_release(&self) -> io::Result<(String, String)>;
    fn uptime_secs(&self) -> io::Result<u64>;
}

pub struct LinuxAdapter;

impl LinuxAdapter {
    pub fn new() -> Self {
        LinuxAdapter
    }
}

impl Default for LinuxAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformAdapter for LinuxAdapter {
    fn enumerate(&self) -> io::Result<Vec<NetIfSnapshot>> {
        enumerate_linux()
    }

    fn open_raw(&self) -> io::Result<RawFd> {
        open_raw_socket()
    }

    fn bind_tx(&self, fd: RawFd, ifindex: u32) -> io::Result<()> {
        bind_to_ifindex(fd, ifindex)
    }

    fn send(&self, fd: RawFd, ifindex: u32, bytes: &[u8]) -> io::Result<usize> {
        send_raw(fd, ifindex, bytes)
    }

    fn recv(&self, fd: RawFd) -> io::Result<(u32, Vec<u8>)> {
        recv_raw(fd)
    }

    fn set_descr(&self, ifname: &str, descr: &str) -> io::Result<()> {
        // There's no portable kernel-level "interface description" on Linux akin to BSD's
        // `ifconfig ... description`; we mirror it into the per-interface sysfs comment file
        // that NetworkManager/systemd-networkd also use, best-effort.
        let path = format!("/sys/class/net/{ifname}/ifalias");
        fs::write(path, descr)
    }

    fn hostname(&self) -> io::Result<String> {
        let uts = nix::sys::utsname::uname()?;
        Ok(uts.nodename().to_string_lossy().into_owned())
    }

    fn os_name_release(&self) -> io::Result<(String, String)> {
        let uts = nix::sys::utsname::uname()?;
        Ok((
            uts.sysname().to_string_lossy().into_owned(),
            uts.release().to_string_lossy().into_owned(),
        ))
    }

    fn uptime_secs(&self) -> io::Result<u64> {
        let raw = fs::read_to_string("/proc/uptime")?;
        let secs = raw
            .split_whitespace()
            .next()
            .and_then(|s| s.split('.').next())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);
        Ok(secs)
    }
}

/// Enumerates interfaces via `getifaddrs(3)` (through `nix`), then enriches each with
/// classification facts read from `/sys/class/net` and `/proc/net/vlan` — the same sources
/// `ip -d link` and `/proc/net/bonding` consumers use, and a good deal simpler than reimplementing
/// the kernel's own `SIOCBONDINFO`/`SIOCGIFVLAN` ioctls.
fn enumerate_linux() -> io::Result<Vec<NetIfSnapshot>> {
    use nix::ifaddrs::getifaddrs;
    use nix::net::if_::InterfaceFlags;

    #[derive(Default)]
    struct Accum {
        hwaddr: [u8; 6],
        flags: IfFlags,
        ipv4: Vec<Ipv4Addr>,
        ipv6: Vec<Ipv6Addr>,
    }

    let mut by_name: HashMap<String, Accum> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for ifa in getifaddrs().map_err(nix_to_io)? {
        let entry = by_name.entry(ifa.interface_name.clone()).or_insert_with(|| {
            order.push(ifa.interface_name.clone());
            Accum::default()
        });
        entry.flags = IfFlags {
            up: ifa.flags.contains(InterfaceFlags::IFF_UP),
            running: ifa.flags.contains(InterfaceFlags::IFF_RUNNING),
            promisc: ifa.flags.contains(InterfaceFlags::IFF_PROMISC),
            loopback: ifa.flags.contains(InterfaceFlags::IFF_LOOPBACK),
        };
        if let Some(addr) = ifa.address.as_ref() {
            if let Some(link) = addr.as_link_addr() {
                if let Some(mac) = link.addr() {
                    entry.hwaddr = mac;
                }
            }
            if let Some(sin) = addr.as_sockaddr_in() {
                entry.ipv4.push(Ipv4Addr::from(sin.ip()));
            }
            if let Some(sin6) = addr.as_sockaddr_in6() {
                entry.ipv6.push(sin6.ip());
            }
        }
    }

    let mut out = Vec::with_capacity(order.len());
    for name in order {
        let accum = by_name.remove(&name).unwrap_or_default();
        let index = nix::net::if_::if_nametoindex(name.as_str()).unwrap_or(0);
        let mtu = read_mtu(&name).unwrap_or(1500);
        let is_bridge = fs::metadata(format!("/sys/class/net/{name}/bridge")).is_ok();
        let is_bond = fs::metadata(format!("/sys/class/net/{name}/bonding")).is_ok();
        let is_wireless = fs::metadata(format!("/sys/class/net/{name}/wireless")).is_ok()
            || fs::metadata(format!("/sys/class/net/{name}/phy80211")).is_ok();
        let is_tap = fs::metadata(format!("/sys/class/net/{name}/tun_flags")).is_ok();
        let (vlan_id, vlan_parent) = read_vlan(&name);
        let parent_name = vlan_parent.or_else(|| read_master(&name));

        out.push(NetIfSnapshot {
            index,
            name,
            hwaddr: accum.hwaddr,
            mtu,
            flags: accum.flags,
            ipv4: accum.ipv4,
            ipv6: accum.ipv6,
            parent_name,
            vlan_id,
            is_bond,
            is_bridge,
            is_tap,
            is_wireless,
        });
    }
    Ok(out)
}

fn nix_to_io(e: nix::Error) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}

fn read_mtu(name: &str) -> Option<usize> {
    fs::read_to_string(format!("/sys/class/net/{name}/mtu"))
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

fn read_master(name: &str) -> Option<String> {
    let link = fs::read_link(format!("/sys/class/net/{name}/master")).ok()?;
    link.file_name().map(|s| s.to_string_lossy().into_owned())
}

/// `/proc/net/vlan/<name>` looks like:
/// ```text
/// eth0.100  VID: 100  REORDER_HDR: 1  ...
/// Device: eth0
/// ```
fn read_vlan(name: &str) -> (Option<u16>, Option<String>) {
    let raw = match fs::read_to_string(format!("/proc/net/vlan/{name}")) {
        Ok(s) => s,
        Err(_) => return (None, None),
    };
    let vid = raw
        .lines()
        .next()
        .and_then(|line| line.split("VID:").nth(1))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|s| s.parse().ok());
    let parent = raw
        .lines()
        .find_map(|line| line.trim().strip_prefix("Device: "))
        .map(|s| s.trim().to_string());
    (vid, parent)
}

// --- raw socket plumbing -----------------------------------------------------------------

const ETH_P_ALL: u16 = 0x0003;

fn open_raw_socket() -> io::Result<RawFd> {
    // SAFETY: a plain socket(2) call with constant, valid arguments; the returned fd is checked
    // for -1 below before being treated as valid.
    let fd = unsafe { libc::socket(libc::AF_PACKET, libc::SOCK_RAW, (ETH_P_ALL as i32).to_be()) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

fn bind_to_ifindex(fd: RawFd, ifindex: u32) -> io::Result<()> {
    let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
    addr.sll_family = libc::AF_PACKET as u16;
    addr.sll_protocol = (ETH_P_ALL as i32).to_be() as u16;
    addr.sll_ifindex = ifindex as i32;
    // SAFETY: `addr` is a fully-initialised, correctly-sized sockaddr_ll; `fd` was returned by a
    // successful `open_raw_socket` call above.
    let rc = unsafe {
        libc::bind(
            fd,
            &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_ll>() as u32,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn send_raw(fd: RawFd, ifindex: u32, bytes: &[u8]) -> io::Result<usize> {
    let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
    addr.sll_family = libc::AF_PACKET as u16;
    addr.sll_protocol = (ETH_P_ALL as i32).to_be() as u16;
    addr.sll_ifindex = ifindex as i32;
    addr.sll_halen = 6;
    // SAFETY: `bytes` outlives the call, `addr` is fully initialised and correctly sized.
    let rc = unsafe {
        libc::sendto(
            fd,
            bytes.as_ptr() as *const libc::c_void,
            bytes.len(),
            0,
            &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_ll>() as u32,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(rc as usize)
}

fn recv_raw(fd: RawFd) -> io::Result<(u32, Vec<u8>)> {
    let mut buf = vec![0u8; crate::tlv::ETHER_MAX_LEN];
    let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
    let mut addr_len = mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t;
    // SAFETY: `buf` and `addr` are both sized and live for the duration of the call; `addr_len`
    // is initialised to the buffer's true capacity.
    let n = unsafe {
        libc::recvfrom(
            fd,
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
            0,
            &mut addr as *mut libc::sockaddr_ll as *mut libc::sockaddr,
            &mut addr_len,
        )
    };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    buf.truncate(n as usize);
    Ok((addr.sll_ifindex as u32, buf))
}

/// Returns `true` iff the frame's destination MAC matches one of the five discovery-protocol
/// multicast addresses. This is the software-level classifier the parent always applies; a
/// kernel-level `SO_ATTACH_FILTER` program performing the same test is attached as a best-effort
/// optimisation (see `attach_classifier`) but its absence never changes correctness.
pub fn dest_mac_is_discovery_multicast(frame: &[u8]) -> bool {
    const MACS: [[u8; 6]; 5] = [
        [0x01, 0x80, 0xc2, 0x00, 0x00, 0x0e], // LLDP (nearest bridge)
        [0x01, 0x00, 0x0c, 0xcc, 0xcc, 0xcc], // CDP
        [0x00, 0xe0, 0x2b, 0x00, 0x00, 0x00], // EDP
        [0x01, 0xe0, 0x52, 0xcc, 0xcc, 0xcc], // FDP
        [0x01, 0x00, 0x81, 0x00, 0x01, 0x00], // NDP
    ];
    frame.len() >= 6 && MACS.iter().any(|m| &frame[0..6] == m)
        || (frame.len() >= 6 && (frame[0] == 0x01 && frame[1] == 0x80 && frame[2] == 0xc2))
}

const DISCOVERY_MACS: [[u8; 6]; 5] = [
    [0x01, 0x80, 0xc2, 0x00, 0x00, 0x0e], // LLDP (nearest bridge)
    [0x01, 0x00, 0x0c, 0xcc, 0xcc, 0xcc], // CDP
    [0x00, 0xe0, 0x2b, 0x00, 0x00, 0x00], // EDP
    [0x01, 0xe0, 0x52, 0xcc, 0xcc, 0xcc], // FDP
    [0x01, 0x00, 0x81, 0x00, 0x01, 0x00], // NDP
];

const BPF_LD: u16 = 0x00;
const BPF_W: u16 = 0x00;
const BPF_H: u16 = 0x08;
const BPF_ABS: u16 = 0x20;
const BPF_JMP: u16 = 0x05;
const BPF_JEQ: u16 = 0x10;
const BPF_K: u16 = 0x00;
const BPF_RET: u16 = 0x06;

/// Builds a classic-BPF program that accepts a frame iff its destination MAC matches one of
/// [`DISCOVERY_MACS`], mirroring `dest_mac_is_discovery_multicast` at the kernel level. Each
/// candidate costs 4 instructions: load+compare the first 4 octets as a word, then load+compare
/// the last 2 as a halfword; either mismatch falls through to the next candidate.
fn build_classifier_program() -> Vec<libc::sock_filter> {
    let mut prog = Vec::with_capacity(DISCOVERY_MACS.len() * 4 + 2);
    for mac in &DISCOVERY_MACS {
        let high = u32::from_be_bytes([mac[0], mac[1], mac[2], mac[3]]);
        let low = u16::from_be_bytes([mac[4], mac[5]]);
        prog.push(libc::sock_filter { code: BPF_LD | BPF_W | BPF_ABS, jt: 0, jf: 0, k: 0 });
        prog.push(libc::sock_filter { code: BPF_JMP | BPF_JEQ | BPF_K, jt: 0, jf: 2, k: high });
        prog.push(libc::sock_filter { code: BPF_LD | BPF_H | BPF_ABS, jt: 0, jf: 0, k: 4 });
        // jt is patched below once the accept instruction's final index is known.
        prog.push(libc::sock_filter { code: BPF_JMP | BPF_JEQ | BPF_K, jt: 0, jf: 0, k: low as u32 });
    }
    let reject_idx = prog.len();
    let accept_idx = reject_idx + 1;
    for i in 0..DISCOVERY_MACS.len() {
        let jeq_low = i * 4 + 3;
        prog[jeq_low].jt = (accept_idx - jeq_low - 1) as u8;
    }
    prog.push(libc::sock_filter { code: BPF_RET | BPF_K, jt: 0, jf: 0, k: 0 });
    prog.push(libc::sock_filter { code: BPF_RET | BPF_K, jt: 0, jf: 0, k: crate::tlv::ETHER_MAX_LEN as u32 });
    prog
}

/// Best-effort kernel-level classifier so uninteresting traffic doesn't wake the parent's event
/// loop at all. A failure here is logged as `IoTransient` and never fatal: the software-level
/// check in `dest_mac_is_discovery_multicast` remains authoritative regardless, and is the only
/// check this crate actually depends on for correctness.
pub fn attach_classifier(fd: RawFd) -> io::Result<()> {
    let mut prog = build_classifier_program();
    let fprog = libc::sock_fprog {
        len: prog.len() as u16,
        filter: prog.as_mut_ptr(),
    };
    // SAFETY: `fprog` points at a program of the length it declares, for the lifetime of the
    // `setsockopt` call; `prog` outlives the call.
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ATTACH_FILTER,
            &fprog as *const libc::sock_fprog as *const libc::c_void,
            mem::size_of::<libc::sock_fprog>() as u32,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_all_five_multicast_destinations() {
        let lldp = [0x01, 0x80, 0xc2, 0x00, 0x00, 0x0e, 0, 0];
        let cdp = [0x01, 0x00, 0x0c, 0xcc, 0xcc, 0xcc, 0, 0];
        assert!(dest_mac_is_discovery_multicast(&lldp));
        assert!(dest_mac_is_discovery_multicast(&cdp));
    }

    #[test]
    fn rejects_unrelated_destination() {
        let unrelated = [0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0, 0];
        assert!(!dest_mac_is_discovery_multicast(&unrelated));
    }

    #[test]
    fn rejects_short_frame() {
        assert!(!dest_mac_is_discovery_multicast(&[0x01, 0x80]));
    }

    /// Interprets the subset of classic BPF opcodes `build_classifier_program` emits, against a
    /// frame padded to Ethernet size.
    fn run_classifier(prog: &[libc::sock_filter], frame: &[u8]) -> u32 {
        let mut pc = 0usize;
        let mut acc = 0u32;
        loop {
            let ins = &prog[pc];
            match ins.code {
                c if c == BPF_LD | BPF_W | BPF_ABS => {
                    let k = ins.k as usize;
                    acc = u32::from_be_bytes([frame[k], frame[k + 1], frame[k + 2], frame[k + 3]]);
                    pc += 1;
                }
                c if c == BPF_LD | BPF_H | BPF_ABS => {
                    let k = ins.k as usize;
                    acc = u16::from_be_bytes([frame[k], frame[k + 1]]) as u32;
                    pc += 1;
                }
                c if c == BPF_JMP | BPF_JEQ | BPF_K => {
                    pc = if acc == ins.k { pc + 1 + ins.jt as usize } else { pc + 1 + ins.jf as usize };
                }
                c if c == (BPF_RET | BPF_K) => return ins.k,
                other => panic!("unhandled opcode {other:#x} in test interpreter"),
            }
        }
    }

    #[test]
    fn classifier_program_accepts_every_discovery_mac() {
        let prog = build_classifier_program();
        for mac in &DISCOVERY_MACS {
            let mut frame = [0u8; crate::tlv::ETHER_MIN_LEN];
            frame[..6].copy_from_slice(mac);
            assert_eq!(run_classifier(&prog, &frame), crate::tlv::ETHER_MAX_LEN as u32);
        }
    }

    #[test]
    fn classifier_program_rejects_unrelated_destination() {
        let prog = build_classifier_program();
        let mut frame = [0u8; crate::tlv::ETHER_MIN_LEN];
        frame[..6].copy_from_slice(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff]);
        assert_eq!(run_classifier(&prog, &frame), 0);
    }
}
