//! The five discovery protocols this crate speaks, behind one small trait so the scheduler,
//! parent, and child never need to know which protocol they're pushing bytes for.

pub mod cdp;
pub mod edp;
pub mod fdp;
mod llc;
pub mod lldp;
pub mod ndp;

use crate::error::Result;
use crate::sysinfo::SysInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Proto {
    Lldp,
    Cdp,
    Edp,
    Fdp,
    Ndp,
}

impl Proto {
    pub const ALL: [Proto; 5] = [Proto::Lldp, Proto::Cdp, Proto::Edp, Proto::Fdp, Proto::Ndp];

    pub fn name(self) -> &'static str {
        match self {
            Proto::Lldp => "lldp",
            Proto::Cdp => "cdp",
            Proto::Edp => "edp",
            Proto::Fdp => "fdp",
            Proto::Ndp => "ndp",
        }
    }

    pub fn module(self) -> &'static dyn ProtocolModule {
        match self {
            Proto::Lldp => &lldp::Lldp,
            Proto::Cdp => &cdp::Cdp,
            Proto::Edp => &edp::Edp,
            Proto::Fdp => &fdp::Fdp,
            Proto::Ndp => &ndp::Ndp,
        }
    }
}

impl std::fmt::Display for Proto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything a discovered neighbor told us, normalized across protocols. Fields unused by a
/// given protocol are left `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Neighbor {
    pub chassis_id: String,
    pub port_id: String,
    pub port_descr: Option<String>,
    pub sysname: Option<String>,
    pub sys_descr: Option<String>,
    pub ttl_secs: u16,
    pub capabilities: u16,
    pub mgmt_addr: Option<std::net::IpAddr>,
    pub vlan_id: Option<u16>,
}

/// Uniform encode/decode/admission surface every protocol module implements.
///
/// `check` is the cheap admission test the receive path runs before attempting a full `decode`:
/// does this frame even belong to this protocol (right destination MAC, right EtherType or
/// LLC/SNAP OUI+PID)? It must never allocate or fail; `decode` does the real, fallible parse.
pub trait ProtocolModule {
    fn proto(&self) -> Proto;

    /// The protocol's unicast/multicast destination MAC.
    fn dest_mac(&self) -> [u8; 6];

    /// Default time-to-live advertised for this protocol's own frames, in seconds.
    fn default_ttl_secs(&self) -> u16;

    /// True if `frame` is addressed and framed the way this protocol expects. Does not validate
    /// the payload.
    fn check(&self, frame: &[u8]) -> bool;

    /// Encodes one advertisement frame for `info` into `out`, returning the number of bytes
    /// written. `out` is sized to the sending interface's MTU. `ifname` and `ifindex` identify the
    /// egress interface (used for the Port ID TLV/field and, in NDP, the segment id); `local_ipv4`
    /// is that interface's own address, if any (NDP only). `ttl_secs` is normally
    /// [`ProtocolModule::default_ttl_secs`]; passing `0` produces the "goodbye" variant withdrawing
    /// the announcement (§4.2). NDP carries no wire TTL field, so its goodbye is expressed instead
    /// as a topology-state change — see `ndp::Ndp::encode`.
    #[allow(clippy::too_many_arguments)]
    fn encode(
        &self,
        info: &SysInfo,
        local_mac: [u8; 6],
        ifname: &str,
        ifindex: u32,
        local_ipv4: Option<std::net::Ipv4Addr>,
        ttl_secs: u16,
        out: &mut [u8],
    ) -> Result<usize>;

    /// Parses a frame already accepted by `check` into a normalized [`Neighbor`].
    fn decode(&self, frame: &[u8]) -> Result<Neighbor>;
}

/// Runs `check` for every protocol in [`Proto::ALL`] and returns the first match, or `None` if
/// the frame doesn't belong to any of the five. The receive path's sole entry point for
/// dispatching an arbitrary incoming frame to the right module.
pub fn classify(frame: &[u8]) -> Option<Proto> {
    Proto::ALL.iter().copied().find(|p| p.module().check(frame))
}

const ETHERTYPE_VLAN: u16 = 0x8100;

/// Unwraps one 802.1Q VLAN tag, if present, by removing its 4 octets (2-octet TPID `0x8100` plus
/// 2-octet TCI) so the destination MAC and the EtherType/length field that follows line up the
/// same way they do in an untagged frame. Every `check`/`decode` in this module assumes that
/// layout, so callers on the receive path must unwrap before passing a frame to [`classify`].
pub fn strip_vlan_tag(frame: &[u8]) -> std::borrow::Cow<'_, [u8]> {
    if frame.len() >= 16 && u16::from_be_bytes([frame[12], frame[13]]) == ETHERTYPE_VLAN {
        let mut out = Vec::with_capacity(frame.len() - 4);
        out.extend_from_slice(&frame[..12]);
        out.extend_from_slice(&frame[16..]);
        std::borrow::Cow::Owned(out)
    } else {
        std::borrow::Cow::Borrowed(frame)
    }
}
