//! Local system information advertised to neighbors: hostname, OS release, uptime, and the
//! LLDP-MED-ish facts (capabilities, device type, country, location) every protocol module reads
//! from when it encodes an outgoing frame.
//!
//! Collected once at startup and refreshed on SIGHUP, not per-frame: none of this changes often
//! enough to justify a syscall on every transmit tick.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::platform::PlatformAdapter;

/// LLDP System Capabilities bitmap (IEEE 802.1AB table 8-4), reused as-is by CDP/FDP which encode
/// a similar but not identical bitmap from the same underlying facts. A plain newtype rather than
/// a `bitflags!` type: five OR'd constants don't need a macro-generated type family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities(pub u16);

impl Capabilities {
    pub const OTHER: Capabilities = Capabilities(0b0000_0000_0001);
    pub const REPEATER: Capabilities = Capabilities(0b0000_0000_0010);
    pub const BRIDGE: Capabilities = Capabilities(0b0000_0000_0100);
    pub const WLAN_AP: Capabilities = Capabilities(0b0000_0000_1000);
    pub const ROUTER: Capabilities = Capabilities(0b0000_0001_0000);
    pub const TELEPHONE: Capabilities = Capabilities(0b0000_0010_0000);
    pub const DOCSIS: Capabilities = Capabilities(0b0000_0100_0000);
    pub const STATION: Capabilities = Capabilities(0b0000_1000_0000);

    pub fn contains(self, other: Capabilities) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u16 {
        self.0
    }
}

impl std::ops::BitOr for Capabilities {
    type Output = Capabilities;
    fn bitor(self, rhs: Capabilities) -> Capabilities {
        Capabilities(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for Capabilities {
    fn bitor_assign(&mut self, rhs: Capabilities) {
        self.0 |= rhs.0;
    }
}

#[derive(Debug, Clone)]
pub struct SysInfo {
    pub hostname: String,
    pub os_name: String,
    pub os_release: String,
    pub started_at: Instant,
    pub uptime_at_start: Duration,
    pub mgmt_addr: Option<IpAddr>,
    pub capabilities: Capabilities,
    pub med_device_type: MedDeviceType,
    pub country: Option<[u8; 2]>,
    pub location: Option<String>,
    pub physif_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MedDeviceType {
    NotDefined,
    EndpointClass1,
    EndpointClass2,
    EndpointClass3,
    NetworkConnectivity,
}

impl SysInfo {
    /// Collects everything fixed at process start. `mgmt_addr` is resolved by the caller from
    /// the interface table, since it depends on enumeration having already run once.
    pub fn collect(adapter: &dyn PlatformAdapter, config: &Config, physif_count: usize) -> std::io::Result<Self> {
        let hostname = adapter.hostname()?;
        let (os_name, os_release) = adapter.os_name_release()?;
        let uptime_at_start = Duration::from_secs(adapter.uptime_secs()?);

        let mut capabilities = Capabilities::STATION;
        if physif_count > 1 {
            capabilities |= Capabilities::BRIDGE;
        }

        Ok(SysInfo {
            hostname,
            os_name,
            os_release,
            started_at: Instant::now(),
            uptime_at_start,
            mgmt_addr: config.mgmt_addr_literal,
            capabilities,
            med_device_type: MedDeviceType::NetworkConnectivity,
            country: config.country,
            location: config.location.clone(),
            physif_count,
        })
    }

    /// Process uptime for inclusion in outgoing frames, reflecting both the kernel uptime at
    /// process start and wall-clock time elapsed since.
    pub fn uptime(&self) -> Duration {
        self.uptime_at_start + self.started_at.elapsed()
    }

    pub fn sys_descr(&self) -> String {
        format!("{} {}", self.os_name, self.os_release)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_capability_set_only_with_multiple_physical_interfaces() {
        let mut caps = Capabilities::STATION;
        assert!(!caps.contains(Capabilities::BRIDGE));
        caps |= Capabilities::BRIDGE;
        assert!(caps.contains(Capabilities::BRIDGE));
    }
}
