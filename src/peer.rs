//! The neighbor table and the auto-enable state machine, both owned exclusively by the
//! unprivileged child (§3, §4.5).
//!
//! A [`PeerRecord`] exists per `(netif_index, proto)` pair: the last thing that protocol decoded
//! on that interface. [`ProtoStates`] tracks, per protocol, whether it's enabled and when it last
//! heard anything; in auto-enable mode that `enabled` flag only ever flips false→true.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::proto::{Neighbor, Proto};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub netif_index: u32,
    pub proto: Proto,
    pub chassis_id: String,
    pub port_id: String,
    pub system_name: Option<String>,
    pub ttl_secs: u16,
    pub received_at: Instant,
}

impl PeerRecord {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.received_at) >= Duration::from_secs(self.ttl_secs as u64)
    }
}

/// One record per `(netif_index, proto)`, keyed for direct lookup and iterated in insertion-ish
/// order (`BTreeMap` order over the key, which is stable and good enough: nothing promises a
/// richer ordering than "some fixed order", per §9).
#[derive(Debug, Default)]
pub struct PeerTable {
    records: BTreeMap<(u32, Proto), PeerRecord>,
}

impl PeerTable {
    pub fn new() -> Self {
        PeerTable::default()
    }

    /// Applies a freshly decoded neighbor. A TTL of zero withdraws the peer outright rather than
    /// storing a zero-lifetime record (§4.2, §8).
    pub fn apply(&mut self, netif_index: u32, proto: Proto, neighbor: Neighbor, now: Instant) {
        let key = (netif_index, proto);
        if neighbor.ttl_secs == 0 {
            self.records.remove(&key);
            return;
        }
        self.records.insert(
            key,
            PeerRecord {
                netif_index,
                proto,
                chassis_id: neighbor.chassis_id,
                port_id: neighbor.port_id,
                system_name: neighbor.sysname,
                ttl_secs: neighbor.ttl_secs,
                received_at: now,
            },
        );
    }

    /// Drops every record whose TTL has lapsed relative to `now`.
    pub fn expire(&mut self, now: Instant) {
        self.records.retain(|_, record| !record.is_expired(now));
    }

    pub fn get(&self, netif_index: u32, proto: Proto) -> Option<&PeerRecord> {
        self.records.get(&(netif_index, proto))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerRecord> {
        self.records.values()
    }
}

#[derive(Debug, Clone, Copy)]
struct ProtoState {
    enabled: bool,
    last_rx: Option<Instant>,
}

/// Per-protocol enable state, plus the optional auto-enable promotion rule: a protocol that
/// starts disabled becomes (and remains) enabled the moment it successfully decodes a frame on
/// any interface (§4.5).
#[derive(Debug)]
pub struct ProtoStates {
    auto_enable: bool,
    states: BTreeMap<Proto, ProtoState>,
}

impl ProtoStates {
    /// `configured` is the set of protocols the command line turned on directly; every other
    /// protocol in [`Proto::ALL`] starts disabled and, if `auto_enable` is set, is eligible for
    /// promotion on first decode.
    pub fn new(configured: &[Proto], auto_enable: bool) -> Self {
        let states = Proto::ALL
            .iter()
            .map(|&p| {
                (
                    p,
                    ProtoState {
                        enabled: configured.contains(&p),
                        last_rx: None,
                    },
                )
            })
            .collect();
        ProtoStates { auto_enable, states }
    }

    pub fn is_enabled(&self, proto: Proto) -> bool {
        self.states.get(&proto).map(|s| s.enabled).unwrap_or(false)
    }

    /// Records a successful decode, promoting the protocol to enabled if auto-enable is active.
    /// Never demotes: once enabled, always enabled for the life of the process.
    pub fn on_decode(&mut self, proto: Proto, now: Instant) {
        if let Some(state) = self.states.get_mut(&proto) {
            state.last_rx = Some(now);
            if self.auto_enable {
                state.enabled = true;
            }
        }
    }

    pub fn enabled_protocols(&self) -> Vec<Proto> {
        self.states
            .iter()
            .filter(|(_, s)| s.enabled)
            .map(|(&p, _)| p)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn neighbor(ttl: u16) -> Neighbor {
        Neighbor {
            chassis_id: "aa:bb:cc:dd:ee:ff".to_string(),
            port_id: "eth0".to_string(),
            ttl_secs: ttl,
            sysname: Some("lab1".to_string()),
            ..Neighbor::default()
        }
    }

    #[test]
    fn decode_inserts_one_record_per_netif_proto_pair() {
        let mut table = PeerTable::new();
        table.apply(1, Proto::Lldp, neighbor(120), Instant::now());
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(1, Proto::Lldp).unwrap().system_name.as_deref(), Some("lab1"));
    }

    #[test]
    fn ttl_zero_withdraws_rather_than_stores() {
        let mut table = PeerTable::new();
        let now = Instant::now();
        table.apply(1, Proto::Lldp, neighbor(120), now);
        assert_eq!(table.len(), 1);
        table.apply(1, Proto::Lldp, neighbor(0), now);
        assert!(table.is_empty());
    }

    #[test]
    fn expire_drops_only_lapsed_records() {
        let mut table = PeerTable::new();
        let t0 = Instant::now();
        table.apply(1, Proto::Lldp, neighbor(1), t0);
        table.apply(2, Proto::Cdp, neighbor(3600), t0);
        table.expire(t0 + Duration::from_secs(2));
        assert!(table.get(1, Proto::Lldp).is_none());
        assert!(table.get(2, Proto::Cdp).is_some());
    }

    #[test]
    fn auto_enable_promotes_only_the_protocol_that_decoded() {
        let mut states = ProtoStates::new(&[], true);
        assert!(!states.is_enabled(Proto::Cdp));
        states.on_decode(Proto::Cdp, Instant::now());
        assert!(states.is_enabled(Proto::Cdp));
        assert!(!states.is_enabled(Proto::Lldp));
    }

    #[test]
    fn auto_enable_promotion_never_regresses() {
        let mut states = ProtoStates::new(&[], true);
        states.on_decode(Proto::Lldp, Instant::now());
        states.on_decode(Proto::Lldp, Instant::now());
        assert!(states.is_enabled(Proto::Lldp));
    }

    #[test]
    fn without_auto_enable_decoding_never_promotes() {
        let mut states = ProtoStates::new(&[], false);
        states.on_decode(Proto::Ndp, Instant::now());
        assert!(!states.is_enabled(Proto::Ndp));
    }

    #[test]
    fn configured_protocols_start_enabled_regardless_of_auto_enable() {
        let states = ProtoStates::new(&[Proto::Lldp], false);
        assert!(states.is_enabled(Proto::Lldp));
        assert!(!states.is_enabled(Proto::Cdp));
    }
}
