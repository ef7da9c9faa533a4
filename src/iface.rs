/*! Network interface model, enumeration, and classification.

Interfaces form a tree (physical → bond/bridge → vlan) but we never store actual parent/child
pointers between them: everything lives in one owning [`IfTable`], indexed by `ifindex`, and
relationships are plain index lookups. This sidesteps the aliasing problems a linked structure of
interfaces would have in Rust; see the re-architecture notes for the rationale. */

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Instant;

use crate::error::{AppError, Result};
use crate::platform::{NetIfSnapshot, PlatformAdapter};

pub const IFNAMSIZ: usize = 16;

/// The broad category of a network interface, used to decide eligibility for discovery traffic
/// and to compute parent/child relationships.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfKind {
    Physical,
    Bond,
    Bridge,
    Vlan,
    Wireless,
    Tap,
    Other,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IfFlags {
    pub up: bool,
    pub running: bool,
    pub promisc: bool,
    pub loopback: bool,
}

/// One network interface, as tracked across enumeration passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetIf {
    pub index: u32,
    pub name: String,
    pub hwaddr: [u8; 6],
    pub mtu: usize,
    pub kind: IfKind,
    pub flags: IfFlags,
    pub ipv4: Vec<Ipv4Addr>,
    pub ipv6: Vec<Ipv6Addr>,
    /// `ifindex` of the parent, if this is a vlan/bond/bridge child. Physical interfaces always
    /// have `parent == None`.
    pub parent: Option<u32>,
    /// `ifindex`es of children, in enumeration order.
    pub children: Vec<u32>,
    pub vlan_id: Option<u16>,
    pub description: Option<String>,
    pub last_tx_ok: Option<Instant>,
}

impl NetIf {
    pub fn is_eligible(&self, include_tap: bool, include_wireless: bool) -> bool {
        if self.flags.loopback {
            return false;
        }
        if !self.flags.up || !self.flags.running {
            return false;
        }
        match self.kind {
            IfKind::Tap if !include_tap => false,
            IfKind::Wireless if !include_wireless => false,
            _ => true,
        }
    }
}

/// The live set of interfaces, indexed by `ifindex`. Iteration order is enumeration order, which
/// is the only ordering guarantee the design makes.
#[derive(Debug, Default)]
pub struct IfTable {
    by_index: BTreeMap<u32, NetIf>,
    order: Vec<u32>,
    pub physif_count: usize,
}

impl IfTable {
    pub fn new() -> Self {
        IfTable::default()
    }

    pub fn get(&self, index: u32) -> Option<&NetIf> {
        self.by_index.get(&index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NetIf> {
        self.order.iter().filter_map(move |i| self.by_index.get(i))
    }

    pub fn by_name(&self, name: &str) -> Option<&NetIf> {
        self.iter().find(|n| n.name == name)
    }

    pub fn len(&self) -> usize {
        self.by_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty()
    }

    /// Re-derives the table from a fresh platform snapshot, preserving `last_tx_ok` and
    /// `description` for interfaces that survive across the pass (matched by `ifindex`).
    /// Interfaces the kernel no longer reports are dropped.
    pub fn reconcile(&mut self, snapshots: Vec<NetIfSnapshot>, exclude: &ExcludeSet) {
        let mut next = BTreeMap::new();
        let mut order = Vec::with_capacity(snapshots.len());
        let mut physif_count = 0;

        for snap in &snapshots {
            if exclude.contains(&snap.name) {
                continue;
            }
            let kind = classify(snap);
            if matches!(kind, IfKind::Physical) && !snap.flags.loopback {
                physif_count += 1;
            }
            let carried = self.by_index.get(&snap.index);
            let netif = NetIf {
                index: snap.index,
                name: snap.name.clone(),
                hwaddr: snap.hwaddr,
                mtu: snap.mtu,
                kind,
                flags: snap.flags,
                ipv4: snap.ipv4.clone(),
                ipv6: snap.ipv6.clone(),
                parent: None,
                children: Vec::new(),
                vlan_id: snap.vlan_id,
                description: carried.and_then(|c| c.description.clone()),
                last_tx_ok: carried.and_then(|c| c.last_tx_ok),
            };
            order.push(snap.index);
            next.insert(snap.index, netif);
        }

        // Resolve parent/child relationships: a vlan or bond/bridge member's parent is named by
        // the adapter via `parent_name`; physical interfaces never have one.
        let name_to_index: BTreeMap<&str, u32> =
            next.values().map(|n| (n.name.as_str(), n.index)).collect();
        for snap in &snapshots {
            if let Some(parent_name) = &snap.parent_name {
                if let (Some(&parent_idx), true) =
                    (name_to_index.get(parent_name.as_str()), next.contains_key(&snap.index))
                {
                    if let Some(child) = next.get_mut(&snap.index) {
                        child.parent = Some(parent_idx);
                    }
                    if let Some(parent) = next.get_mut(&parent_idx) {
                        if !parent.children.contains(&snap.index) {
                            parent.children.push(snap.index);
                        }
                    }
                }
            }
        }

        self.by_index = next;
        self.order = order;
        self.physif_count = physif_count;
    }
}

fn classify(snap: &NetIfSnapshot) -> IfKind {
    if snap.is_bond {
        IfKind::Bond
    } else if snap.is_bridge {
        IfKind::Bridge
    } else if snap.vlan_id.is_some() {
        IfKind::Vlan
    } else if snap.is_tap {
        IfKind::Tap
    } else if snap.is_wireless {
        IfKind::Wireless
    } else if snap.parent_name.is_none() {
        IfKind::Physical
    } else {
        IfKind::Other
    }
}

/// Interface names excluded from discovery regardless of how they classify.
#[derive(Debug, Default, Clone)]
pub struct ExcludeSet(Vec<String>);

impl ExcludeSet {
    pub fn new() -> Self {
        ExcludeSet(Vec::new())
    }

    pub fn insert(&mut self, name: impl Into<String>) {
        self.0.push(name.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|n| n == name)
    }
}

/// Runs one enumeration pass against the platform adapter, rejecting unknown exclude-set entries
/// up front (an exclude name that matches nothing is still valid; only a bad interface name given
/// explicitly to `-m`, handled by the config loader, is an error).
pub fn enumerate(adapter: &dyn PlatformAdapter, table: &mut IfTable, exclude: &ExcludeSet) -> Result<()> {
    let snapshots = adapter
        .enumerate()
        .map_err(|e| AppError::io_fatal("interface enumeration", e))?;
    table.reconcile(snapshots, exclude);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::NetIfSnapshot;

    fn snap(index: u32, name: &str) -> NetIfSnapshot {
        NetIfSnapshot {
            index,
            name: name.to_string(),
            hwaddr: [0, 1, 2, 3, 4, index as u8],
            mtu: 1500,
            flags: IfFlags {
                up: true,
                running: true,
                promisc: false,
                loopback: false,
            },
            ipv4: vec![],
            ipv6: vec![],
            parent_name: None,
            vlan_id: None,
            is_bond: false,
            is_bridge: false,
            is_tap: false,
            is_wireless: false,
        }
    }

    #[test]
    fn physical_interface_has_no_parent() {
        let mut table = IfTable::new();
        table.reconcile(vec![snap(1, "eth0")], &ExcludeSet::new());
        assert_eq!(table.get(1).unwrap().parent, None);
        assert_eq!(table.physif_count, 1);
    }

    #[test]
    fn vlan_child_gets_parent_back_reference() {
        let mut parent = snap(1, "eth0");
        parent.is_bond = false;
        let mut vlan = snap(2, "eth0.100");
        vlan.vlan_id = Some(100);
        vlan.parent_name = Some("eth0".to_string());

        let mut table = IfTable::new();
        table.reconcile(vec![parent, vlan], &ExcludeSet::new());

        assert_eq!(table.get(2).unwrap().parent, Some(1));
        assert_eq!(table.get(1).unwrap().children, vec![2]);
        assert_eq!(table.get(2).unwrap().kind, IfKind::Vlan);
    }

    #[test]
    fn excluded_interface_is_dropped() {
        let mut exclude = ExcludeSet::new();
        exclude.insert("eth1");
        let mut table = IfTable::new();
        table.reconcile(vec![snap(1, "eth0"), snap(2, "eth1")], &exclude);
        assert_eq!(table.len(), 1);
        assert!(table.by_name("eth1").is_none());
    }

    #[test]
    fn reenumeration_without_kernel_change_is_idempotent() {
        let mut table = IfTable::new();
        let snaps = || vec![snap(1, "eth0"), snap(2, "eth1")];
        table.reconcile(snaps(), &ExcludeSet::new());
        let first: Vec<_> = table.iter().cloned().collect();
        table.reconcile(snaps(), &ExcludeSet::new());
        let second: Vec<_> = table.iter().cloned().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn loopback_is_never_eligible() {
        let mut lo = snap(1, "lo");
        lo.flags.loopback = true;
        let table_entry = {
            let mut table = IfTable::new();
            table.reconcile(vec![lo], &ExcludeSet::new());
            table.get(1).cloned().unwrap()
        };
        assert!(!table_entry.is_eligible(true, true));
    }

    #[test]
    fn down_interface_is_not_eligible() {
        let mut down = snap(1, "eth0");
        down.flags.up = false;
        let mut table = IfTable::new();
        table.reconcile(vec![down], &ExcludeSet::new());
        assert!(!table.get(1).unwrap().is_eligible(true, true));
    }
}
