//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;

use b1b_utils::mac_addr::MacAddr;
use tracing::debug;

// A bridge-learned (VLAN, MAC) pair, packed into a single 64-bit value:
// VLAN in the high 16 bits, MAC (network byte order) in the low 48. The
// packed value doubles as the ordering key, so comparisons are plain
// unsigned integer comparisons. VLAN 0 denotes an untagged entry.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Destination(u64);

// ===== impl Destination =====

impl Destination {
    pub fn new(vlan: u16, mac: MacAddr) -> Destination {
        let mac = mac
            .as_bytes()
            .iter()
            .fold(0u64, |key, byte| (key << 8) | *byte as u64);
        Destination(((vlan as u64) << 48) | mac)
    }

    pub fn vlan(&self) -> u16 {
        (self.0 >> 48) as u16
    }

    pub fn mac(&self) -> MacAddr {
        let mut bytes = [0u8; 6];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = (self.0 >> (8 * (5 - i))) as u8;
        }
        MacAddr::from(bytes)
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.mac(), self.vlan())
    }
}

// Set of destinations collected from one forwarding-database dump. Lives
// for the duration of a single recovery run and is drained in key order,
// which makes the announcement sequence reproducible.
#[derive(Debug, Default)]
pub struct DestinationSet {
    set: BTreeSet<Destination>,
}

// ===== impl DestinationSet =====

impl DestinationSet {
    // A bridge may learn the same MAC on multiple VLANs, or report the
    // same entry twice within one dump; duplicates collapse silently.
    pub fn insert(&mut self, dst: Destination) {
        if !self.set.insert(dst) {
            debug!(destination = %dst, "Duplicate destination");
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Destination> + '_ {
        self.set.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(bytes: [u8; 6]) -> MacAddr {
        MacAddr::from(bytes)
    }

    #[test]
    fn packing_round_trip() {
        let dst = Destination::new(10, mac([0x02, 0xaa, 0xbb, 0xcc, 0xdd, 0x01]));
        assert_eq!(dst.vlan(), 10);
        assert_eq!(dst.mac().as_bytes(), [0x02, 0xaa, 0xbb, 0xcc, 0xdd, 0x01]);

        let dst = Destination::new(0, mac([0xff; 6]));
        assert_eq!(dst.vlan(), 0);
        assert_eq!(dst.mac(), MacAddr::BROADCAST);
    }

    #[test]
    fn vlan_orders_before_mac() {
        let untagged = Destination::new(0, mac([0xff; 6]));
        let tagged = Destination::new(10, mac([0x02, 0, 0, 0, 0, 0x01]));
        assert!(untagged < tagged);

        let a = Destination::new(10, mac([0x02, 0, 0, 0, 0, 0x01]));
        let b = Destination::new(10, mac([0x02, 0, 0, 0, 0, 0x02]));
        assert!(a < b);
    }

    #[test]
    fn duplicates_collapse() {
        let mut set = DestinationSet::default();
        set.insert(Destination::new(20, mac([0x02, 0, 0, 0, 0, 0x02])));
        set.insert(Destination::new(0, mac([0x02, 0, 0, 0, 0, 0x09])));
        set.insert(Destination::new(20, mac([0x02, 0, 0, 0, 0, 0x02])));
        assert_eq!(set.len(), 2);

        let drained: Vec<_> = set.iter().collect();
        assert_eq!(drained[0].vlan(), 0);
        assert_eq!(drained[1].vlan(), 20);
    }
}
