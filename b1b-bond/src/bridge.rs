//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use netlink_packet_route::neighbour::nlas::Nla;
use netlink_packet_route::NeighbourMessage;
use rtnetlink::Handle;

use b1b_utils::mac_addr::MacAddr;

use crate::bond::BondSession;
use crate::error::Error;
use crate::fdb::{Destination, DestinationSet};
use crate::netlink::{self, NUD_PERMANENT};

// Collects the learned (VLAN, MAC) pairs of a Linux bridge the bond is
// enslaved to.
pub(crate) async fn read_fdb(
    handle: &Handle,
    bs: &BondSession,
) -> Result<DestinationSet, Error> {
    let entries = netlink::bridge_fdb_dump(handle, bs.brindex)
        .await
        .map_err(|error| Error::FdbDump(bs.brname.clone(), error))?;

    let mut destinations = DestinationSet::default();
    for entry in &entries {
        if let Some(dst) = filter_entry(entry, bs.ifindex) {
            destinations.insert(dst);
        }
    }
    Ok(destinations)
}

// Entries learned on the bond port itself point at upstream MACs the
// kernel already re-announces, and permanent entries are static rather
// than learned; neither needs a refresh.
fn filter_entry(entry: &NeighbourMessage, ifindex: u32) -> Option<Destination> {
    if entry.header.ifindex == ifindex
        || entry.header.state & NUD_PERMANENT != 0
    {
        return None;
    }

    let mut vlan = 0;
    let mut mac = None;
    for nla in &entry.nlas {
        match nla {
            Nla::LinkLocalAddress(addr) => {
                if let Ok(bytes) = <[u8; 6]>::try_from(addr.as_slice()) {
                    mac = Some(MacAddr::from(bytes));
                }
            }
            Nla::Vlan(vid) => vlan = *vid,
            _ => (),
        }
    }

    let mac = mac.filter(|mac| !mac.is_unspecified())?;
    Some(Destination::new(vlan, mac))
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;

    const BOND_IFINDEX: u32 = 7;

    fn fdb_entry(
        ifindex: u32,
        state: u16,
        mac: Option<[u8; 6]>,
        vlan: Option<u16>,
    ) -> NeighbourMessage {
        let mut entry = NeighbourMessage::default();
        entry.header.ifindex = ifindex;
        entry.header.state = state;
        if let Some(mac) = mac {
            entry.nlas.push(Nla::LinkLocalAddress(mac.to_vec()));
        }
        if let Some(vlan) = vlan {
            entry.nlas.push(Nla::Vlan(vlan));
        }
        entry
    }

    #[test]
    fn learned_entry_is_kept() {
        let entry =
            fdb_entry(9, 0x02, Some([0x02, 0, 0, 0, 0, 0x01]), Some(10));
        let dst = filter_entry(&entry, BOND_IFINDEX).unwrap();
        assert_eq!(dst.vlan(), 10);
        assert_eq!(dst.mac().as_bytes(), [0x02, 0, 0, 0, 0, 0x01]);
    }

    #[test]
    fn missing_vlan_means_untagged() {
        let entry = fdb_entry(9, 0x02, Some([0x02, 0, 0, 0, 0, 0x01]), None);
        let dst = filter_entry(&entry, BOND_IFINDEX).unwrap();
        assert_eq!(dst.vlan(), 0);
    }

    #[test]
    fn bond_port_entry_is_excluded() {
        let entry = fdb_entry(
            BOND_IFINDEX,
            0x02,
            Some([0x02, 0, 0, 0, 0, 0x01]),
            None,
        );
        assert!(filter_entry(&entry, BOND_IFINDEX).is_none());
    }

    #[test]
    fn permanent_entry_is_excluded() {
        let entry = fdb_entry(
            9,
            NUD_PERMANENT,
            Some([0x02, 0, 0, 0, 0, 0x01]),
            None,
        );
        assert!(filter_entry(&entry, BOND_IFINDEX).is_none());
    }

    #[test]
    fn zero_mac_is_excluded() {
        let entry = fdb_entry(9, 0x02, Some([0; 6]), Some(10));
        assert!(filter_entry(&entry, BOND_IFINDEX).is_none());

        let entry = fdb_entry(9, 0x02, None, Some(10));
        assert!(filter_entry(&entry, BOND_IFINDEX).is_none());
    }
}
