//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;

use futures::channel::mpsc::UnboundedReceiver;
use futures::{StreamExt, TryStreamExt};
use netlink_packet_core::{
    NetlinkMessage, NetlinkPayload, NLM_F_DUMP, NLM_F_REQUEST,
};
use netlink_packet_route::constants::RTNLGRP_LINK;
use netlink_packet_route::link::nlas::Nla as LinkNla;
use netlink_packet_route::neighbour::nlas::Nla as NeighbourNla;
use netlink_packet_utils::nla::{DefaultNla, Nla as _};
use netlink_packet_route::{LinkMessage, NeighbourMessage, RtnlMessage};
use netlink_sys::{AsyncSocket, SocketAddr};
use rtnetlink::{new_connection, Handle};
use tracing::debug;

use b1b_utils::socket::NetlinkSocketExt;

use crate::bond::BondSession;
use crate::error::Error;

pub(crate) type MonitorMessage = (NetlinkMessage<RtnlMessage>, SocketAddr);
pub(crate) type NetlinkMonitor = UnboundedReceiver<MonitorMessage>;

// rtnetlink attribute constants without a typed representation.
const NDA_MASTER: u16 = 9;
const IFLA_EVENT: u16 = 44;
const IFLA_EVENT_BONDING_FAILOVER: u32 = 3;
pub(crate) const NUD_PERMANENT: u16 = 0x80;

// ===== global functions =====

// Opens the two kernel channels: a request/response connection with strict
// attribute checking, and an event connection subscribed to the link-state
// multicast group. Both connections are served by tasks on the daemon's
// single-threaded runtime.
pub(crate) fn init() -> Result<(Handle, NetlinkMonitor), Error> {
    // Request/response channel.
    let (mut conn, handle, _) = new_connection().map_err(Error::ChannelOpen)?;
    conn.socket_mut()
        .socket_mut()
        .set_strict_check(true)
        .map_err(Error::ChannelOpen)?;
    tokio::spawn(conn);

    // Event channel.
    let (mut conn, _, monitor) =
        new_connection().map_err(Error::ChannelOpen)?;
    let groups = 1 << (RTNLGRP_LINK - 1);
    let addr = SocketAddr::new(0, groups);
    conn.socket_mut()
        .socket_mut()
        .bind(&addr)
        .map_err(Error::ChannelOpen)?;
    tokio::spawn(conn);

    Ok((handle, monitor))
}

// Looks up a single interface by name.
pub(crate) async fn link_by_name(
    handle: &Handle,
    ifname: &str,
) -> Result<Option<LinkMessage>, rtnetlink::Error> {
    let mut links =
        handle.link().get().match_name(ifname.to_owned()).execute();
    links.try_next().await
}

// Looks up a single interface by index.
pub(crate) async fn link_by_index(
    handle: &Handle,
    ifindex: u32,
) -> Result<Option<LinkMessage>, rtnetlink::Error> {
    let mut links = handle.link().get().match_index(ifindex).execute();
    links.try_next().await
}

// Dumps the bridge-family neighbor table (the bridge FDB) restricted to
// ports of the given master interface.
pub(crate) async fn bridge_fdb_dump(
    handle: &Handle,
    brindex: u32,
) -> Result<Vec<NeighbourMessage>, rtnetlink::Error> {
    let mut msg = NeighbourMessage::default();
    msg.header.family = libc::AF_BRIDGE as u8;
    msg.nlas.push(NeighbourNla::Other(DefaultNla::new(
        NDA_MASTER,
        brindex.to_ne_bytes().to_vec(),
    )));

    let mut req = NetlinkMessage::from(RtnlMessage::GetNeighbour(msg));
    req.header.flags = NLM_F_REQUEST | NLM_F_DUMP;

    let mut handle = handle.clone();
    let mut response = handle.request(req)?;
    let mut entries = Vec::new();
    while let Some(msg) = response.next().await {
        match msg.payload {
            NetlinkPayload::InnerMessage(RtnlMessage::NewNeighbour(entry)) => {
                entries.push(entry);
            }
            NetlinkPayload::Error(err) => {
                return Err(rtnetlink::Error::NetlinkError(err));
            }
            _ => (),
        }
    }
    Ok(entries)
}

// Demultiplexes one event-channel message: an RTM_NEWLINK carrying the
// bonding-failover event code marks the matching session, if any, as
// failed over. Duplicate events within a batch collapse.
pub(crate) fn process_event(
    bonds: &mut BTreeMap<u32, BondSession>,
    msg: NetlinkMessage<RtnlMessage>,
) {
    let NetlinkPayload::InnerMessage(RtnlMessage::NewLink(link)) = msg.payload
    else {
        return;
    };
    let Some(bs) = bonds.get_mut(&link.header.index) else {
        return;
    };

    for nla in &link.nlas {
        if let LinkNla::Other(other) = nla {
            if other.kind() != IFLA_EVENT {
                continue;
            }
            let mut value = vec![0; other.value_len()];
            other.emit_value(&mut value);
            if let Ok(raw) = <[u8; 4]>::try_from(value.as_slice()) {
                if u32::from_ne_bytes(raw) == IFLA_EVENT_BONDING_FAILOVER {
                    if bs.failover {
                        debug!(ifname = %bs.ifname, "Duplicate failover event");
                    } else {
                        bs.failover = true;
                    }
                }
            }
            break;
        }
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bond::BridgeKind;
    use netlink_packet_route::AddressMessage;

    fn session(ifindex: u32) -> BondSession {
        BondSession {
            ifname: format!("bond{}", ifindex),
            ifindex,
            brname: "br0".to_owned(),
            brindex: 100,
            bridge: BridgeKind::Linux,
            failover: false,
        }
    }

    fn link_event_msg(
        ifindex: u32,
        event: u32,
    ) -> NetlinkMessage<RtnlMessage> {
        let mut link = LinkMessage::default();
        link.header.index = ifindex;
        link.nlas.push(LinkNla::Other(DefaultNla::new(
            IFLA_EVENT,
            event.to_ne_bytes().to_vec(),
        )));
        NetlinkMessage::from(RtnlMessage::NewLink(link))
    }

    #[test]
    fn failover_event_marks_session() {
        let mut bonds = BTreeMap::from([(7, session(7))]);
        process_event(
            &mut bonds,
            link_event_msg(7, IFLA_EVENT_BONDING_FAILOVER),
        );
        assert!(bonds[&7].failover);
    }

    #[test]
    fn duplicate_events_collapse() {
        let mut bonds = BTreeMap::from([(7, session(7))]);
        process_event(
            &mut bonds,
            link_event_msg(7, IFLA_EVENT_BONDING_FAILOVER),
        );
        process_event(
            &mut bonds,
            link_event_msg(7, IFLA_EVENT_BONDING_FAILOVER),
        );
        assert!(bonds[&7].failover);
    }

    #[test]
    fn untracked_interface_is_ignored() {
        let mut bonds = BTreeMap::from([(7, session(7))]);
        process_event(
            &mut bonds,
            link_event_msg(8, IFLA_EVENT_BONDING_FAILOVER),
        );
        assert!(!bonds[&7].failover);
    }

    #[test]
    fn other_events_are_ignored() {
        let mut bonds = BTreeMap::from([(7, session(7))]);
        // IFLA_EVENT_NOTIFY_PEERS
        process_event(&mut bonds, link_event_msg(7, 4));
        assert!(!bonds[&7].failover);

        // RTM_NEWLINK without any IFLA_EVENT attribute.
        let mut link = LinkMessage::default();
        link.header.index = 7;
        link.nlas.push(LinkNla::IfName("bond7".to_owned()));
        process_event(
            &mut bonds,
            NetlinkMessage::from(RtnlMessage::NewLink(link)),
        );
        assert!(!bonds[&7].failover);

        // Non-link message.
        process_event(
            &mut bonds,
            NetlinkMessage::from(RtnlMessage::NewAddress(
                AddressMessage::default(),
            )),
        );
        assert!(!bonds[&7].failover);
    }
}
