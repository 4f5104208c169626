//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;

use futures::TryStreamExt;
use netlink_packet_route::link::nlas::{Info, InfoBond, InfoData, InfoKind, Nla};
use netlink_packet_route::LinkMessage;
use rtnetlink::Handle;
use tracing::debug;

use crate::error::{CheckError, Error};
use crate::netlink;
use crate::ovs::OvsClient;

// The bonding driver's active-backup mode.
const BOND_MODE_ACTIVE_BACKUP: u8 = 1;

// One monitored bond interface and the bridge it is enslaved to. For OVS
// bonds the bridge identity is the logical OVS bridge, not the kernel
// datapath device.
#[derive(Debug)]
pub(crate) struct BondSession {
    pub(crate) ifname: String,
    pub(crate) ifindex: u32,
    pub(crate) brname: String,
    pub(crate) brindex: u32,
    pub(crate) bridge: BridgeKind,
    pub(crate) failover: bool,
}

// Which forwarding database backs the bond's master. The variant selects
// the FDB reader used during recovery.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum BridgeKind {
    Linux,
    Ovs { ofport: u32 },
}

// Link attributes relevant to bond validation, pulled out of an
// RTM_NEWLINK message.
#[derive(Debug, Default)]
struct Candidate {
    ifindex: u32,
    ifname: Option<String>,
    master: Option<u32>,
    kind: Option<InfoKind>,
    bond_mode: Option<u8>,
}

// ===== impl Candidate =====

impl Candidate {
    fn from_link(msg: &LinkMessage) -> Candidate {
        let mut candidate = Candidate {
            ifindex: msg.header.index,
            ..Default::default()
        };

        for nla in &msg.nlas {
            match nla {
                Nla::IfName(ifname) => {
                    candidate.ifname = Some(ifname.clone());
                }
                Nla::Master(master) => {
                    candidate.master = Some(*master);
                }
                Nla::Info(infos) => {
                    for info in infos {
                        match info {
                            Info::Kind(kind) => {
                                candidate.kind = Some(kind.clone());
                            }
                            Info::Data(InfoData::Bond(attrs)) => {
                                for attr in attrs {
                                    if let InfoBond::Mode(mode) = attr {
                                        candidate.bond_mode = Some(*mode);
                                    }
                                }
                            }
                            _ => (),
                        }
                    }
                }
                _ => (),
            }
        }

        candidate
    }

    // Name for log messages, also usable before IFLA_IFNAME is known.
    fn name(&self) -> String {
        match &self.ifname {
            Some(ifname) => ifname.clone(),
            None => format!("(index {})", self.ifindex),
        }
    }

    fn check(&self) -> Result<u32, CheckError> {
        match &self.kind {
            None => return Err(CheckError::KindNotSet),
            Some(InfoKind::Bond) => (),
            Some(_) => return Err(CheckError::NotABond),
        }
        match self.bond_mode {
            None => return Err(CheckError::ModeNotSet),
            Some(BOND_MODE_ACTIVE_BACKUP) => (),
            Some(mode) => return Err(CheckError::InvalidMode(mode)),
        }
        match self.master {
            Some(master) if master != 0 => Ok(master),
            _ => Err(CheckError::MasterNotSet),
        }
    }
}

// ===== helper functions =====

// Validates one RTM_NEWLINK candidate and resolves its master. The outer
// error is fatal regardless of discovery mode; the inner one carries the
// candidate's name and rejection reason, fatal only for interfaces named
// on the command line.
async fn resolve(
    handle: &Handle,
    ovs: &mut OvsClient,
    link: &LinkMessage,
) -> Result<Result<BondSession, (String, CheckError)>, Error> {
    let candidate = Candidate::from_link(link);
    let ifname = candidate.name();

    let brindex = match candidate.check() {
        Ok(brindex) => brindex,
        Err(check) => return Ok(Err((ifname, check))),
    };

    // Resolve the master interface.
    let master = netlink::link_by_index(handle, brindex)
        .await
        .map_err(|error| Error::MasterRequest(ifname.clone(), error))?;
    let Some(master) = master else {
        return Ok(Err((ifname, CheckError::MasterNameNotSet)));
    };

    let mut brname = None;
    let mut brkind = None;
    for nla in &master.nlas {
        match nla {
            Nla::IfName(name) => brname = Some(name.clone()),
            Nla::Info(infos) => {
                for info in infos {
                    if let Info::Kind(kind) = info {
                        brkind = Some(kind.clone());
                    }
                }
            }
            _ => (),
        }
    }
    let Some(brname) = brname else {
        return Ok(Err((ifname, CheckError::MasterNameNotSet)));
    };

    let bs = match brkind {
        Some(InfoKind::Bridge) => BondSession {
            ifname,
            ifindex: candidate.ifindex,
            brname,
            brindex,
            bridge: BridgeKind::Linux,
            failover: false,
        },
        Some(InfoKind::Other(kind)) if kind == "openvswitch" => {
            // The kernel-visible master is the OVS system datapath
            // device; replace it with the logical OVS bridge the bond
            // actually belongs to.
            let (brname, ofport) = ovs.bridge_for_port(&ifname).await?;
            let bridge = netlink::link_by_name(handle, &brname)
                .await
                .map_err(|error| {
                    Error::OvsBridgeLink(brname.clone(), error)
                })?
                .ok_or_else(|| Error::OvsBridgeIndex(brname.clone()))?;
            BondSession {
                ifname,
                ifindex: candidate.ifindex,
                brindex: bridge.header.index,
                brname,
                bridge: BridgeKind::Ovs { ofport },
                failover: false,
            }
        }
        None => {
            return Ok(Err((ifname, CheckError::MasterKindNotSet(brname))));
        }
        Some(_) => {
            return Ok(Err((ifname, CheckError::MasterNotABridge(brname))));
        }
    };

    Ok(Ok(bs))
}

// ===== global functions =====

// Validates the bond interfaces named on the command line. Any
// non-qualifying interface is fatal.
pub(crate) async fn explicit(
    handle: &Handle,
    ovs: &mut OvsClient,
    ifnames: &[String],
) -> Result<BTreeMap<u32, BondSession>, Error> {
    let mut bonds = BTreeMap::new();

    for ifname in ifnames {
        debug!(%ifname, "Getting bond info");

        let link = netlink::link_by_name(handle, ifname)
            .await
            .map_err(|error| Error::LinkRequest(ifname.clone(), error))?
            .ok_or_else(|| Error::LinkNotFound(ifname.clone()))?;

        let replied = link.nlas.iter().find_map(|nla| match nla {
            Nla::IfName(name) => Some(name.clone()),
            _ => None,
        });
        if replied.as_deref() != Some(ifname.as_str()) {
            return Err(Error::LinkNameMismatch(
                ifname.clone(),
                replied.unwrap_or_default(),
            ));
        }

        let bs = match resolve(handle, ovs, &link).await? {
            Ok(bs) => bs,
            Err((_, check)) => {
                return Err(Error::InvalidBond(ifname.clone(), check));
            }
        };
        bonds.insert(bs.ifindex, bs);
    }

    Ok(bonds)
}

// Auto-detects qualifying bonds from a full interface dump. Candidates
// failing validation are skipped; finding none at all is fatal.
pub(crate) async fn detect(
    handle: &Handle,
    ovs: &mut OvsClient,
) -> Result<BTreeMap<u32, BondSession>, Error> {
    let mut candidates = Vec::new();
    let mut links = handle.link().get().execute();
    while let Some(msg) = links.try_next().await.map_err(Error::DetectFailed)? {
        candidates.push(msg);
    }

    let mut bonds = BTreeMap::new();
    for link in &candidates {
        match resolve(handle, ovs, link).await? {
            Ok(bs) => {
                debug!(ifname = %bs.ifname, brname = %bs.brname,
                    "Detected mode 1 bond with master");
                bonds.insert(bs.ifindex, bs);
            }
            Err((ifname, check)) => {
                debug!(%ifname, reason = %check, "Ignoring interface");
            }
        }
    }

    if bonds.is_empty() {
        return Err(Error::NoBonds);
    }

    Ok(bonds)
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;

    fn bond_link(ifindex: u32, mode: u8, master: Option<u32>) -> LinkMessage {
        let mut msg = LinkMessage::default();
        msg.header.index = ifindex;
        msg.nlas.push(Nla::IfName(format!("bond{}", ifindex)));
        if let Some(master) = master {
            msg.nlas.push(Nla::Master(master));
        }
        msg.nlas.push(Nla::Info(vec![
            Info::Kind(InfoKind::Bond),
            Info::Data(InfoData::Bond(vec![InfoBond::Mode(mode)])),
        ]));
        msg
    }

    #[test]
    fn qualifying_bond_passes() {
        let candidate = Candidate::from_link(&bond_link(7, 1, Some(3)));
        assert_eq!(candidate.ifname.as_deref(), Some("bond7"));
        assert_eq!(candidate.check().unwrap(), 3);
    }

    #[test]
    fn non_bond_is_rejected() {
        let mut msg = LinkMessage::default();
        msg.header.index = 2;
        msg.nlas.push(Nla::IfName("eth0".to_owned()));
        msg.nlas
            .push(Nla::Info(vec![Info::Kind(InfoKind::Veth)]));
        let candidate = Candidate::from_link(&msg);
        assert!(matches!(candidate.check(), Err(CheckError::NotABond)));
    }

    #[test]
    fn missing_link_kind_is_rejected() {
        let mut msg = LinkMessage::default();
        msg.header.index = 2;
        msg.nlas.push(Nla::IfName("eth0".to_owned()));
        let candidate = Candidate::from_link(&msg);
        assert!(matches!(candidate.check(), Err(CheckError::KindNotSet)));
    }

    #[test]
    fn wrong_bonding_mode_is_rejected() {
        let candidate = Candidate::from_link(&bond_link(7, 4, Some(3)));
        assert!(matches!(
            candidate.check(),
            Err(CheckError::InvalidMode(4))
        ));
    }

    #[test]
    fn missing_master_is_rejected() {
        let candidate = Candidate::from_link(&bond_link(7, 1, None));
        assert!(matches!(candidate.check(), Err(CheckError::MasterNotSet)));

        let candidate = Candidate::from_link(&bond_link(7, 1, Some(0)));
        assert!(matches!(candidate.check(), Err(CheckError::MasterNotSet)));
    }

    #[test]
    fn nameless_candidate_uses_index_placeholder() {
        let mut msg = LinkMessage::default();
        msg.header.index = 42;
        let candidate = Candidate::from_link(&msg);
        assert_eq!(candidate.name(), "(index 42)");
    }
}
