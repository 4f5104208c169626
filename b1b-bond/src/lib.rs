//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod error;
pub mod fdb;
pub mod garp;

mod bond;
mod bridge;
mod netlink;
mod ovs;

use std::collections::BTreeMap;

use futures::{FutureExt, StreamExt};
use rtnetlink::Handle;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, info};

use crate::bond::{BondSession, BridgeKind};
use crate::error::Error;
use crate::garp::GarpSocket;
use crate::netlink::{MonitorMessage, NetlinkMonitor};
use crate::ovs::OvsClient;

// Process-wide state: the kernel channels, the raw ARP socket, the OVS
// control client, and the monitored bond sessions keyed by ifindex. The
// key order doubles as the recovery order, making a recovery pass over
// any event batch deterministic.
pub struct Daemon {
    handle: Handle,
    monitor: NetlinkMonitor,
    garp: GarpSocket,
    ovs: OvsClient,
    bonds: BTreeMap<u32, BondSession>,
}

// ===== impl Daemon =====

impl Daemon {
    // Opens the kernel channels and the ARP socket, then validates the
    // bonds named on the command line, or auto-detects qualifying bonds
    // when none were named.
    pub async fn init(ifnames: &[String]) -> Result<Daemon, Error> {
        let (handle, monitor) = netlink::init()?;
        let garp = GarpSocket::open()?;
        let mut ovs = OvsClient::new();

        let bonds = if ifnames.is_empty() {
            bond::detect(&handle, &mut ovs).await?
        } else {
            bond::explicit(&handle, &mut ovs, ifnames).await?
        };

        Ok(Daemon {
            handle,
            monitor,
            garp,
            ovs,
            bonds,
        })
    }

    // Blocks on the event channel until terminated by SIGTERM or SIGINT.
    pub async fn run(&mut self) -> Result<(), Error> {
        info!("Ready");

        let mut sigterm =
            signal(SignalKind::terminate()).map_err(Error::SignalSetup)?;
        let mut sigint =
            signal(SignalKind::interrupt()).map_err(Error::SignalSetup)?;

        loop {
            tokio::select! {
                _ = sigterm.recv() => break,
                _ = sigint.recv() => break,
                msg = self.monitor.next() => {
                    let msg = msg.ok_or(Error::MonitorClosed)?;
                    self.process_batch(msg).await?;
                }
            }
        }

        info!("Exiting");
        Ok(())
    }

    // Handles one event batch. A single readiness notification may cover
    // any number of coalesced kernel messages, so the channel is drained
    // dry before any recovery starts; each flagged bond then recovers at
    // most once per batch.
    async fn process_batch(&mut self, first: MonitorMessage) -> Result<(), Error> {
        for bs in self.bonds.values_mut() {
            bs.failover = false;
        }

        netlink::process_event(&mut self.bonds, first.0);
        while let Some(Some((msg, _))) = self.monitor.next().now_or_never() {
            netlink::process_event(&mut self.bonds, msg);
        }

        let Daemon {
            handle,
            garp,
            ovs,
            bonds,
            ..
        } = self;
        for bs in bonds.values_mut() {
            if !bs.failover {
                continue;
            }

            debug!(brname = %bs.brname, ifname = %bs.ifname,
                "Sending gratuitous ARPs");
            let destinations = match bs.bridge {
                BridgeKind::Linux => bridge::read_fdb(handle, bs).await?,
                BridgeKind::Ovs { ofport } => {
                    ovs.read_fdb(&bs.brname, ofport).await?
                }
            };
            garp.send_garps(bs, &destinations);
        }

        Ok(())
    }
}
