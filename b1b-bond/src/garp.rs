//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::os::unix::io::AsRawFd;

use bytes::{BufMut, BytesMut};
use socket2::{Domain, Socket, Type};
use tracing::{debug, error};

use b1b_utils::capabilities;
use b1b_utils::mac_addr::MacAddr;

use crate::bond::BondSession;
use crate::error::Error;
use crate::fdb::{Destination, DestinationSet};

// libc carries no ARP opcode constants.
const ARPOP_REPLY: u16 = 2;

// Raw AF_PACKET socket for outbound gratuitous ARPs. The socket is bound
// nowhere; each frame names its egress interface in the destination
// address.
#[derive(Debug)]
pub(crate) struct GarpSocket(Socket);

// ===== impl GarpSocket =====

impl GarpSocket {
    pub(crate) fn open() -> Result<GarpSocket, Error> {
        let socket =
            capabilities::raise(|| Socket::new(Domain::PACKET, Type::RAW, None))
                .map_err(Error::ArpSocket)?;
        Ok(GarpSocket(socket))
    }

    // Announces every destination of one recovery run on the bond, in
    // set order. Send failures can be transient (e.g. during link
    // bring-up); they are logged and do not abort the run.
    pub(crate) fn send_garps(
        &self,
        bs: &BondSession,
        destinations: &DestinationSet,
    ) {
        for dst in destinations.iter() {
            let frame = encode_frame(dst);
            match self.send(bs.ifindex, &frame) {
                Ok(()) => {
                    debug!(destination = %dst, ifname = %bs.ifname,
                        "Sent gratuitous ARP");
                }
                Err(error) => {
                    error!(destination = %dst, ifname = %bs.ifname, %error,
                        "Failed to send gratuitous ARP");
                }
            }
        }
    }

    fn send(&self, ifindex: u32, frame: &[u8]) -> std::io::Result<()> {
        let mut sll: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
        sll.sll_family = libc::AF_PACKET as libc::sa_family_t;
        sll.sll_ifindex = ifindex as libc::c_int;
        sll.sll_halen = MacAddr::LENGTH as u8;
        sll.sll_addr[..MacAddr::LENGTH]
            .copy_from_slice(&MacAddr::BROADCAST.as_bytes());

        let ret = unsafe {
            libc::sendto(
                self.0.as_raw_fd(),
                frame.as_ptr() as *const libc::c_void,
                frame.len(),
                0,
                &sll as *const libc::sockaddr_ll as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(std::io::Error::last_os_error());
        }

        Ok(())
    }
}

// ===== global functions =====

// Encodes the gratuitous ARP reply announcing `dst`: broadcast Ethernet
// destination, announced MAC as both Ethernet source and ARP sender
// hardware address, zero protocol addresses. 42 bytes untagged; an
// 802.1Q header after the source address (PCP and DEI always zero)
// lengthens the frame to 46 bytes when the VLAN is not 0. All multi-byte
// fields are big-endian on the wire.
pub fn encode_frame(dst: Destination) -> BytesMut {
    let mac = dst.mac().as_bytes();
    let mut buf = BytesMut::with_capacity(46);

    // Ethernet header.
    buf.put_slice(&MacAddr::BROADCAST.as_bytes());
    buf.put_slice(&mac);
    if dst.vlan() != 0 {
        buf.put_u16(libc::ETH_P_8021Q as u16);
        buf.put_u16(dst.vlan());
    }
    buf.put_u16(libc::ETH_P_ARP as u16);

    // ARP reply; announcing a MAC only, so both protocol addresses stay
    // zero and upstream ARP caches are left alone.
    buf.put_u16(libc::ARPHRD_ETHER as u16);
    buf.put_u16(libc::ETH_P_IP as u16);
    buf.put_u8(MacAddr::LENGTH as u8);
    buf.put_u8(4);
    buf.put_u16(ARPOP_REPLY);
    buf.put_slice(&mac);
    buf.put_slice(&[0; 4]);
    buf.put_slice(&[0; 6]);
    buf.put_slice(&[0; 4]);

    buf
}
