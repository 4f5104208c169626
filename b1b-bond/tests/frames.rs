//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use b1b_bond::fdb::{Destination, DestinationSet};
use b1b_bond::garp::encode_frame;
use b1b_utils::mac_addr::MacAddr;

fn mac(bytes: [u8; 6]) -> MacAddr {
    MacAddr::from(bytes)
}

#[test]
fn untagged_frame() {
    let dst = Destination::new(0, mac([0x02, 0xaa, 0xbb, 0xcc, 0xdd, 0x01]));
    let frame = encode_frame(dst);

    #[rustfmt::skip]
    let expected: [u8; 42] = [
        // Ethernet destination: broadcast.
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        // Ethernet source: the announced MAC.
        0x02, 0xaa, 0xbb, 0xcc, 0xdd, 0x01,
        // EtherType: ARP.
        0x08, 0x06,
        // Hardware type: Ethernet. Protocol type: IPv4.
        0x00, 0x01, 0x08, 0x00,
        // Hardware length, protocol length.
        0x06, 0x04,
        // Opcode: reply.
        0x00, 0x02,
        // Sender hardware address: the announced MAC.
        0x02, 0xaa, 0xbb, 0xcc, 0xdd, 0x01,
        // Sender protocol address: 0.0.0.0.
        0x00, 0x00, 0x00, 0x00,
        // Target hardware address: zero.
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        // Target protocol address: 0.0.0.0.
        0x00, 0x00, 0x00, 0x00,
    ];
    assert_eq!(&frame[..], &expected[..]);
}

#[test]
fn tagged_frame() {
    let dst = Destination::new(10, mac([0x02, 0xaa, 0xbb, 0xcc, 0xdd, 0x01]));
    let frame = encode_frame(dst);

    assert_eq!(frame.len(), 46);
    // Untouched Ethernet addresses.
    assert_eq!(&frame[0..6], &[0xff; 6]);
    assert_eq!(&frame[6..12], &[0x02, 0xaa, 0xbb, 0xcc, 0xdd, 0x01]);
    // 802.1Q header: TPID, then VID with PCP and DEI zero.
    assert_eq!(&frame[12..16], &[0x81, 0x00, 0x00, 0x0a]);
    // The rest of the frame matches the untagged layout, shifted by 4.
    let untagged = encode_frame(Destination::new(
        0,
        mac([0x02, 0xaa, 0xbb, 0xcc, 0xdd, 0x01]),
    ));
    assert_eq!(&frame[16..], &untagged[12..]);
}

#[test]
fn payload_identity() {
    for (vlan, bytes) in [
        (0u16, [0x02, 0x00, 0x5e, 0x10, 0x20, 0x30]),
        (1, [0xde, 0xad, 0xbe, 0xef, 0x00, 0x01]),
        (4094, [0x02, 0xaa, 0xbb, 0xcc, 0xdd, 0xff]),
    ] {
        let frame = encode_frame(Destination::new(vlan, mac(bytes)));
        let arp = if vlan == 0 { &frame[14..] } else { &frame[18..] };

        // Ethernet source and ARP sender hardware address both carry the
        // announced MAC; both protocol addresses are 0.0.0.0.
        assert_eq!(&frame[6..12], &bytes[..]);
        assert_eq!(&arp[8..14], &bytes[..]);
        assert_eq!(&arp[14..18], &[0; 4]);
        assert_eq!(&arp[18..24], &[0; 6]);
        assert_eq!(&arp[24..28], &[0; 4]);
        // Opcode: reply.
        assert_eq!(&arp[6..8], &[0x00, 0x02]);
    }
}

#[test]
fn set_drains_in_key_order() {
    let mut set = DestinationSet::default();
    set.insert(Destination::new(10, mac([0x02, 0, 0, 0, 0, 0x01])));
    set.insert(Destination::new(0, mac([0x02, 0, 0, 0, 0, 0x02])));
    set.insert(Destination::new(0, mac([0x02, 0, 0, 0, 0, 0x02])));
    set.insert(Destination::new(10, mac([0x02, 0, 0, 0, 0, 0x00])));

    let drained: Vec<_> = set.iter().collect();
    assert_eq!(drained.len(), 3);
    assert_eq!(drained[0].vlan(), 0);
    assert_eq!(drained[1].vlan(), 10);
    assert_eq!(drained[1].mac().as_bytes(), [0x02, 0, 0, 0, 0, 0x00]);
    assert_eq!(drained[2].mac().as_bytes(), [0x02, 0, 0, 0, 0, 0x01]);
    assert!(drained.windows(2).all(|pair| pair[0] < pair[1]));
}
