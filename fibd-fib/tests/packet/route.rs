//
// Copyright (c) The Fibd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::LazyLock as Lazy;

use const_addrs::{ip, net};
use fibd_fib::packet::error::EncodeError;
use fibd_fib::packet::route::{RouteDst, RouteMessage, RouteNexthop};
use fibd_fib::packet::{
    encode_label, MessageFlags, AF_INET, AF_MPLS, LABEL_SIZE_BITS,
    LWTUNNEL_ENCAP_MPLS, RTM_DELROUTE, RTM_F_NOTIFY, RTM_NEWROUTE,
    RT_TABLE_MAIN,
};
use fibd_utils::mpls::Label;
use fibd_utils::southbound::{
    MplsAction, MplsRoute, Nexthop, RouteScope, RouteType, UnicastRoute,
};

use super::*;

fn nexthop(ifindex: u32, addr: &str) -> Nexthop {
    Nexthop {
        ifindex: Some(ifindex),
        addr: Some(addr.parse().unwrap()),
        ifname: None,
        weight: 1,
        mpls_action: None,
    }
}

static UNICAST_V4_MSG1: Lazy<(Vec<u8>, UnicastRoute, RouteMessage)> =
    Lazy::new(|| {
        (
            vec![
                0x38, 0x00, 0x00, 0x00, 0x18, 0x00, 0x05, 0x05, 0x00, 0x00,
                0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x18, 0x00, 0x00,
                0xfe, 0x63, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x08, 0x00,
                0x01, 0x00, 0x0a, 0x00, 0x00, 0x00, 0x14, 0x00, 0x09, 0x00,
                0x10, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00, 0x08, 0x00,
                0x05, 0x00, 0x0a, 0x00, 0x00, 0x01,
            ],
            UnicastRoute::new(
                net!("10.0.0.0/24"),
                [nexthop(3, "10.0.0.1")].into(),
            ),
            RouteMessage {
                msg_type: RTM_NEWROUTE,
                msg_flags: MessageFlags::REQUEST
                    | MessageFlags::ACK
                    | MessageFlags::CREATE
                    | MessageFlags::REPLACE,
                family: AF_INET,
                dst_len: 24,
                table: RT_TABLE_MAIN,
                protocol: 99,
                scope: RouteScope::Universe as u8,
                route_type: RouteType::Unicast as u8,
                rtm_flags: RTM_F_NOTIFY,
                dst: Some(RouteDst::Ip(net!("10.0.0.0/24"))),
                nexthops: vec![RouteNexthop {
                    ifindex: 3,
                    gateway: Some(ip!("10.0.0.1")),
                    ..Default::default()
                }],
            },
        )
    });

static MPLS_PUSH_MSG1: Lazy<(Vec<u8>, MplsRoute, RouteMessage)> =
    Lazy::new(|| {
        let mut push = nexthop(5, "fe80::1");
        push.mpls_action = Some(MplsAction::Push(vec![
            Label::new(2001),
            Label::new(3001),
        ]));
        (
            vec![
                0x5c, 0x00, 0x00, 0x00, 0x18, 0x00, 0x05, 0x05, 0x00, 0x00,
                0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1c, 0x14, 0x00, 0x00,
                0xfe, 0x63, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x08, 0x00,
                0x01, 0x00, 0x00, 0x3e, 0x91, 0x00, 0x38, 0x00, 0x09, 0x00,
                0x34, 0x00, 0x00, 0x00, 0x05, 0x00, 0x00, 0x00, 0x10, 0x00,
                0x16, 0x00, 0x0c, 0x00, 0x01, 0x00, 0x00, 0x7d, 0x10, 0x00,
                0x00, 0xbb, 0x91, 0x00, 0x06, 0x00, 0x15, 0x00, 0x01, 0x00,
                0x00, 0x00, 0x14, 0x00, 0x05, 0x00, 0xfe, 0x80, 0x00, 0x00,
                0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
                0x00, 0x01,
            ],
            MplsRoute::new(Label::new(1001), [push].into()),
            RouteMessage {
                msg_type: RTM_NEWROUTE,
                msg_flags: MessageFlags::REQUEST
                    | MessageFlags::ACK
                    | MessageFlags::CREATE
                    | MessageFlags::REPLACE,
                family: AF_MPLS,
                dst_len: LABEL_SIZE_BITS,
                table: RT_TABLE_MAIN,
                protocol: 99,
                scope: RouteScope::Universe as u8,
                route_type: RouteType::Unicast as u8,
                rtm_flags: 0,
                dst: Some(RouteDst::Mpls(Label::new(1001))),
                nexthops: vec![RouteNexthop {
                    ifindex: 5,
                    gateway: Some(ip!("fe80::1")),
                    push_labels: vec![Label::new(2001), Label::new(3001)],
                    encap_type: Some(LWTUNNEL_ENCAP_MPLS),
                    ..Default::default()
                }],
            },
        )
    });

#[test]
#[cfg(target_endian = "little")]
fn test_encode_unicast_v4() {
    let (ref bytes, ref route, _) = *UNICAST_V4_MSG1;
    let msg = RouteMessage::encode_unicast_add(route).unwrap();
    test_encode_msg(bytes, &msg);
}

#[test]
#[cfg(target_endian = "little")]
fn test_decode_unicast_v4() {
    let (ref bytes, _, ref msg) = *UNICAST_V4_MSG1;
    test_decode_msg(bytes, msg);
}

#[test]
#[cfg(target_endian = "little")]
fn test_encode_mpls_push() {
    let (ref bytes, ref route, _) = *MPLS_PUSH_MSG1;
    let msg = RouteMessage::encode_mpls_add(route).unwrap();
    test_encode_msg(bytes, &msg);
}

#[test]
#[cfg(target_endian = "little")]
fn test_decode_mpls_push() {
    let (ref bytes, _, ref msg) = *MPLS_PUSH_MSG1;
    test_decode_msg(bytes, msg);
}

#[test]
fn test_encode_is_deterministic() {
    let (_, ref route, _) = *UNICAST_V4_MSG1;
    let msg1 = RouteMessage::encode_unicast_add(route).unwrap();
    let msg2 = RouteMessage::encode_unicast_add(route).unwrap();
    assert_eq!(msg1, msg2);
}

#[test]
fn test_roundtrip_unicast_v6() {
    let route = UnicastRoute::new(
        net!("2001:db8:1000::/64"),
        [nexthop(7, "fe80::ace")].into(),
    );
    let bytes = RouteMessage::encode_unicast_add(&route).unwrap();
    let msg = roundtrip(&bytes);
    assert_eq!(msg.dst, Some(RouteDst::Ip(net!("2001:db8:1000::/64"))));
    assert_eq!(msg.dst_len, 64);
    assert_eq!(msg.protocol, route.protocol);
    assert_eq!(msg.nexthops.len(), 1);
    assert_eq!(msg.nexthops[0].ifindex, 7);
    assert_eq!(msg.nexthops[0].gateway, Some(ip!("fe80::ace")));
}

#[test]
fn test_roundtrip_default_routes() {
    // Default routes encode with dst_len 0 and an all-zeros destination
    // payload of the family's address length.
    for (dest, gateway) in
        [(net!("0.0.0.0/0"), "10.0.0.1"), (net!("::/0"), "fe80::1")]
    {
        let route = UnicastRoute::new(dest, [nexthop(3, gateway)].into());
        let bytes = RouteMessage::encode_unicast_add(&route).unwrap();
        let msg = roundtrip(&bytes);
        assert_eq!(msg.dst_len, 0);
        assert_eq!(msg.dst, Some(RouteDst::Ip(dest)));
    }
}

#[test]
fn test_roundtrip_swap_nexthop() {
    let mut swap = nexthop(4, "10.1.0.1");
    swap.mpls_action = Some(MplsAction::Swap(Label::new(4001)));
    let route = MplsRoute::new(Label::new(1001), [swap].into());

    let bytes = RouteMessage::encode_mpls_add(&route).unwrap();
    let msg = roundtrip(&bytes);
    assert_eq!(msg.family, AF_MPLS);
    assert_eq!(msg.dst, Some(RouteDst::Mpls(Label::new(1001))));
    assert_eq!(msg.nexthops.len(), 1);
    assert_eq!(msg.nexthops[0].newdst, Some(Label::new(4001)));
    assert_eq!(msg.nexthops[0].via, Some(ip!("10.1.0.1")));
    assert_eq!(msg.nexthops[0].gateway, None);
}

#[test]
fn test_roundtrip_php_nexthop() {
    let mut php = nexthop(4, "fe80::2");
    php.mpls_action = Some(MplsAction::Php);
    let route = MplsRoute::new(Label::new(1002), [php].into());

    let bytes = RouteMessage::encode_mpls_add(&route).unwrap();
    let msg = roundtrip(&bytes);
    // PHP carries no outgoing label, just the via address.
    assert_eq!(msg.nexthops[0].newdst, None);
    assert_eq!(msg.nexthops[0].via, Some(ip!("fe80::2")));
}

#[test]
fn test_roundtrip_pop_nexthop() {
    let pop = Nexthop {
        ifindex: Some(1),
        mpls_action: Some(MplsAction::PopAndLookup),
        ..Default::default()
    };
    let route = MplsRoute::new(Label::new(1003), [pop].into());

    let bytes = RouteMessage::encode_mpls_add(&route).unwrap();
    let msg = roundtrip(&bytes);
    assert_eq!(msg.nexthops[0].oif, Some(1));
    assert_eq!(msg.nexthops[0].ifindex, 1);
    assert_eq!(msg.nexthops[0].gateway, None);
}

#[test]
fn test_roundtrip_multipath() {
    let route = UnicastRoute::new(
        net!("10.0.0.0/24"),
        [nexthop(3, "10.1.0.1"), nexthop(4, "10.2.0.1")].into(),
    );
    let bytes = RouteMessage::encode_unicast_add(&route).unwrap();
    let msg = roundtrip(&bytes);
    assert_eq!(msg.nexthops.len(), 2);
    let gateways = msg
        .nexthops
        .iter()
        .map(|nexthop| nexthop.gateway.unwrap())
        .collect::<Vec<_>>();
    assert!(gateways.contains(&ip!("10.1.0.1")));
    assert!(gateways.contains(&ip!("10.2.0.1")));
}

#[test]
fn test_delete_message_flags() {
    let route = UnicastRoute::new(
        net!("10.0.0.0/24"),
        [nexthop(3, "10.0.0.1")].into(),
    );
    let bytes = RouteMessage::encode_unicast_del(&route).unwrap();
    let msg = roundtrip(&bytes);
    assert_eq!(msg.msg_type, RTM_DELROUTE);
    assert!(!msg.msg_flags.contains(MessageFlags::CREATE));
    assert!(msg.msg_flags.contains(MessageFlags::REPLACE));
    // Deletes carry the destination only.
    assert!(msg.nexthops.is_empty());
}

#[test]
fn test_multicast_and_link_scope_need_no_gateway() {
    let bare = Nexthop {
        ifindex: Some(3),
        ..Default::default()
    };

    let mut route =
        UnicastRoute::new(net!("224.0.0.0/4"), [bare.clone()].into());
    route.route_type = RouteType::Multicast;
    let bytes = RouteMessage::encode_unicast_add(&route).unwrap();
    let msg = roundtrip(&bytes);
    assert!(!msg.msg_flags.contains(MessageFlags::REPLACE));
    assert_eq!(msg.nexthops[0].gateway, None);

    let mut route = UnicastRoute::new(net!("10.0.0.0/24"), [bare].into());
    route.scope = RouteScope::Link;
    let bytes = RouteMessage::encode_unicast_add(&route).unwrap();
    let msg = roundtrip(&bytes);
    assert_eq!(msg.scope, RouteScope::Link as u8);
    assert_eq!(msg.nexthops[0].gateway, None);
}

#[test]
fn test_missing_gateway_is_rejected() {
    let bare = Nexthop {
        ifindex: Some(3),
        ..Default::default()
    };
    let route = UnicastRoute::new(net!("10.0.0.0/24"), [bare.clone()].into());
    assert_eq!(
        RouteMessage::encode_unicast_add(&route),
        Err(EncodeError::NoNexthopIp)
    );

    // Same for PUSH and SWAP, which require a gateway / via address.
    let mut push = bare.clone();
    push.mpls_action = Some(MplsAction::Push(vec![Label::new(2001)]));
    let route = MplsRoute::new(Label::new(1001), [push].into());
    assert_eq!(
        RouteMessage::encode_mpls_add(&route),
        Err(EncodeError::NoNexthopIp)
    );

    let mut swap = bare;
    swap.mpls_action = Some(MplsAction::Swap(Label::new(2001)));
    let route = MplsRoute::new(Label::new(1001), [swap].into());
    assert_eq!(
        RouteMessage::encode_mpls_add(&route),
        Err(EncodeError::NoNexthopIp)
    );
}

#[test]
fn test_empty_push_stack_is_rejected() {
    let mut push = nexthop(5, "fe80::1");
    push.mpls_action = Some(MplsAction::Push(vec![]));
    let route = MplsRoute::new(Label::new(1001), [push].into());
    assert_eq!(
        RouteMessage::encode_mpls_add(&route),
        Err(EncodeError::NoLabel)
    );
}

#[test]
fn test_pop_without_ifindex_is_rejected() {
    let pop = Nexthop {
        mpls_action: Some(MplsAction::PopAndLookup),
        ..Default::default()
    };
    let route = MplsRoute::new(Label::new(1001), [pop].into());
    assert_eq!(
        RouteMessage::encode_mpls_add(&route),
        Err(EncodeError::NoLoopbackIndex)
    );
}

#[test]
fn test_label_overflow_encodes_as_zero() {
    // Out-of-range labels are logged and encoded as label 0, keeping the
    // bottom-of-stack bit intact.
    assert_eq!(encode_label(0x100000, false), 0);
    assert_eq!(encode_label(0x100000, true), 1 << 8);
    assert_eq!(encode_label(0xFFFFF, false), 0xFFFFF << 12);
}
