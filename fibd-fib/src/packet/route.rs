//
// Copyright (c) The Fibd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::IpAddr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use fibd_utils::bytes::BytesExt;
use fibd_utils::ip::IpAddrExt;
use fibd_utils::mpls::Label;
use fibd_utils::southbound::{
    MplsAction, MplsRoute, Nexthop, RouteScope, RouteType, UnicastRoute,
};
use ipnetwork::IpNetwork;

use crate::packet::error::{
    DecodeError, DecodeResult, EncodeError, EncodeResult,
};
use crate::packet::{
    decode_label_entry, encode_label, rta_align, AttrWriter, MessageFlags,
    AF_INET, AF_INET6, AF_MPLS, LABEL_SIZE_BITS, LWTUNNEL_ENCAP_MPLS,
    MAX_MESSAGE_SIZE, MPLS_IPTUNNEL_DST, NLMSG_HDR_SIZE, RTA_DST, RTA_ENCAP,
    RTA_ENCAP_TYPE, RTA_GATEWAY, RTA_HDR_SIZE, RTA_MULTIPATH, RTA_NEWDST,
    RTA_OIF, RTA_VIA, RTMSG_HDR_SIZE, RTM_DELROUTE, RTM_F_NOTIFY,
    RTM_NEWROUTE, RTNH_HDR_SIZE, RT_TABLE_MAIN,
};

//
// Route request message.
//
// Encoding format (linux rtnetlink):
//
// +--------------------+
// |      nlmsghdr      | 16 bytes: length, type, flags, seq, pid
// +--------------------+
// |       rtmsg        | 12 bytes: family, dst_len, .., table, proto, ..
// +--------------------+
// |      RTA_DST       | destination prefix or label stack entry
// +--------------------+
// |   RTA_MULTIPATH    | sequence of rtnexthop records, each carrying
// |                    | nested sub-attributes per its label action
// +--------------------+
//
// The structure below is the parsed form, produced by `decode`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RouteMessage {
    pub msg_type: u16,
    pub msg_flags: MessageFlags,
    pub family: u8,
    pub dst_len: u8,
    pub table: u8,
    pub protocol: u8,
    pub scope: u8,
    pub route_type: u8,
    pub rtm_flags: u32,
    pub dst: Option<RouteDst>,
    pub nexthops: Vec<RouteNexthop>,
}

// Parsed destination attribute.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RouteDst {
    Ip(IpNetwork),
    Mpls(Label),
}

// Parsed next-hop record.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RouteNexthop {
    pub ifindex: u32,
    pub gateway: Option<IpAddr>,
    pub via: Option<IpAddr>,
    pub newdst: Option<Label>,
    pub oif: Option<u32>,
    pub push_labels: Vec<Label>,
    pub encap_type: Option<u16>,
}

// ===== impl RouteMessage =====

impl RouteMessage {
    // Encodes a request to add or replace one unicast route.
    pub fn encode_unicast_add(route: &UnicastRoute) -> EncodeResult<Bytes> {
        Self::encode_unicast(RTM_NEWROUTE, route)
    }

    // Encodes a request to delete one unicast route.
    pub fn encode_unicast_del(route: &UnicastRoute) -> EncodeResult<Bytes> {
        let mut buf = BytesMut::with_capacity(MAX_MESSAGE_SIZE);
        let (family, dst) = encode_ip_dst(&route.dest);
        encode_headers(
            &mut buf,
            RTM_DELROUTE,
            route.route_type,
            family,
            route.dest.prefix(),
            route.protocol,
            route.scope as u8,
            RTM_F_NOTIFY | route.flags,
        );
        let mut writer = AttrWriter::new(&mut buf, MAX_MESSAGE_SIZE);
        writer.put_attr(RTA_DST, &dst)?;
        Ok(finalize(buf))
    }

    // Encodes a request to add or replace one MPLS route.
    pub fn encode_mpls_add(route: &MplsRoute) -> EncodeResult<Bytes> {
        let mut buf = BytesMut::with_capacity(MAX_MESSAGE_SIZE);
        encode_mpls_headers(&mut buf, RTM_NEWROUTE, route);
        let mut writer = AttrWriter::new(&mut buf, MAX_MESSAGE_SIZE);
        let entry = encode_label(route.top_label.get(), true);
        writer.put_attr(RTA_DST, &entry.to_be_bytes())?;
        encode_nexthops(
            &mut writer,
            &route.nexthops,
            RouteType::Unicast,
            RouteScope::Universe,
        )?;
        Ok(finalize(buf))
    }

    // Encodes a request to delete one MPLS route.
    pub fn encode_mpls_del(route: &MplsRoute) -> EncodeResult<Bytes> {
        let mut buf = BytesMut::with_capacity(MAX_MESSAGE_SIZE);
        encode_mpls_headers(&mut buf, RTM_DELROUTE, route);
        let mut writer = AttrWriter::new(&mut buf, MAX_MESSAGE_SIZE);
        let entry = encode_label(route.top_label.get(), true);
        writer.put_attr(RTA_DST, &entry.to_be_bytes())?;
        Ok(finalize(buf))
    }

    fn encode_unicast(
        msg_type: u16,
        route: &UnicastRoute,
    ) -> EncodeResult<Bytes> {
        let mut buf = BytesMut::with_capacity(MAX_MESSAGE_SIZE);
        let (family, dst) = encode_ip_dst(&route.dest);
        encode_headers(
            &mut buf,
            msg_type,
            route.route_type,
            family,
            route.dest.prefix(),
            route.protocol,
            route.scope as u8,
            RTM_F_NOTIFY | route.flags,
        );
        let mut writer = AttrWriter::new(&mut buf, MAX_MESSAGE_SIZE);
        writer.put_attr(RTA_DST, &dst)?;
        encode_nexthops(
            &mut writer,
            &route.nexthops,
            route.route_type,
            route.scope,
        )?;
        Ok(finalize(buf))
    }

    // Parses one route message from the front of the buffer.
    pub fn decode(buf: &mut Bytes) -> DecodeResult<RouteMessage> {
        if buf.remaining() < NLMSG_HDR_SIZE + RTMSG_HDR_SIZE {
            return Err(DecodeError::ReadOutOfBounds);
        }

        // Message header.
        let msg_len = buf.get_u32_ne() as usize;
        if msg_len < NLMSG_HDR_SIZE + RTMSG_HDR_SIZE
            || msg_len - 4 > buf.remaining()
        {
            return Err(DecodeError::InvalidMessageLength(msg_len as u32));
        }
        let msg_type = buf.get_u16_ne();
        let msg_flags = MessageFlags::from_bits_truncate(buf.get_u16_ne());
        let _seq = buf.get_u32_ne();
        let _pid = buf.get_u32_ne();

        // Route message header.
        let family = buf.get_u8();
        let dst_len = buf.get_u8();
        let _src_len = buf.get_u8();
        let _tos = buf.get_u8();
        let table = buf.get_u8();
        let protocol = buf.get_u8();
        let scope = buf.get_u8();
        let route_type = buf.get_u8();
        let rtm_flags = buf.get_u32_ne();

        // Route attributes.
        let mut dst = None;
        let mut nexthops = Vec::new();
        let mut attrs_len = msg_len - NLMSG_HDR_SIZE - RTMSG_HDR_SIZE;
        while attrs_len >= RTA_HDR_SIZE {
            let rta_len = buf.get_u16_ne() as usize;
            let rta_type = buf.get_u16_ne();
            if rta_len < RTA_HDR_SIZE || rta_len > attrs_len {
                return Err(DecodeError::InvalidAttrLength(rta_len as u16));
            }
            let payload_len = rta_len - RTA_HDR_SIZE;
            if payload_len > buf.remaining() {
                return Err(DecodeError::ReadOutOfBounds);
            }
            let mut payload = buf.split_to(payload_len);

            match rta_type {
                RTA_DST => {
                    dst = Some(decode_dst(&mut payload, family, dst_len)?);
                }
                RTA_MULTIPATH => {
                    nexthops = decode_multipath(&mut payload)?;
                }
                _ => (),
            }

            // Skip alignment padding.
            let aligned_len = rta_align(rta_len).min(attrs_len);
            let padding = aligned_len - rta_len;
            if padding > buf.remaining() {
                return Err(DecodeError::ReadOutOfBounds);
            }
            buf.advance(padding);
            attrs_len -= aligned_len;
        }

        Ok(RouteMessage {
            msg_type,
            msg_flags,
            family,
            dst_len,
            table,
            protocol,
            scope,
            route_type,
            rtm_flags,
            dst,
            nexthops,
        })
    }
}

// ===== helper functions =====

fn encode_ip_dst(dest: &IpNetwork) -> (u8, Vec<u8>) {
    match dest {
        IpNetwork::V4(dest) => (AF_INET, dest.ip().octets().to_vec()),
        IpNetwork::V6(dest) => (AF_INET6, dest.ip().octets().to_vec()),
    }
}

#[allow(clippy::too_many_arguments)]
fn encode_headers(
    buf: &mut BytesMut,
    msg_type: u16,
    route_type: RouteType,
    family: u8,
    dst_len: u8,
    protocol: u8,
    scope: u8,
    rtm_flags: u32,
) {
    // Message header. The length is rewritten once the full message is
    // encoded. A second add of a non-multicast route must atomically
    // overwrite the first, hence REPLACE.
    let mut msg_flags = MessageFlags::REQUEST | MessageFlags::ACK;
    if msg_type != RTM_DELROUTE {
        msg_flags |= MessageFlags::CREATE;
    }
    if route_type != RouteType::Multicast {
        msg_flags |= MessageFlags::REPLACE;
    }
    buf.put_u32_ne(0);
    buf.put_u16_ne(msg_type);
    buf.put_u16_ne(msg_flags.bits());
    buf.put_u32_ne(0); // seq
    buf.put_u32_ne(0); // pid

    // Route message header.
    buf.put_u8(family);
    buf.put_u8(dst_len);
    buf.put_u8(0); // src_len
    buf.put_u8(0); // tos
    buf.put_u8(RT_TABLE_MAIN);
    buf.put_u8(protocol);
    buf.put_u8(scope);
    buf.put_u8(route_type as u8);
    buf.put_u32_ne(rtm_flags);
}

fn encode_mpls_headers(buf: &mut BytesMut, msg_type: u16, route: &MplsRoute) {
    encode_headers(
        buf,
        msg_type,
        RouteType::Unicast,
        AF_MPLS,
        LABEL_SIZE_BITS,
        route.protocol,
        RouteScope::Universe as u8,
        0,
    );
}

fn encode_nexthops(
    writer: &mut AttrWriter<'_>,
    nexthops: &BTreeSet<Nexthop>,
    route_type: RouteType,
    scope: RouteScope,
) -> EncodeResult<()> {
    if nexthops.is_empty() {
        return Ok(());
    }

    let mp_pos = writer.begin_attr(RTA_MULTIPATH)?;
    for nexthop in nexthops {
        match &nexthop.mpls_action {
            None => encode_ip_nexthop(writer, nexthop, route_type, scope)?,
            Some(MplsAction::Push(labels)) => {
                encode_push_nexthop(writer, nexthop, labels)?
            }
            Some(MplsAction::Swap(label)) => {
                encode_swap_or_php_nexthop(writer, nexthop, Some(*label))?
            }
            Some(MplsAction::Php) => {
                encode_swap_or_php_nexthop(writer, nexthop, None)?
            }
            Some(MplsAction::PopAndLookup) => {
                encode_pop_nexthop(writer, nexthop)?
            }
        }
    }
    writer.end_attr(mp_pos);
    Ok(())
}

fn encode_ip_nexthop(
    writer: &mut AttrWriter<'_>,
    nexthop: &Nexthop,
    route_type: RouteType,
    scope: RouteScope,
) -> EncodeResult<()> {
    let pos = writer.begin_nexthop(nexthop.ifindex.unwrap_or(0))?;

    match &nexthop.addr {
        Some(addr) => writer.put_attr(RTA_GATEWAY, &addr.bytes())?,
        // Directly-connected and multicast routes carry no gateway.
        None => {
            if route_type != RouteType::Multicast && scope != RouteScope::Link
            {
                return Err(EncodeError::NoNexthopIp);
            }
        }
    }

    writer.end_nexthop(pos);
    Ok(())
}

fn encode_push_nexthop(
    writer: &mut AttrWriter<'_>,
    nexthop: &Nexthop,
    labels: &[Label],
) -> EncodeResult<()> {
    let pos = writer.begin_nexthop(nexthop.ifindex.unwrap_or(0))?;

    if labels.is_empty() {
        return Err(EncodeError::NoLabel);
    }

    // Label stack, bottom-of-stack bit set on the last entry.
    let encap_pos = writer.begin_attr(RTA_ENCAP)?;
    let mut stack = Vec::with_capacity(labels.len() * 4);
    for (idx, label) in labels.iter().enumerate() {
        let bottom_of_stack = idx == labels.len() - 1;
        let entry = encode_label(label.get(), bottom_of_stack);
        stack.extend_from_slice(&entry.to_be_bytes());
    }
    writer.put_attr(MPLS_IPTUNNEL_DST, &stack)?;
    writer.end_attr(encap_pos);
    writer.put_attr(RTA_ENCAP_TYPE, &LWTUNNEL_ENCAP_MPLS.to_ne_bytes())?;

    let Some(addr) = &nexthop.addr else {
        return Err(EncodeError::NoNexthopIp);
    };
    writer.put_attr(RTA_GATEWAY, &addr.bytes())?;

    writer.end_nexthop(pos);
    Ok(())
}

fn encode_swap_or_php_nexthop(
    writer: &mut AttrWriter<'_>,
    nexthop: &Nexthop,
    swap_label: Option<Label>,
) -> EncodeResult<()> {
    let pos = writer.begin_nexthop(nexthop.ifindex.unwrap_or(0))?;

    // PHP forwards without an outgoing label.
    if let Some(label) = swap_label {
        let entry = encode_label(label.get(), true);
        writer.put_attr(RTA_NEWDST, &entry.to_be_bytes())?;
    }

    let Some(addr) = &nexthop.addr else {
        return Err(EncodeError::NoNexthopIp);
    };
    let mut via = Vec::with_capacity(1 + addr.length());
    via.push(addr.address_family() as u8);
    via.extend_from_slice(&addr.bytes());
    writer.put_attr(RTA_VIA, &via)?;

    writer.end_nexthop(pos);
    Ok(())
}

fn encode_pop_nexthop(
    writer: &mut AttrWriter<'_>,
    nexthop: &Nexthop,
) -> EncodeResult<()> {
    let Some(ifindex) = nexthop.ifindex else {
        return Err(EncodeError::NoLoopbackIndex);
    };

    let pos = writer.begin_nexthop(ifindex)?;
    writer.put_attr(RTA_OIF, &ifindex.to_ne_bytes())?;
    writer.end_nexthop(pos);
    Ok(())
}

fn finalize(mut buf: BytesMut) -> Bytes {
    let msg_len = (buf.len() as u32).to_ne_bytes();
    buf[0..4].copy_from_slice(&msg_len);
    buf.freeze()
}

fn decode_dst(
    payload: &mut Bytes,
    family: u8,
    dst_len: u8,
) -> DecodeResult<RouteDst> {
    match family {
        AF_INET => {
            if payload.remaining() < 4 {
                return Err(DecodeError::ReadOutOfBounds);
            }
            let addr = payload.get_ipv4();
            let prefix = IpNetwork::new(addr.into(), dst_len)
                .map_err(|_| DecodeError::InvalidAttrLength(dst_len as u16))?;
            Ok(RouteDst::Ip(prefix))
        }
        AF_INET6 => {
            if payload.remaining() < 16 {
                return Err(DecodeError::ReadOutOfBounds);
            }
            let addr = payload.get_ipv6();
            let prefix = IpNetwork::new(addr.into(), dst_len)
                .map_err(|_| DecodeError::InvalidAttrLength(dst_len as u16))?;
            Ok(RouteDst::Ip(prefix))
        }
        AF_MPLS => {
            if payload.remaining() < 4 {
                return Err(DecodeError::ReadOutOfBounds);
            }
            let (label, _) = decode_label_entry(payload.get_u32());
            Ok(RouteDst::Mpls(Label::new(label)))
        }
        _ => Err(DecodeError::InvalidAddressFamily(family)),
    }
}

fn decode_multipath(payload: &mut Bytes) -> DecodeResult<Vec<RouteNexthop>> {
    let mut nexthops = Vec::new();

    while payload.remaining() >= RTNH_HDR_SIZE {
        let rtnh_len = payload.get_u16_ne() as usize;
        let _flags = payload.get_u8();
        let _hops = payload.get_u8();
        let ifindex = payload.get_i32_ne() as u32;
        if rtnh_len < RTNH_HDR_SIZE
            || rtnh_len - RTNH_HDR_SIZE > payload.remaining()
        {
            return Err(DecodeError::InvalidAttrLength(rtnh_len as u16));
        }

        let mut attrs = payload.split_to(rtnh_len - RTNH_HDR_SIZE);
        let nexthop = decode_nexthop_attrs(&mut attrs, ifindex)?;
        nexthops.push(nexthop);
    }

    Ok(nexthops)
}

fn decode_nexthop_attrs(
    attrs: &mut Bytes,
    ifindex: u32,
) -> DecodeResult<RouteNexthop> {
    let mut nexthop = RouteNexthop {
        ifindex,
        ..Default::default()
    };

    while attrs.remaining() >= RTA_HDR_SIZE {
        let rta_len = attrs.get_u16_ne() as usize;
        let rta_type = attrs.get_u16_ne();
        if rta_len < RTA_HDR_SIZE || rta_len - RTA_HDR_SIZE > attrs.remaining()
        {
            return Err(DecodeError::InvalidAttrLength(rta_len as u16));
        }
        let mut payload = attrs.split_to(rta_len - RTA_HDR_SIZE);

        match rta_type {
            RTA_GATEWAY => {
                nexthop.gateway = Some(decode_addr(&mut payload)?);
            }
            RTA_VIA => {
                if payload.remaining() < 1 {
                    return Err(DecodeError::ReadOutOfBounds);
                }
                let family = payload.get_u8();
                let addr = decode_addr(&mut payload)?;
                match (family, addr) {
                    (AF_INET, IpAddr::V4(_)) | (AF_INET6, IpAddr::V6(_)) => {
                        nexthop.via = Some(addr);
                    }
                    _ => {
                        return Err(DecodeError::InvalidAddressFamily(family))
                    }
                }
            }
            RTA_NEWDST => {
                if payload.remaining() < 4 {
                    return Err(DecodeError::ReadOutOfBounds);
                }
                let (label, _) = decode_label_entry(payload.get_u32());
                nexthop.newdst = Some(Label::new(label));
            }
            RTA_OIF => {
                if payload.remaining() < 4 {
                    return Err(DecodeError::ReadOutOfBounds);
                }
                nexthop.oif = Some(payload.get_u32_ne());
            }
            RTA_ENCAP => {
                nexthop.push_labels = decode_encap(&mut payload)?;
            }
            RTA_ENCAP_TYPE => {
                if payload.remaining() < 2 {
                    return Err(DecodeError::ReadOutOfBounds);
                }
                nexthop.encap_type = Some(payload.get_u16_ne());
            }
            _ => (),
        }

        // Skip alignment padding.
        let padding = rta_align(rta_len) - rta_len;
        let padding = padding.min(attrs.remaining());
        attrs.advance(padding);
    }

    Ok(nexthop)
}

fn decode_encap(payload: &mut Bytes) -> DecodeResult<Vec<Label>> {
    let mut labels = Vec::new();

    while payload.remaining() >= RTA_HDR_SIZE {
        let rta_len = payload.get_u16_ne() as usize;
        let rta_type = payload.get_u16_ne();
        if rta_len < RTA_HDR_SIZE
            || rta_len - RTA_HDR_SIZE > payload.remaining()
        {
            return Err(DecodeError::InvalidAttrLength(rta_len as u16));
        }
        let mut value = payload.split_to(rta_len - RTA_HDR_SIZE);

        if rta_type == MPLS_IPTUNNEL_DST {
            while value.remaining() >= 4 {
                let (label, _) = decode_label_entry(value.get_u32());
                labels.push(Label::new(label));
            }
        }

        let padding = rta_align(rta_len) - rta_len;
        let padding = padding.min(payload.remaining());
        payload.advance(padding);
    }

    Ok(labels)
}

fn decode_addr(payload: &mut Bytes) -> DecodeResult<IpAddr> {
    match payload.remaining() {
        4 => Ok(payload.get_ipv4().into()),
        16 => Ok(payload.get_ipv6().into()),
        _ => Err(DecodeError::ReadOutOfBounds),
    }
}
