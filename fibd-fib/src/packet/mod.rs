//
// Copyright (c) The Fibd Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod error;
pub mod route;

use bitflags::bitflags;
use bytes::{BufMut, BytesMut};
use fibd_utils::mpls::Label;
use tracing::error;

use crate::packet::error::{EncodeError, EncodeResult};

// Sizes of the fixed message structures, as defined in the linux/netlink.h
// and linux/rtnetlink.h kernel headers.
pub const NLMSG_HDR_SIZE: usize = 16;
pub const RTMSG_HDR_SIZE: usize = 12;
pub const RTNH_HDR_SIZE: usize = 8;
pub const RTA_HDR_SIZE: usize = 4;
pub const RTA_ALIGNTO: usize = 4;

// Maximum size of an encoded route message.
pub const MAX_MESSAGE_SIZE: usize = 4096;

// Message types.
pub const RTM_NEWROUTE: u16 = 24;
pub const RTM_DELROUTE: u16 = 25;

// Address families.
pub const AF_INET: u8 = 2;
pub const AF_INET6: u8 = 10;
pub const AF_MPLS: u8 = 28;

// Route message header fields.
pub const RT_TABLE_MAIN: u8 = 254;
pub const RTM_F_NOTIFY: u32 = 0x100;

// Route attribute types.
pub const RTA_DST: u16 = 1;
pub const RTA_OIF: u16 = 4;
pub const RTA_GATEWAY: u16 = 5;
pub const RTA_MULTIPATH: u16 = 9;
pub const RTA_VIA: u16 = 18;
pub const RTA_NEWDST: u16 = 19;
pub const RTA_ENCAP_TYPE: u16 = 21;
pub const RTA_ENCAP: u16 = 22;

// Lightweight tunnel encapsulation types.
pub const LWTUNNEL_ENCAP_MPLS: u16 = 1;

// MPLS tunnel attribute types.
pub const MPLS_IPTUNNEL_DST: u16 = 1;

// MPLS label entry layout.
pub const LABEL_SIZE_BITS: u8 = 20;
const LABEL_SHIFT: u32 = 12;
const LABEL_BOS_SHIFT: u32 = 8;

bitflags! {
    // Netlink message header flags.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct MessageFlags: u16 {
        const REQUEST = 0x0001;
        const ACK = 0x0004;
        const REPLACE = 0x0100;
        const CREATE = 0x0400;
    }
}

// ===== global functions =====

// Rounds a length up to the attribute alignment boundary.
pub(crate) const fn rta_align(len: usize) -> usize {
    (len + RTA_ALIGNTO - 1) & !(RTA_ALIGNTO - 1)
}

// Encodes a 20-bit label into a 32-bit label stack entry, to be written in
// big-endian byte order. Out-of-range labels are encoded as 0 and logged.
pub fn encode_label(label: u32, bottom_of_stack: bool) -> u32 {
    let mut label = label;
    if label > Label::VALUE_MASK {
        error!(%label, "invalid mpls label");
        label = 0;
    }
    let mut entry = label << LABEL_SHIFT;
    if bottom_of_stack {
        entry |= 1 << LABEL_BOS_SHIFT;
    }
    entry
}

// Splits a 32-bit label stack entry into label value and bottom-of-stack bit.
pub fn decode_label_entry(entry: u32) -> (u32, bool) {
    let label = (entry >> LABEL_SHIFT) & Label::VALUE_MASK;
    let bottom_of_stack = (entry >> LABEL_BOS_SHIFT) & 1 != 0;
    (label, bottom_of_stack)
}

// Typed writer for route attributes and next-hop records.
//
// Lengths of nested structures are rewritten once their content is known,
// and every append is checked against the remaining buffer capacity.
#[derive(Debug)]
pub(crate) struct AttrWriter<'a> {
    buf: &'a mut BytesMut,
    max_size: usize,
}

// ===== impl AttrWriter =====

impl<'a> AttrWriter<'a> {
    pub(crate) fn new(buf: &'a mut BytesMut, max_size: usize) -> AttrWriter<'a> {
        AttrWriter { buf, max_size }
    }

    // Appends a complete attribute, padded to the alignment boundary.
    pub(crate) fn put_attr(
        &mut self,
        attr_type: u16,
        payload: &[u8],
    ) -> EncodeResult<()> {
        let size = RTA_HDR_SIZE + payload.len();
        let aligned_size = rta_align(size);
        if self.buf.len() + aligned_size > self.max_size {
            return Err(EncodeError::NoMessageBuffer);
        }

        self.buf.put_u16_ne(size as u16);
        self.buf.put_u16_ne(attr_type);
        self.buf.put_slice(payload);
        self.buf.put_bytes(0, aligned_size - size);
        Ok(())
    }

    // Opens a nested attribute. The attribute length is rewritten by
    // `end_attr` once all sub-attributes have been appended.
    pub(crate) fn begin_attr(&mut self, attr_type: u16) -> EncodeResult<usize> {
        if self.buf.len() + RTA_HDR_SIZE > self.max_size {
            return Err(EncodeError::NoMessageBuffer);
        }

        let pos = self.buf.len();
        self.buf.put_u16_ne(0);
        self.buf.put_u16_ne(attr_type);
        Ok(pos)
    }

    pub(crate) fn end_attr(&mut self, pos: usize) {
        let len = (self.buf.len() - pos) as u16;
        self.buf[pos..pos + 2].copy_from_slice(&len.to_ne_bytes());
    }

    // Opens a next-hop record inside a MULTIPATH attribute. The record
    // length is rewritten by `end_nexthop`.
    pub(crate) fn begin_nexthop(&mut self, ifindex: u32) -> EncodeResult<usize> {
        if self.buf.len() + RTNH_HDR_SIZE > self.max_size {
            return Err(EncodeError::NoMessageBuffer);
        }

        let pos = self.buf.len();
        self.buf.put_u16_ne(0);
        self.buf.put_u8(0); // rtnh_flags
        self.buf.put_u8(0); // rtnh_hops
        self.buf.put_i32_ne(ifindex as i32);
        Ok(pos)
    }

    pub(crate) fn end_nexthop(&mut self, pos: usize) {
        let len = (self.buf.len() - pos) as u16;
        self.buf[pos..pos + 2].copy_from_slice(&len.to_ne_bytes());
    }
}
