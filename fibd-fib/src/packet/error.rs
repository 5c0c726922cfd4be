//
// Copyright (c) The Fibd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use serde::{Deserialize, Serialize};

// Type aliases.
pub type EncodeResult<T> = Result<T, EncodeError>;
pub type DecodeResult<T> = Result<T, DecodeError>;

// Route message encoding errors.
//
// A failure on any sub-attribute aborts the encoding of the entire message;
// the surrounding batch proceeds without the rejected route.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum EncodeError {
    // Destination or gateway family is not encodable.
    InvalidAddressFamily,
    // An attribute would overflow the message buffer.
    NoMessageBuffer,
    // Next-hop gateway required but not provided.
    NoNexthopIp,
    // Push label stack required but not provided.
    NoLabel,
    // Loopback interface index required for POP_AND_LOOKUP.
    NoLoopbackIndex,
    // Next hop carries no usable label action.
    UnknownLabelAction,
}

// Route message decoding errors.
#[derive(Debug, Deserialize, Serialize)]
pub enum DecodeError {
    ReadOutOfBounds,
    InvalidMessageLength(u32),
    InvalidAttrLength(u16),
    InvalidAddressFamily(u8),
}

// ===== impl EncodeError =====

impl std::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncodeError::InvalidAddressFamily => {
                write!(f, "invalid address family")
            }
            EncodeError::NoMessageBuffer => {
                write!(f, "message buffer exhausted")
            }
            EncodeError::NoNexthopIp => {
                write!(f, "nexthop IP not provided")
            }
            EncodeError::NoLabel => {
                write!(f, "labels not provided for PUSH action")
            }
            EncodeError::NoLoopbackIndex => {
                write!(f, "loopback interface index not provided for POP")
            }
            EncodeError::UnknownLabelAction => {
                write!(f, "unknown label action")
            }
        }
    }
}

impl std::error::Error for EncodeError {}

// ===== impl DecodeError =====

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::ReadOutOfBounds => {
                write!(f, "attempt to read out of bounds")
            }
            DecodeError::InvalidMessageLength(len) => {
                write!(f, "invalid message length: {}", len)
            }
            DecodeError::InvalidAttrLength(len) => {
                write!(f, "invalid attribute length: {}", len)
            }
            DecodeError::InvalidAddressFamily(family) => {
                write!(f, "invalid address family: {}", family)
            }
        }
    }
}

impl std::error::Error for DecodeError {}
