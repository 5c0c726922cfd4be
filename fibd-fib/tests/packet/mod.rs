//
// Copyright (c) The Fibd Core Contributors
//
// SPDX-License-Identifier: MIT
//

mod route;

use bytes::Bytes;
use fibd_fib::packet::route::RouteMessage;

//
// Helper functions.
//

fn test_encode_msg(bytes_expected: &[u8], bytes_actual: &Bytes) {
    assert_eq!(
        bytes_expected,
        bytes_actual.as_ref(),
        "expected: {:02x?}, actual: {:02x?}",
        bytes_expected,
        bytes_actual.as_ref()
    );
}

fn test_decode_msg(bytes: &[u8], msg_expected: &RouteMessage) {
    let mut buf = Bytes::copy_from_slice(bytes);
    let msg_actual = RouteMessage::decode(&mut buf).unwrap();
    assert_eq!(buf.len(), 0);
    assert_eq!(*msg_expected, msg_actual);
}

fn roundtrip(bytes: &Bytes) -> RouteMessage {
    let mut buf = bytes.clone();
    let msg = RouteMessage::decode(&mut buf).unwrap();
    assert_eq!(buf.len(), 0);
    msg
}
