//
// Copyright (c) The Fibd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::perf::PerfDatabase;
use crate::southbound::{InterfaceDatabase, RouteDatabase};
use crate::{Responder, UnboundedReceiver, UnboundedSender};

// Useful type definition(s).
pub type IbusReceiver = UnboundedReceiver<IbusMsg>;
pub type IbusSender = UnboundedSender<IbusMsg>;

// Bus message for communication among the daemon components.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub enum IbusMsg {
    // Route database publication from the decision engine.
    RouteDbUpd(RouteDatabase),
    // Interface database publication from the link monitor.
    InterfaceDbUpd(InterfaceDatabase),
    // Ordered-FIB programming-time marker, consumed by the gossip store.
    FibTimeMarker { key: String, value: String },
    // Flat counters submitted to the monitor.
    CountersUpd(BTreeMap<String, i64>),
}

// Query served by the FIB agent.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum FibRequest {
    RouteDbGet,
    PerfDbGet,
    RouteDbUninstallableGet,
}

// Reply to a FIB agent query.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub enum FibResponse {
    RouteDb(RouteDatabase),
    PerfDb(PerfDatabase),
}

// Request envelope carrying the reply channel.
#[derive(Debug)]
pub struct FibQueryMsg {
    pub request: FibRequest,
    pub responder: Responder<FibResponse>,
}
