//
// Copyright (c) The Fibd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::mpls::Label;
use crate::perf::PerfEvents;

// Route protocol identifier used for routes originated by this daemon, as
// seen in the kernel routing table.
pub const DEFAULT_ROUTE_PROTOCOL: u8 = 99;

// MPLS label action attached to a next hop.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum MplsAction {
    // Push a label stack onto the packet.
    Push(Vec<Label>),
    // Replace the top label.
    Swap(Label),
    // Penultimate-hop pop: forward without a label.
    Php,
    // Strip the label and consult the IP table on the given interface.
    PopAndLookup,
}

// Route next hop.
//
// The field order drives the derived ordering, which in turn makes
// `BTreeSet<Nexthop>` iteration (and therefore delta computation)
// deterministic.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct Nexthop {
    pub ifindex: Option<u32>,
    pub addr: Option<IpAddr>,
    pub ifname: Option<String>,
    pub weight: u32,
    pub mpls_action: Option<MplsAction>,
}

// Route types as defined in the rtnetlink.h kernel header.
#[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum RouteType {
    #[default]
    Unicast = 1,
    Local = 2,
    Broadcast = 3,
    Anycast = 4,
    Multicast = 5,
    Blackhole = 6,
    Unreachable = 7,
}

// Route scopes as defined in the rtnetlink.h kernel header.
#[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum RouteScope {
    #[default]
    Universe = 0,
    Site = 200,
    Link = 253,
    Host = 254,
    Nowhere = 255,
}

// Unicast route entry.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct UnicastRoute {
    pub dest: IpNetwork,
    pub nexthops: BTreeSet<Nexthop>,
    pub do_not_install: bool,
    pub route_type: RouteType,
    pub protocol: u8,
    pub scope: RouteScope,
    pub flags: u32,
    pub perf_events: Option<PerfEvents>,
}

// MPLS route entry, keyed by its incoming top label. Every next hop must
// carry a label action; the route codec rejects those that do not.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct MplsRoute {
    pub top_label: Label,
    pub nexthops: BTreeSet<Nexthop>,
    pub protocol: u8,
    pub flags: u32,
}

// Full route database as published by the decision engine.
#[derive(Clone, Debug, Default)]
#[derive(Deserialize, Serialize)]
pub struct RouteDatabase {
    pub node_name: String,
    pub unicast_routes: BTreeMap<IpNetwork, UnicastRoute>,
    pub mpls_routes: BTreeMap<Label, MplsRoute>,
    pub perf_events: Option<PerfEvents>,
}

// Patch between two successive route databases.
#[derive(Clone, Debug, Default)]
#[derive(Deserialize, Serialize)]
pub struct RouteDatabaseDelta {
    pub unicast_to_update: Vec<UnicastRoute>,
    pub unicast_to_delete: Vec<IpNetwork>,
    pub mpls_to_update: Vec<MplsRoute>,
    pub mpls_to_delete: Vec<Label>,
}

// Interface liveness entry as published by the link monitor.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct InterfaceInfo {
    pub is_up: bool,
    pub ifindex: u32,
}

// Interface database publication.
#[derive(Clone, Debug, Default)]
#[derive(Deserialize, Serialize)]
pub struct InterfaceDatabase {
    pub node_name: String,
    pub interfaces: BTreeMap<String, InterfaceInfo>,
    pub perf_events: Option<PerfEvents>,
}

// ===== impl Nexthop =====

impl Nexthop {
    pub const DEFAULT_WEIGHT: u32 = 1;
}

impl Default for Nexthop {
    fn default() -> Nexthop {
        Nexthop {
            ifindex: None,
            addr: None,
            ifname: None,
            weight: Nexthop::DEFAULT_WEIGHT,
            mpls_action: None,
        }
    }
}

impl std::fmt::Display for Nexthop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(addr) = &self.addr {
            write!(f, "via {}", addr)?;
        }
        if let Some(ifname) = &self.ifname {
            write!(f, " dev {}", ifname)?;
        } else if let Some(ifindex) = self.ifindex {
            write!(f, " dev #{}", ifindex)?;
        }
        write!(f, " weight {}", self.weight)?;
        match &self.mpls_action {
            Some(MplsAction::Push(labels)) => {
                write!(f, " push [")?;
                for (idx, label) in labels.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", label)?;
                }
                write!(f, "]")?;
            }
            Some(MplsAction::Swap(label)) => write!(f, " swap {}", label)?,
            Some(MplsAction::Php) => write!(f, " php")?,
            Some(MplsAction::PopAndLookup) => write!(f, " pop-and-lookup")?,
            None => (),
        }
        Ok(())
    }
}

// ===== impl UnicastRoute =====

impl UnicastRoute {
    pub fn new(dest: IpNetwork, nexthops: BTreeSet<Nexthop>) -> UnicastRoute {
        UnicastRoute {
            dest,
            nexthops,
            do_not_install: false,
            route_type: RouteType::default(),
            protocol: DEFAULT_ROUTE_PROTOCOL,
            scope: RouteScope::default(),
            flags: 0,
            perf_events: None,
        }
    }
}

// ===== impl MplsRoute =====

impl MplsRoute {
    pub fn new(top_label: Label, nexthops: BTreeSet<Nexthop>) -> MplsRoute {
        MplsRoute {
            top_label,
            nexthops,
            protocol: DEFAULT_ROUTE_PROTOCOL,
            flags: 0,
        }
    }
}

// ===== impl RouteDatabase =====

impl RouteDatabase {
    pub fn new(node_name: String) -> RouteDatabase {
        RouteDatabase {
            node_name,
            ..Default::default()
        }
    }
}

// ===== impl RouteDatabaseDelta =====

impl RouteDatabaseDelta {
    pub fn is_empty(&self) -> bool {
        self.unicast_to_update.is_empty()
            && self.unicast_to_delete.is_empty()
            && self.mpls_to_update.is_empty()
            && self.mpls_to_delete.is_empty()
    }
}
