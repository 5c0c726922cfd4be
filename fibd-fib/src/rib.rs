//
// Copyright (c) The Fibd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};

use fibd_utils::southbound::{
    InterfaceDatabase, MplsRoute, Nexthop, RouteDatabase, RouteDatabaseDelta,
    UnicastRoute,
};
use tracing::{debug, info};

// Canonical in-memory route state.
//
// `route_db` holds the installable routes as last published by the decision
// engine (mutated in place by interface pruning); `do_not_install_db` is the
// read-only shadow set that is never programmed. `interface_status` tracks
// the last reported liveness per interface, last write wins.
#[derive(Debug, Default)]
pub struct Rib {
    pub(crate) route_db: RouteDatabase,
    pub(crate) do_not_install_db: RouteDatabase,
    pub(crate) interface_status: BTreeMap<String, bool>,
}

// ===== impl Rib =====

impl Rib {
    pub fn new(node_name: &str) -> Rib {
        Rib {
            route_db: RouteDatabase::new(node_name.to_owned()),
            do_not_install_db: RouteDatabase::new(node_name.to_owned()),
            interface_status: Default::default(),
        }
    }

    pub fn route_db(&self) -> &RouteDatabase {
        &self.route_db
    }

    pub fn do_not_install_db(&self) -> &RouteDatabase {
        &self.do_not_install_db
    }

    // Replaces the database with a fresh decision publication and returns
    // the delta against the previously installed state.
    pub fn process_route_db(
        &mut self,
        mut new_db: RouteDatabase,
    ) -> RouteDatabaseDelta {
        // Partition out the routes that must not be programmed.
        let mut do_not_install_db = RouteDatabase::new(new_db.node_name.clone());
        let (shadow, installable) = new_db
            .unicast_routes
            .into_iter()
            .partition(|(_, route)| route.do_not_install);
        new_db.unicast_routes = installable;
        do_not_install_db.unicast_routes = shadow;

        // A route with no next hop is dropped rather than kept around.
        new_db.unicast_routes.retain(|_, route| !route.nexthops.is_empty());
        new_db.mpls_routes.retain(|_, route| !route.nexthops.is_empty());

        let delta = find_delta(&new_db, &self.route_db);
        self.route_db = new_db;
        self.do_not_install_db = do_not_install_db;
        delta
    }

    // Applies an interface liveness publication, dropping next hops bound to
    // interfaces that transitioned from up to down. The pruned state is
    // returned as a delta so it can be programmed immediately, without
    // waiting for a fresh decision publication.
    pub fn process_interface_db(
        &mut self,
        iface_db: &InterfaceDatabase,
    ) -> RouteDatabaseDelta {
        // Find interfaces which were up before and are now reported down.
        // Interfaces that came up are recorded but never prune anything:
        // routes using them must arrive from the decision engine.
        let mut affected = BTreeSet::new();
        for (ifname, info) in &iface_db.interfaces {
            let was_up = self
                .interface_status
                .insert(ifname.clone(), info.is_up)
                .unwrap_or(false);
            if was_up && !info.is_up {
                info!(%ifname, "interface went down from up state");
                affected.insert(ifname.as_str());
            }
        }

        let mut delta = RouteDatabaseDelta::default();
        if affected.is_empty() {
            return delta;
        }

        // Collect the changes first, then apply the removals.
        let mut unicast_removed = Vec::new();
        for (prefix, route) in &mut self.route_db.unicast_routes {
            let prev_best = best_nexthops(&route.nexthops);
            let valid = route
                .nexthops
                .iter()
                .filter(|nexthop| {
                    let ifname = nexthop
                        .ifname
                        .as_deref()
                        .expect("unicast nexthop without interface name");
                    !affected.contains(ifname)
                })
                .cloned()
                .collect::<BTreeSet<_>>();
            let valid_best = best_nexthops(&valid);
            route.nexthops = valid;

            if !valid_best.is_empty() && valid_best != prev_best {
                debug!(
                    dest = %prefix,
                    old = prev_best.len(), new = valid_best.len(),
                    "best paths group resized"
                );
                delta.unicast_to_update.push(route.clone());
            }
            if route.nexthops.is_empty() {
                debug!(dest = %prefix, "removing route with no valid nexthops");
                delta.unicast_to_delete.push(*prefix);
                unicast_removed.push(*prefix);
            }
        }
        for prefix in unicast_removed {
            self.route_db.unicast_routes.remove(&prefix);
        }

        let mut mpls_removed = Vec::new();
        for (label, route) in &mut self.route_db.mpls_routes {
            let prev_best = best_nexthops(&route.nexthops);
            // POP_AND_LOOKUP next hops carry no interface name and are
            // always valid.
            let valid = route
                .nexthops
                .iter()
                .filter(|nexthop| match nexthop.ifname.as_deref() {
                    Some(ifname) => !affected.contains(ifname),
                    None => true,
                })
                .cloned()
                .collect::<BTreeSet<_>>();
            let valid_best = best_nexthops(&valid);
            route.nexthops = valid;

            if !valid_best.is_empty() && valid_best != prev_best {
                debug!(
                    %label,
                    old = prev_best.len(), new = valid_best.len(),
                    "best paths group resized"
                );
                delta.mpls_to_update.push(route.clone());
            }
            if route.nexthops.is_empty() {
                debug!(%label, "removing route with no valid nexthops");
                delta.mpls_to_delete.push(*label);
                mpls_removed.push(*label);
            }
        }
        for label in mpls_removed {
            self.route_db.mpls_routes.remove(&label);
        }

        delta
    }

    // Installable unicast routes narrowed to their best next-hop sets.
    pub fn unicast_routes_with_best_nexthops(&self) -> Vec<UnicastRoute> {
        self.route_db
            .unicast_routes
            .values()
            .map(with_best_unicast_nexthops)
            .collect()
    }

    // Installable MPLS routes narrowed to their best next-hop sets.
    pub fn mpls_routes_with_best_nexthops(&self) -> Vec<MplsRoute> {
        self.route_db
            .mpls_routes
            .values()
            .map(with_best_mpls_nexthops)
            .collect()
    }
}

// ===== global functions =====

// Returns the subset of next hops carrying the maximum weight. Ties keep
// their deterministic `BTreeSet` ordering, so equal-cost groups hash and
// compare stably across delta computations.
pub fn best_nexthops(nexthops: &BTreeSet<Nexthop>) -> BTreeSet<Nexthop> {
    let Some(max_weight) =
        nexthops.iter().map(|nexthop| nexthop.weight).max()
    else {
        return Default::default();
    };
    nexthops
        .iter()
        .filter(|nexthop| nexthop.weight == max_weight)
        .cloned()
        .collect()
}

pub(crate) fn with_best_unicast_nexthops(route: &UnicastRoute) -> UnicastRoute {
    let mut route = route.clone();
    route.nexthops = best_nexthops(&route.nexthops);
    route
}

pub(crate) fn with_best_mpls_nexthops(route: &MplsRoute) -> MplsRoute {
    let mut route = route.clone();
    route.nexthops = best_nexthops(&route.nexthops);
    route
}

// Computes the patch from `old_db` to `new_db`, comparing best next-hop
// sets rather than raw sets so that weight-demoted paths don't churn the
// data plane.
fn find_delta(
    new_db: &RouteDatabase,
    old_db: &RouteDatabase,
) -> RouteDatabaseDelta {
    let mut delta = RouteDatabaseDelta::default();

    for (prefix, new_route) in &new_db.unicast_routes {
        match old_db.unicast_routes.get(prefix) {
            Some(old_route)
                if best_nexthops(&old_route.nexthops)
                    == best_nexthops(&new_route.nexthops) => {}
            _ => delta.unicast_to_update.push(new_route.clone()),
        }
    }
    for prefix in old_db.unicast_routes.keys() {
        if !new_db.unicast_routes.contains_key(prefix) {
            delta.unicast_to_delete.push(*prefix);
        }
    }

    for (label, new_route) in &new_db.mpls_routes {
        match old_db.mpls_routes.get(label) {
            Some(old_route)
                if best_nexthops(&old_route.nexthops)
                    == best_nexthops(&new_route.nexthops) => {}
            _ => delta.mpls_to_update.push(new_route.clone()),
        }
    }
    for label in old_db.mpls_routes.keys() {
        if !new_db.mpls_routes.contains_key(label) {
            delta.mpls_to_delete.push(*label);
        }
    }

    delta
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use const_addrs::net;
    use fibd_utils::mpls::Label;
    use fibd_utils::southbound::{InterfaceInfo, MplsAction};

    use super::*;

    fn nexthop(ifname: &str, ifindex: u32, addr: &str) -> Nexthop {
        Nexthop {
            ifindex: Some(ifindex),
            addr: Some(addr.parse().unwrap()),
            ifname: Some(ifname.to_owned()),
            ..Default::default()
        }
    }

    fn route_db(
        node_name: &str,
        routes: impl IntoIterator<Item = UnicastRoute>,
    ) -> RouteDatabase {
        let mut db = RouteDatabase::new(node_name.to_owned());
        db.unicast_routes = routes
            .into_iter()
            .map(|route| (route.dest, route))
            .collect();
        db
    }

    fn iface_db(
        entries: impl IntoIterator<Item = (&'static str, bool)>,
    ) -> InterfaceDatabase {
        InterfaceDatabase {
            node_name: "node-1".to_owned(),
            interfaces: entries
                .into_iter()
                .enumerate()
                .map(|(idx, (ifname, is_up))| {
                    (
                        ifname.to_owned(),
                        InterfaceInfo {
                            is_up,
                            ifindex: idx as u32 + 1,
                        },
                    )
                })
                .collect::<BTreeMap<_, _>>(),
            perf_events: None,
        }
    }

    #[test]
    fn delta_add_update_delete() {
        let mut rib = Rib::new("node-1");

        // First publication installs the route.
        let route_a = UnicastRoute::new(
            net!("10.0.0.0/24"),
            [nexthop("eth0", 1, "10.1.0.1")].into(),
        );
        let delta = rib.process_route_db(route_db("node-1", [route_a.clone()]));
        assert_eq!(delta.unicast_to_update, vec![route_a.clone()]);
        assert!(delta.unicast_to_delete.is_empty());

        // Same publication again is a no-op.
        let delta = rib.process_route_db(route_db("node-1", [route_a.clone()]));
        assert!(delta.is_empty());

        // Changed next hop set triggers an update.
        let route_a2 = UnicastRoute::new(
            net!("10.0.0.0/24"),
            [nexthop("eth1", 2, "10.2.0.1")].into(),
        );
        let delta =
            rib.process_route_db(route_db("node-1", [route_a2.clone()]));
        assert_eq!(delta.unicast_to_update, vec![route_a2]);

        // Withdrawn prefix triggers a delete.
        let delta = rib.process_route_db(route_db("node-1", []));
        assert_eq!(delta.unicast_to_delete, vec![net!("10.0.0.0/24")]);
        assert!(rib.route_db().unicast_routes.is_empty());
    }

    #[test]
    fn delta_ignores_weight_demoted_paths() {
        let mut rib = Rib::new("node-1");

        let mut primary = nexthop("eth0", 1, "10.1.0.1");
        primary.weight = 10;
        let backup = nexthop("eth1", 2, "10.2.0.1");

        let route = UnicastRoute::new(
            net!("10.0.0.0/24"),
            [primary.clone(), backup].into(),
        );
        rib.process_route_db(route_db("node-1", [route]));

        // Dropping the demoted backup path leaves the best set unchanged,
        // so the data plane must not be touched.
        let route = UnicastRoute::new(net!("10.0.0.0/24"), [primary].into());
        let delta = rib.process_route_db(route_db("node-1", [route]));
        assert!(delta.is_empty());
    }

    #[test]
    fn do_not_install_routes_are_shadowed() {
        let mut rib = Rib::new("node-1");

        let mut shadow = UnicastRoute::new(
            net!("192.168.0.0/16"),
            [nexthop("eth0", 1, "10.1.0.1")].into(),
        );
        shadow.do_not_install = true;
        let installable = UnicastRoute::new(
            net!("10.0.0.0/24"),
            [nexthop("eth0", 1, "10.1.0.1")].into(),
        );

        let delta = rib.process_route_db(route_db(
            "node-1",
            [shadow.clone(), installable.clone()],
        ));
        assert_eq!(delta.unicast_to_update, vec![installable]);
        assert!(!rib
            .route_db()
            .unicast_routes
            .contains_key(&net!("192.168.0.0/16")));
        assert!(rib
            .do_not_install_db()
            .unicast_routes
            .contains_key(&net!("192.168.0.0/16")));
    }

    #[test]
    fn empty_nexthop_routes_are_dropped() {
        let mut rib = Rib::new("node-1");

        let route = UnicastRoute::new(net!("10.0.0.0/24"), Default::default());
        let delta = rib.process_route_db(route_db("node-1", [route]));
        assert!(delta.is_empty());
        assert!(rib.route_db().unicast_routes.is_empty());
    }

    #[test]
    fn prune_interface_down_keeps_remaining_nexthops() {
        let mut rib = Rib::new("node-1");
        rib.process_interface_db(&iface_db([("eth0", true), ("eth1", true)]));

        let nh1 = nexthop("eth0", 1, "10.1.0.1");
        let nh2 = nexthop("eth1", 2, "10.2.0.1");
        let route = UnicastRoute::new(
            net!("10.0.0.0/24"),
            [nh1, nh2.clone()].into(),
        );
        rib.process_route_db(route_db("node-1", [route]));

        let delta =
            rib.process_interface_db(&iface_db([("eth0", false)]));
        assert_eq!(delta.unicast_to_update.len(), 1);
        assert_eq!(
            delta.unicast_to_update[0].nexthops,
            [nh2.clone()].into()
        );
        assert!(delta.unicast_to_delete.is_empty());

        // The database reflects the pruned state.
        let route = &rib.route_db().unicast_routes[&net!("10.0.0.0/24")];
        assert_eq!(route.nexthops, [nh2].into());
    }

    #[test]
    fn prune_removes_route_with_no_valid_nexthops() {
        let mut rib = Rib::new("node-1");
        rib.process_interface_db(&iface_db([("eth0", true)]));

        let route = UnicastRoute::new(
            net!("10.0.0.0/24"),
            [nexthop("eth0", 1, "10.1.0.1")].into(),
        );
        rib.process_route_db(route_db("node-1", [route]));

        let delta = rib.process_interface_db(&iface_db([("eth0", false)]));
        assert!(delta.unicast_to_update.is_empty());
        assert_eq!(delta.unicast_to_delete, vec![net!("10.0.0.0/24")]);
        assert!(rib.route_db().unicast_routes.is_empty());
    }

    #[test]
    fn interfaces_coming_up_are_not_affected() {
        let mut rib = Rib::new("node-1");
        rib.process_interface_db(&iface_db([("eth0", false)]));

        let route = UnicastRoute::new(
            net!("10.0.0.0/24"),
            [nexthop("eth0", 1, "10.1.0.1")].into(),
        );
        rib.process_route_db(route_db("node-1", [route]));

        let delta = rib.process_interface_db(&iface_db([("eth0", true)]));
        assert!(delta.is_empty());
        assert_eq!(rib.route_db().unicast_routes.len(), 1);
    }

    #[test]
    fn prune_mpls_pop_and_lookup_is_always_valid() {
        let mut rib = Rib::new("node-1");
        rib.process_interface_db(&iface_db([("eth0", true)]));

        let pop = Nexthop {
            ifindex: Some(1),
            mpls_action: Some(MplsAction::PopAndLookup),
            ..Default::default()
        };
        let mut swap = nexthop("eth0", 2, "10.1.0.1");
        swap.mpls_action = Some(MplsAction::Swap(Label::new(2001)));

        let mut db = RouteDatabase::new("node-1".to_owned());
        db.mpls_routes.insert(
            Label::new(1001),
            MplsRoute::new(Label::new(1001), [pop.clone(), swap].into()),
        );
        rib.process_route_db(db);

        let delta = rib.process_interface_db(&iface_db([("eth0", false)]));
        assert_eq!(delta.mpls_to_update.len(), 1);
        assert_eq!(delta.mpls_to_update[0].nexthops, [pop].into());
        assert!(delta.mpls_to_delete.is_empty());
    }

    #[test]
    fn best_nexthops_selects_max_weight_subset() {
        let mut nh1 = nexthop("eth0", 1, "10.1.0.1");
        nh1.weight = 5;
        let mut nh2 = nexthop("eth1", 2, "10.2.0.1");
        nh2.weight = 5;
        let nh3 = nexthop("eth2", 3, "10.3.0.1");

        let nexthops = [nh1.clone(), nh2.clone(), nh3].into();
        assert_eq!(best_nexthops(&nexthops), [nh1, nh2].into());
        assert!(best_nexthops(&Default::default()).is_empty());
    }

    #[test]
    fn mpls_delta_keyed_by_top_label() {
        let mut rib = Rib::new("node-1");

        let mut swap = nexthop("eth0", 1, "10.1.0.1");
        swap.mpls_action = Some(MplsAction::Swap(Label::new(2001)));
        let route = MplsRoute::new(Label::new(1001), [swap].into());

        let mut db = RouteDatabase::new("node-1".to_owned());
        db.mpls_routes.insert(Label::new(1001), route.clone());
        let delta = rib.process_route_db(db);
        assert_eq!(delta.mpls_to_update, vec![route]);

        let delta = rib.process_route_db(RouteDatabase::new("node-1".to_owned()));
        assert_eq!(delta.mpls_to_delete, vec![Label::new(1001)]);
    }
}
