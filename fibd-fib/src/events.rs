//
// Copyright (c) The Fibd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::time::Duration;

use fibd_utils::ibus::{FibQueryMsg, FibRequest, FibResponse, IbusMsg};
use fibd_utils::southbound::{
    InterfaceDatabase, RouteDatabase, RouteDatabaseDelta,
};
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::{rib, tasks, Master, CONVERGENCE_MAX_DURATION, FIB_TIME_MARKER_PREFIX};

// ===== bus messages =====

pub(crate) async fn process_ibus_msg(master: &mut Master, msg: IbusMsg) {
    match msg {
        IbusMsg::RouteDbUpd(route_db) => {
            process_route_db(master, route_db).await;
        }
        IbusMsg::InterfaceDbUpd(iface_db) => {
            process_interface_db(master, iface_db).await;
        }
        // Outbound-only messages.
        _ => (),
    }
}

// ===== decision publication =====

// Handles a fresh route database from the decision engine.
pub(crate) async fn process_route_db(
    master: &mut Master,
    mut new_db: RouteDatabase,
) {
    master.counter_add("fib.process_route_db", 1);
    debug!(
        unicast = new_db.unicast_routes.len(),
        mpls = new_db.mpls_routes.len(),
        "processing new routes from decision"
    );

    if new_db.node_name != master.config.node_name {
        Error::UnknownNodeName(new_db.node_name).log();
        return;
    }

    // Replace any pending perf trace: convergence is measured against the
    // new data, not the old.
    if let Some(mut perf_events) = new_db.perf_events.take() {
        perf_events.push_event(&master.config.node_name, "FIB_ROUTE_DB_RECVD");
        master.maybe_perf_events = Some(perf_events);
    }

    let delta = master.rib.process_route_db(new_db);
    update_routes(master, delta).await;
}

// ===== link monitor publication =====

// Handles an interface liveness update, pruning next hops bound to
// interfaces that went down and programming the result immediately.
pub(crate) async fn process_interface_db(
    master: &mut Master,
    mut iface_db: InterfaceDatabase,
) {
    master.counter_add("fib.process_interface_db", 1);
    debug!(
        interfaces = iface_db.interfaces.len(),
        "processing interface status update"
    );

    if iface_db.node_name != master.config.node_name {
        Error::UnknownNodeName(iface_db.node_name).log();
        return;
    }

    if let Some(mut perf_events) = iface_db.perf_events.take() {
        perf_events.push_event(&master.config.node_name, "FIB_INTF_DB_RECVD");
        master.maybe_perf_events = Some(perf_events);
    }

    let delta = master.rib.process_interface_db(&iface_db);
    update_routes(master, delta).await;
}

// ===== route programming =====

// Applies a route delta to the platform agent.
pub(crate) async fn update_routes(
    master: &mut Master,
    delta: RouteDatabaseDelta,
) {
    info!(
        unicast_update = delta.unicast_to_update.len(),
        unicast_delete = delta.unicast_to_delete.len(),
        mpls_update = delta.mpls_to_update.len(),
        mpls_delete = delta.mpls_to_delete.len(),
        "processing route add/update"
    );

    // In dryrun mode, log the intended actions and stop.
    if master.config.dryrun {
        log_delta(&delta);
        log_perf_events(master);
        return;
    }

    if master.tasks.sync_routes.is_some() {
        // The pending full sync will cover this delta.
        info!("pending full sync is scheduled, skipping delta");
        return;
    }
    if master.dirty {
        info!("previous route programming failed, enforcing full sync");
        sync_route_db_debounced(master);
        return;
    }

    if let Some(perf_events) = &mut master.maybe_perf_events {
        perf_events.push_event(&master.config.node_name, "FIB_DEBOUNCE");
    }

    match apply_delta(master, &delta).await {
        Ok(()) => {
            master.dirty = false;
            log_perf_events(master);
            debug!("done processing route add/update");
        }
        Err(error) => {
            master.counter_add("fib.agent.failure.add_del_route", 1);
            error.log();
            master.dirty = true;
            sync_route_db_debounced(master);
        }
    }
}

// The delete-then-add order guarantees a changed prefix never has two
// entries live in the agent during the in-flight window.
async fn apply_delta(
    master: &mut Master,
    delta: &RouteDatabaseDelta,
) -> Result<(), Error> {
    if !delta.unicast_to_delete.is_empty() {
        master
            .client
            .delete_unicast_routes(&delta.unicast_to_delete)
            .await?;
    }
    if !delta.unicast_to_update.is_empty() {
        let routes = delta
            .unicast_to_update
            .iter()
            .map(rib::with_best_unicast_nexthops)
            .collect::<Vec<_>>();
        master.client.add_unicast_routes(&routes).await?;
    }
    if master.config.enable_segment_routing {
        if !delta.mpls_to_delete.is_empty() {
            master
                .client
                .delete_mpls_routes(&delta.mpls_to_delete)
                .await?;
        }
        if !delta.mpls_to_update.is_empty() {
            let routes = delta
                .mpls_to_update
                .iter()
                .map(rib::with_best_mpls_nexthops)
                .collect::<Vec<_>>();
            master.client.add_mpls_routes(&routes).await?;
        }
    }
    Ok(())
}

// Pushes the full route database to the platform agent, replacing whatever
// it holds for this client. Returns whether the sync succeeded.
pub(crate) async fn sync_route_db(master: &mut Master) -> bool {
    let unicast_routes = master.rib.unicast_routes_with_best_nexthops();
    let mpls_routes = master.rib.mpls_routes_with_best_nexthops();
    info!(
        unicast = unicast_routes.len(),
        mpls = mpls_routes.len(),
        "syncing latest route database with the platform agent"
    );

    if master.config.dryrun {
        for route in &unicast_routes {
            debug!(dest = %route.dest, nexthops = route.nexthops.len(), "unicast route to sync");
        }
        for route in &mpls_routes {
            debug!(label = %route.top_label, nexthops = route.nexthops.len(), "mpls route to sync");
        }
        log_perf_events(master);
        return true;
    }

    if let Some(perf_events) = &mut master.maybe_perf_events {
        perf_events.push_event(&master.config.node_name, "FIB_DEBOUNCE");
    }
    master.counter_add("fib.sync_fib_calls", 1);

    let result = async {
        master.client.sync_fib(&unicast_routes).await?;
        if master.config.enable_segment_routing {
            master.client.sync_mpls_fib(&mpls_routes).await?;
        }
        Ok::<_, Error>(())
    }
    .await;

    match result {
        Ok(()) => {
            master.dirty = false;
            log_perf_events(master);
            info!("done syncing route database with the platform agent");
            true
        }
        Err(error) => {
            master.counter_add("fib.agent.failure.sync_fib", 1);
            error.log();
            master.dirty = true;
            false
        }
    }
}

// Schedules an immediate full sync unless one is already pending.
pub(crate) fn sync_route_db_debounced(master: &mut Master) {
    if master.tasks.sync_routes.is_none() {
        master.tasks.sync_routes = Some(tasks::sync_routes_timeout(
            Duration::ZERO,
            &master.proto_tx,
        ));
    }
}

// ===== timer events =====

pub(crate) async fn process_sync_routes_timeout(master: &mut Master) {
    master.tasks.sync_routes = None;

    if sync_route_db(master).await {
        master.backoff.report_success();
    } else {
        // Widen the backoff window and schedule the next attempt.
        master.backoff.report_error();
        let retry = master.backoff.time_remaining();
        master.tasks.sync_routes =
            Some(tasks::sync_routes_timeout(retry, &master.proto_tx));
    }
}

pub(crate) async fn process_sync_fib_tick(master: &mut Master) {
    if master.tasks.sync_routes.is_none() {
        let _ = sync_route_db(master).await;
    }
}

// Observes the agent's restart timestamp. A change means the agent lost its
// table and needs an immediate full resync.
pub(crate) async fn process_health_check_tick(master: &mut Master) {
    match master.client.alive_since().await {
        Ok(alive_since) => {
            if master.latest_alive_since != Some(alive_since) {
                warn!(
                    %alive_since,
                    "platform agent restarted, performing full route database sync"
                );
                master.dirty = true;
                master.backoff.report_success();
                sync_route_db_debounced(master);
            }
            master.latest_alive_since = Some(alive_since);
        }
        Err(error) => {
            master.counter_add("fib.agent.failure.keepalive", 1);
            error.log();
        }
    }
}

pub(crate) fn process_monitor_tick(master: &mut Master) {
    let mut counters = master.counters.clone();
    counters.insert(
        "fib.num_routes".to_owned(),
        master.rib.route_db().unicast_routes.len() as i64,
    );
    counters.insert(
        "fib.require_routedb_sync".to_owned(),
        master.tasks.sync_routes.is_some() as i64,
    );
    let _ = master.ibus_tx.send(IbusMsg::CountersUpd(counters));
}

// ===== fib requests =====

pub(crate) fn process_fib_query(master: &mut Master, msg: FibQueryMsg) {
    debug!(request = ?msg.request, "fib request received");
    let response = match msg.request {
        FibRequest::RouteDbGet => {
            FibResponse::RouteDb(master.rib.route_db().clone())
        }
        FibRequest::PerfDbGet => FibResponse::PerfDb(
            master.perf_tracker.dump(&master.config.node_name),
        ),
        FibRequest::RouteDbUninstallableGet => {
            FibResponse::RouteDb(master.rib.do_not_install_db().clone())
        }
    };
    let _ = msg.responder.send(response);
}

// ===== helper functions =====

// Records the completed convergence trace, if one is pending.
pub(crate) fn log_perf_events(master: &mut Master) {
    let Some(mut perf_events) = master.maybe_perf_events.take() else {
        return;
    };
    if perf_events.events.is_empty() {
        return;
    }
    perf_events.push_event(&master.config.node_name, "FIB_ROUTES_PROGRAMMED");

    // Export the local programming duration for ordered programming.
    if master.config.enable_ordered_fib {
        if let Some(duration) = perf_events
            .duration_between("FIB_ROUTE_DB_RECVD", "FIB_ROUTES_PROGRAMMED")
        {
            if duration <= CONVERGENCE_MAX_DURATION {
                master.counters.insert(
                    "fib.local_route_program_time_ms".to_owned(),
                    duration.as_millis() as i64,
                );
                let key = format!(
                    "{}{}",
                    FIB_TIME_MARKER_PREFIX, master.config.node_name
                );
                let _ = master.ibus_tx.send(IbusMsg::FibTimeMarker {
                    key,
                    value: duration.as_millis().to_string(),
                });
            }
        }
    }

    if let Some(duration) = master.perf_tracker.append(perf_events.clone()) {
        info!(
            duration_ms = duration.as_millis() as u64,
            "convergence performance"
        );
        debug!("{}", perf_events);
        master.counters.insert(
            "fib.convergence_time_ms".to_owned(),
            duration.as_millis() as i64,
        );
    }
}

fn log_delta(delta: &RouteDatabaseDelta) {
    for route in &delta.unicast_to_update {
        debug!(dest = %route.dest, nexthops = route.nexthops.len(), "unicast route to add/update");
        for nexthop in &route.nexthops {
            debug!("  {}", nexthop);
        }
    }
    for prefix in &delta.unicast_to_delete {
        debug!(dest = %prefix, "unicast route to delete");
    }
    for route in &delta.mpls_to_update {
        debug!(label = %route.top_label, nexthops = route.nexthops.len(), "mpls route to add/update");
        for nexthop in &route.nexthops {
            debug!("  {}", nexthop);
        }
    }
    for label in &delta.mpls_to_delete {
        debug!(%label, "mpls route to delete");
    }
}

// ===== unit tests =====
