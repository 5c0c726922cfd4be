//
// Copyright (c) The Fibd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::time::Duration;

use fibd_utils::task::{IntervalTask, TimeoutTask};
use fibd_utils::UnboundedSender;

use crate::tasks::messages::ProtocolMsg;

//
// FIB tasks diagram:
//
//                                +--------------+
//           decision pub (1x) -> |              |
//       link monitor pub (1x) -> |              | -> (1x) ibus_tx
//            fib request (1x) -> |    master    |
//                                |              |
//     sync_routes_timeout (1x) ->|              | -> (1x) sync_routes
//            sync_fib_tick (1x)->|              | -> (1x) sync_fib
//        health_check_tick (1x)->|              | -> (1x) health_check
//             monitor_tick (1x)->|              | -> (1x) monitor
//                                +--------------+
//

// FIB inter-task message types.
pub mod messages {
    // Timer messages (timer task -> main task).
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub enum ProtocolMsg {
        // Debounced / backoff-driven full resync timer expired.
        SyncRoutesTimeout,
        // Periodic platform sync safety net ticked.
        SyncFibTick,
        // Keepalive timer ticked.
        HealthCheckTick,
        // Counter submission timer ticked.
        MonitorTick,
    }
}

// ===== FIB tasks =====

// One-shot full resync timer.
pub(crate) fn sync_routes_timeout(
    timeout: Duration,
    sync_routes_timeoutp: &UnboundedSender<ProtocolMsg>,
) -> TimeoutTask {
    let sync_routes_timeoutp = sync_routes_timeoutp.clone();
    TimeoutTask::new(timeout, move || async move {
        let _ = sync_routes_timeoutp.send(ProtocolMsg::SyncRoutesTimeout);
    })
}

// Periodic full sync safety net.
pub(crate) fn sync_fib_interval(
    interval: Duration,
    sync_fib_tickp: &UnboundedSender<ProtocolMsg>,
) -> IntervalTask {
    let sync_fib_tickp = sync_fib_tickp.clone();
    IntervalTask::new(interval, false, move || {
        let sync_fib_tickp = sync_fib_tickp.clone();
        async move {
            let _ = sync_fib_tickp.send(ProtocolMsg::SyncFibTick);
        }
    })
}

// Periodic platform agent keepalive.
pub(crate) fn health_check_interval(
    interval: Duration,
    health_check_tickp: &UnboundedSender<ProtocolMsg>,
) -> IntervalTask {
    let health_check_tickp = health_check_tickp.clone();
    IntervalTask::new(interval, false, move || {
        let health_check_tickp = health_check_tickp.clone();
        async move {
            let _ = health_check_tickp.send(ProtocolMsg::HealthCheckTick);
        }
    })
}

// Periodic counter submission to the monitor.
pub(crate) fn monitor_interval(
    interval: Duration,
    monitor_tickp: &UnboundedSender<ProtocolMsg>,
) -> IntervalTask {
    let monitor_tickp = monitor_tickp.clone();
    IntervalTask::new(interval, false, move || {
        let monitor_tickp = monitor_tickp.clone();
        async move {
            let _ = monitor_tickp.send(ProtocolMsg::MonitorTick);
        }
    })
}
