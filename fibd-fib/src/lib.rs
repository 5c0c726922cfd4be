//
// Copyright (c) The Fibd Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod client;
pub mod error;
pub mod events;
pub mod packet;
pub mod perf;
pub mod rib;
pub mod tasks;

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use fibd_utils::backoff::ExponentialBackoff;
use fibd_utils::ibus::{FibQueryMsg, IbusReceiver, IbusSender};
use fibd_utils::perf::PerfEvents;
use fibd_utils::task::{IntervalTask, Task, TimeoutTask};
use fibd_utils::{Receiver, UnboundedReceiver, UnboundedSender};
use tokio::sync::mpsc;
use tracing::{debug_span, Instrument};

use crate::client::FibAgentClient;
use crate::perf::{PerfTracker, PERF_BUFFER_SIZE};
use crate::rib::Rib;
use crate::tasks::messages::ProtocolMsg;

// Client ID used when programming routes into the platform agent.
pub const FIB_CLIENT_ID: i32 = 786;

// Convergence traces longer than this are considered bogus and dropped.
pub const CONVERGENCE_MAX_DURATION: Duration = Duration::from_secs(3);

// Key prefix of the ordered-FIB programming-time markers.
pub const FIB_TIME_MARKER_PREFIX: &str = "fib-time:";

// FIB agent configuration, fixed at construction.
#[derive(Clone, Debug)]
pub struct Config {
    // Name of this node; publications from any other node are dropped.
    pub node_name: String,
    // Address of the platform FIB agent.
    pub agent_addr: SocketAddr,
    // Client ID presented to the platform agent.
    pub client_id: i32,
    // Log intended actions instead of programming anything.
    pub dryrun: bool,
    // Enable the periodic full-sync safety net.
    pub enable_fib_sync: bool,
    // Enable MPLS route programming.
    pub enable_segment_routing: bool,
    // Publish programming-time markers for ordered programming.
    pub enable_ordered_fib: bool,
    // Grace period at boot before the first programming attempt.
    pub cold_start_duration: Duration,
    // Platform agent connection timeout.
    pub agent_connect_timeout: Duration,
    // Platform agent request timeout.
    pub agent_proc_timeout: Duration,
    // Period of the full-sync safety net.
    pub platform_sync_interval: Duration,
    // Period of the agent keepalive.
    pub health_check_interval: Duration,
    // Period of counter submission to the monitor.
    pub monitor_interval: Duration,
    // Resync backoff window bounds.
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

// The FIB agent: owns the route database and drives the platform agent.
pub struct Master {
    // Configuration.
    pub(crate) config: Config,
    // Route database, shadow set and interface liveness.
    pub(crate) rib: Rib,
    // Platform agent RPC client.
    pub(crate) client: FibAgentClient,
    // Last programming attempt failed; a full resync is required.
    pub(crate) dirty: bool,
    // Last observed agent restart timestamp.
    pub(crate) latest_alive_since: Option<i64>,
    // Full resync backoff.
    pub(crate) backoff: ExponentialBackoff,
    // Convergence trace pending the next successful programming pass.
    pub(crate) maybe_perf_events: Option<PerfEvents>,
    // Recently accepted convergence traces.
    pub(crate) perf_tracker: PerfTracker,
    // Flat counters submitted to the monitor.
    pub(crate) counters: BTreeMap<String, i64>,
    // Timer tasks.
    pub(crate) tasks: Tasks,
    // Channel for timer messages back into the event loop.
    pub(crate) proto_tx: UnboundedSender<ProtocolMsg>,
    // Outbound bus channel (time markers, counters).
    pub(crate) ibus_tx: IbusSender,
}

#[derive(Debug, Default)]
pub(crate) struct Tasks {
    pub(crate) sync_routes: Option<TimeoutTask>,
    pub(crate) sync_fib: Option<IntervalTask>,
    pub(crate) health_check: Option<IntervalTask>,
    pub(crate) monitor: Option<IntervalTask>,
}

// ===== impl Config =====

impl Config {
    pub fn new(node_name: String, agent_addr: SocketAddr) -> Config {
        Config {
            node_name,
            agent_addr,
            client_id: FIB_CLIENT_ID,
            dryrun: false,
            enable_fib_sync: false,
            enable_segment_routing: false,
            enable_ordered_fib: false,
            cold_start_duration: Duration::from_secs(10),
            agent_connect_timeout: Duration::from_millis(500),
            agent_proc_timeout: Duration::from_secs(5),
            platform_sync_interval: Duration::from_secs(60),
            health_check_interval: Duration::from_secs(10),
            monitor_interval: Duration::from_secs(5),
            backoff_initial: Duration::from_millis(8),
            backoff_max: Duration::from_millis(4096),
        }
    }
}

// ===== impl Master =====

impl Master {
    pub fn new(
        config: Config,
        ibus_tx: IbusSender,
        proto_tx: UnboundedSender<ProtocolMsg>,
    ) -> Master {
        let rib = Rib::new(&config.node_name);
        let client = FibAgentClient::new(
            config.agent_addr,
            config.client_id,
            config.agent_connect_timeout,
            config.agent_proc_timeout,
        );
        let backoff =
            ExponentialBackoff::new(config.backoff_initial, config.backoff_max);
        Master {
            config,
            rib,
            client,
            dirty: false,
            latest_alive_since: None,
            backoff,
            maybe_perf_events: None,
            perf_tracker: PerfTracker::new(
                PERF_BUFFER_SIZE,
                CONVERGENCE_MAX_DURATION,
            ),
            counters: Default::default(),
            tasks: Default::default(),
            proto_tx,
            ibus_tx,
        }
    }

    // Arms the startup timers. The first programming attempt happens at
    // cold-start expiry, giving the decision engine time to publish an
    // initial database.
    fn init(&mut self) {
        self.tasks.sync_routes = Some(tasks::sync_routes_timeout(
            self.config.cold_start_duration,
            &self.proto_tx,
        ));
        if !self.config.dryrun {
            self.tasks.health_check = Some(tasks::health_check_interval(
                self.config.health_check_interval,
                &self.proto_tx,
            ));
        }
        if !self.config.dryrun && self.config.enable_fib_sync {
            self.tasks.sync_fib = Some(tasks::sync_fib_interval(
                self.config.platform_sync_interval,
                &self.proto_tx,
            ));
        }
        self.tasks.monitor = Some(tasks::monitor_interval(
            self.config.monitor_interval,
            &self.proto_tx,
        ));
    }

    pub(crate) fn counter_add(&mut self, name: &str, value: i64) {
        *self.counters.entry(name.to_owned()).or_default() += value;
    }

    async fn run(
        &mut self,
        mut ibus_rx: IbusReceiver,
        mut query_rx: Receiver<FibQueryMsg>,
        mut proto_rx: UnboundedReceiver<ProtocolMsg>,
    ) {
        loop {
            tokio::select! {
                msg = ibus_rx.recv() => match msg {
                    Some(msg) => {
                        events::process_ibus_msg(self, msg).await;
                    }
                    // Exit when the bus channel closes.
                    None => return,
                },
                Some(msg) = query_rx.recv() => {
                    events::process_fib_query(self, msg);
                }
                Some(msg) = proto_rx.recv() => match msg {
                    ProtocolMsg::SyncRoutesTimeout => {
                        events::process_sync_routes_timeout(self).await;
                    }
                    ProtocolMsg::SyncFibTick => {
                        events::process_sync_fib_tick(self).await;
                    }
                    ProtocolMsg::HealthCheckTick => {
                        events::process_health_check_tick(self).await;
                    }
                    ProtocolMsg::MonitorTick => {
                        events::process_monitor_tick(self);
                    }
                },
            }
        }
    }
}

// ===== global functions =====

// Starts the FIB agent event loop.
pub fn start(
    config: Config,
    ibus_tx: IbusSender,
    ibus_rx: IbusReceiver,
    query_rx: Receiver<FibQueryMsg>,
) -> Task<()> {
    Task::spawn(
        async move {
            let (proto_tx, proto_rx) = mpsc::unbounded_channel();
            let mut master = Master::new(config, ibus_tx, proto_tx);
            master.init();
            master.run(ibus_rx, query_rx, proto_rx).await;
        }
        .instrument(debug_span!("fib")),
    )
}
