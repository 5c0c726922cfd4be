//
// Copyright (c) The Fibd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::time::Duration;

use chrono::Utc;
use derive_new::new;
use serde::{Deserialize, Serialize};

// Single convergence trace event.
#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct PerfEvent {
    pub node_name: String,
    pub event_name: String,
    pub unix_ts_ms: i64,
}

// Ordered trace of convergence events, carried along route publications and
// appended to at well-defined phases of the programming pipeline.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct PerfEvents {
    pub events: Vec<PerfEvent>,
}

// Dump of the recently accepted traces.
#[derive(Clone, Debug, Default)]
#[derive(Deserialize, Serialize)]
pub struct PerfDatabase {
    pub node_name: String,
    pub event_info: Vec<PerfEvents>,
}

// ===== impl PerfEvents =====

impl PerfEvents {
    // Appends an event stamped with the current wall-clock time.
    pub fn push_event(&mut self, node_name: &str, event_name: &str) {
        self.events.push(PerfEvent::new(
            node_name.to_owned(),
            event_name.to_owned(),
            Utc::now().timestamp_millis(),
        ));
    }

    // Timestamp of the first event, if any.
    pub fn start_ts(&self) -> Option<i64> {
        self.events.first().map(|event| event.unix_ts_ms)
    }

    // Duration between the first and last event. Negative spans are reported
    // as an error so callers can discard the trace.
    pub fn total_duration(&self) -> Result<Duration, i64> {
        let (Some(first), Some(last)) =
            (self.events.first(), self.events.last())
        else {
            return Ok(Duration::ZERO);
        };
        let span_ms = last.unix_ts_ms - first.unix_ts_ms;
        u64::try_from(span_ms)
            .map(Duration::from_millis)
            .map_err(|_| span_ms)
    }

    // Duration between two named events, if both are present in order.
    pub fn duration_between(
        &self,
        start_event: &str,
        end_event: &str,
    ) -> Option<Duration> {
        let start = self
            .events
            .iter()
            .find(|event| event.event_name == start_event)?;
        let end = self
            .events
            .iter()
            .find(|event| event.event_name == end_event)?;
        u64::try_from(end.unix_ts_ms - start.unix_ts_ms)
            .map(Duration::from_millis)
            .ok()
    }
}

impl std::fmt::Display for PerfEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for event in &self.events {
            writeln!(
                f,
                "node: {}, event: {}, unix-ts: {}",
                event.node_name, event.event_name, event.unix_ts_ms
            )?;
        }
        Ok(())
    }
}
