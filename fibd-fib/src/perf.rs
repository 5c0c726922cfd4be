//
// Copyright (c) The Fibd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::VecDeque;
use std::time::Duration;

use fibd_utils::perf::{PerfDatabase, PerfEvents};
use tracing::warn;

// Number of convergence traces kept for inspection.
pub const PERF_BUFFER_SIZE: usize = 32;

// Bounded ring of recently accepted convergence traces.
#[derive(Debug)]
pub struct PerfTracker {
    traces: VecDeque<PerfEvents>,
    last_start_ts: i64,
    capacity: usize,
    max_duration: Duration,
}

// ===== impl PerfTracker =====

impl PerfTracker {
    pub fn new(capacity: usize, max_duration: Duration) -> PerfTracker {
        PerfTracker {
            traces: Default::default(),
            last_start_ts: 0,
            capacity,
            max_duration,
        }
    }

    // Appends a trace, returning its total duration when accepted.
    //
    // Traces whose first event is not strictly newer than the last accepted
    // trace are stale duplicates and are dropped, as are traces with a
    // negative or excessive total duration.
    pub fn append(&mut self, trace: PerfEvents) -> Option<Duration> {
        let start_ts = trace.start_ts()?;
        if start_ts <= self.last_start_ts {
            warn!(
                %start_ts, expected_after = %self.last_start_ts,
                "ignoring perf trace with old create timestamp"
            );
            return None;
        }

        let duration = match trace.total_duration() {
            Ok(duration) if duration <= self.max_duration => duration,
            Ok(duration) => {
                warn!(
                    duration_ms = duration.as_millis() as u64,
                    "ignoring perf trace with excessive total duration"
                );
                return None;
            }
            Err(span_ms) => {
                warn!(
                    %span_ms,
                    "ignoring perf trace with negative total duration"
                );
                return None;
            }
        };

        self.last_start_ts = start_ts;
        self.traces.push_back(trace);
        while self.traces.len() > self.capacity {
            self.traces.pop_front();
        }
        Some(duration)
    }

    pub fn dump(&self, node_name: &str) -> PerfDatabase {
        PerfDatabase {
            node_name: node_name.to_owned(),
            event_info: self.traces.iter().cloned().collect(),
        }
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use fibd_utils::perf::PerfEvent;

    use super::*;

    fn trace(ts_list: &[i64]) -> PerfEvents {
        PerfEvents {
            events: ts_list
                .iter()
                .map(|ts| {
                    PerfEvent::new("node-1".to_owned(), "EVENT".to_owned(), *ts)
                })
                .collect(),
        }
    }

    #[test]
    fn rejects_stale_and_duplicate_traces() {
        let mut tracker = PerfTracker::new(4, Duration::from_secs(3));

        assert!(tracker.append(trace(&[100, 150])).is_some());
        // Same start timestamp is a duplicate.
        assert!(tracker.append(trace(&[100, 180])).is_none());
        // Older start timestamp is stale.
        assert!(tracker.append(trace(&[50, 60])).is_none());
        // Strictly newer is accepted.
        assert!(tracker.append(trace(&[101, 160])).is_some());
        assert_eq!(tracker.dump("node-1").event_info.len(), 2);
    }

    #[test]
    fn rejects_bad_durations() {
        let mut tracker = PerfTracker::new(4, Duration::from_secs(3));

        // Negative span.
        assert!(tracker.append(trace(&[200, 100])).is_none());
        // Excessive span.
        assert!(tracker.append(trace(&[200, 10_000])).is_none());
        // Empty trace.
        assert!(tracker.append(trace(&[])).is_none());
        // Rejected traces must not advance the acceptance timestamp.
        assert_eq!(
            tracker.append(trace(&[200, 300])),
            Some(Duration::from_millis(100))
        );
    }

    #[test]
    fn ring_is_bounded() {
        let mut tracker = PerfTracker::new(2, Duration::from_secs(3));

        for ts in [100, 200, 300] {
            assert!(tracker.append(trace(&[ts, ts + 10])).is_some());
        }
        let dump = tracker.dump("node-1");
        assert_eq!(dump.event_info.len(), 2);
        assert_eq!(dump.event_info[0].start_ts(), Some(200));
    }
}
