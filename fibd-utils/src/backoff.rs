//
// Copyright (c) The Fibd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::time::{Duration, Instant};

// Exponential backoff tracker.
//
// The backoff window starts at `initial` on the first error, doubles on
// every subsequent error up to `maximum`, and collapses back to `initial`
// on success. `time_remaining` is measured from the last reported error.
#[derive(Debug)]
pub struct ExponentialBackoff {
    initial: Duration,
    maximum: Duration,
    current: Duration,
    last_error: Option<Instant>,
}

// ===== impl ExponentialBackoff =====

impl ExponentialBackoff {
    pub fn new(initial: Duration, maximum: Duration) -> ExponentialBackoff {
        ExponentialBackoff {
            initial,
            maximum,
            current: initial,
            last_error: None,
        }
    }

    // Resets the backoff window after a successful attempt.
    pub fn report_success(&mut self) {
        self.current = self.initial;
        self.last_error = None;
    }

    // Widens the backoff window after a failed attempt.
    pub fn report_error(&mut self) {
        self.current = match self.last_error {
            Some(_) => std::cmp::min(self.current * 2, self.maximum),
            None => self.initial,
        };
        self.last_error = Some(Instant::now());
    }

    // Returns the time remaining until the next retry is allowed.
    pub fn time_remaining(&self) -> Duration {
        match self.last_error {
            Some(last_error) => self
                .current
                .saturating_sub(Instant::now().duration_since(last_error)),
            None => Duration::ZERO,
        }
    }

    pub fn can_try_now(&self) -> bool {
        self.time_remaining() == Duration::ZERO
    }
}

// ===== unit tests =====
