//! # Fibonacci Backoff
//!
//! Requeue delays for failed reconciliations. The sequence grows more slowly
//! than exponential backoff: 1m, 1m, 2m, 3m, 5m, 8m, then capped at 10m.
//!
//! `BackoffTable` keeps one sequence per `namespace/name` so a flapping
//! AppService does not delay retries of healthy ones.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;

/// Fibonacci backoff calculator.
///
/// Each returned delay is the sum of the previous two, starting from `min`
/// twice and never exceeding `max`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    max: Duration,
    prev: Duration,
    current: Duration,
}

impl FibonacciBackoff {
    /// Create a new backoff bounded by `min` and `max`.
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            max,
            prev: Duration::ZERO,
            current: min,
        }
    }

    /// Minute-granularity sequence used for reconciliation errors.
    #[must_use]
    pub fn reconcile_default() -> Self {
        Self::new(Duration::from_secs(60), Duration::from_secs(600))
    }

    /// Returns the current delay and advances the sequence.
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current;
        let next = self.prev + self.current;
        self.prev = self.current;
        self.current = next.min(self.max);
        result
    }
}

#[derive(Debug)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

/// Per-resource backoff bookkeeping shared by the error policy and reconciler.
#[derive(Debug, Default)]
pub struct BackoffTable {
    states: Mutex<HashMap<String, BackoffState>>,
}

impl BackoffTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failure for `key` and returns (delay, consecutive error count).
    pub fn record_failure(&self, key: &str) -> (Duration, u32) {
        match self.states.lock() {
            Ok(mut states) => {
                let state = states.entry(key.to_string()).or_insert_with(|| BackoffState {
                    backoff: FibonacciBackoff::reconcile_default(),
                    error_count: 0,
                });
                state.error_count += 1;
                (state.backoff.next_backoff(), state.error_count)
            }
            Err(e) => {
                warn!("Failed to lock backoff states: {}, using default backoff", e);
                (Duration::from_secs(60), 0)
            }
        }
    }

    /// Forgets the failure history of `key`; a later failure starts the sequence over.
    pub fn reset(&self, key: &str) {
        if let Ok(mut states) = self.states.lock() {
            states.remove(key);
        }
    }
}
