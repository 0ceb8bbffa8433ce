//! Line queue shared between the serial reader and command logic.
//!
//! The reader task appends; command sessions pop, drain and clear. Nothing in
//! the queue correlates a line with the command that caused it, so callers
//! decide how many lines a command should produce and wait for that count.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

pub const DEFAULT_CAPACITY: usize = 1000;

#[derive(Clone)]
pub struct ResponseQueue {
    shared: Arc<Shared>,
}

struct Shared {
    lines: Mutex<VecDeque<String>>,
    capacity: usize,
    arrived: Notify,
}

impl ResponseQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            shared: Arc::new(Shared {
                lines: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
                capacity,
                arrived: Notify::new(),
            }),
        }
    }

    fn lines(&self) -> MutexGuard<'_, VecDeque<String>> {
        self.shared
            .lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Appends a line, returning the oldest entry if it had to be dropped.
    pub fn push(&self, line: String) -> Option<String> {
        let dropped = {
            let mut lines = self.lines();
            lines.push_back(line);
            if lines.len() > self.shared.capacity {
                lines.pop_front()
            } else {
                None
            }
        };
        self.shared.arrived.notify_waiters();
        dropped
    }

    pub fn len(&self) -> usize {
        self.lines().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines().is_empty()
    }

    pub fn pop(&self) -> Option<String> {
        self.lines().pop_front()
    }

    pub fn peek(&self) -> Option<String> {
        self.lines().front().cloned()
    }

    pub fn drain_all(&self) -> Vec<String> {
        self.lines().drain(..).collect()
    }

    pub fn clear(&self) {
        self.lines().clear();
    }

    /// Waits until at least `min_count` lines are queued.
    ///
    /// Gives up once `max_wait` rounded up to a whole number of
    /// `poll_interval`s has elapsed. Arrivals wake the waiter early; the
    /// interval only bounds how long a missed wakeup can go unnoticed.
    pub async fn await_count(
        &self,
        min_count: usize,
        max_wait: Duration,
        poll_interval: Duration,
    ) -> bool {
        let deadline = Instant::now() + wait_window(max_wait, poll_interval);

        loop {
            let notified = self.shared.arrived.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.len() >= min_count {
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }

            let recheck_at = (now + poll_interval).min(deadline);
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(recheck_at) => {}
            }
        }
    }
}

impl Default for ResponseQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// `max_wait` rounded up to a multiple of `poll_interval`.
pub fn wait_window(max_wait: Duration, poll_interval: Duration) -> Duration {
    if poll_interval.is_zero() {
        return max_wait;
    }
    let polls = max_wait.as_nanos().div_ceil(poll_interval.as_nanos());
    poll_interval.saturating_mul(u32::try_from(polls).unwrap_or(u32::MAX))
}
