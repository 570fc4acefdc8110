//! Sliding-window event log.
//!
//! Each log keeps the individual events accepted for one key, oldest first,
//! and only counts those newer than the start of the current window.

use std::collections::VecDeque;
use std::time::Duration;

/// A single admission request against one key's log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admit {
    /// Current time in epoch milliseconds
    pub now_ms: i64,
    /// Window length in milliseconds
    pub window_ms: i64,
    /// Tokens the window may hold
    pub capacity: u64,
    /// Tokens this event consumes
    pub cost: u64,
}

impl Admit {
    pub fn new(now_ms: i64, window: Duration, capacity: u64, cost: u64) -> Self {
        Self {
            now_ms,
            window_ms: duration_ms(window),
            capacity,
            cost,
        }
    }

    /// Events at or before this instant are outside the window.
    pub fn window_start(&self) -> i64 {
        self.now_ms.saturating_sub(self.window_ms)
    }
}

/// Outcome of an admission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The event was recorded.
    Admitted {
        used: u64,
        remaining: u64,
        /// Time until the oldest retained event leaves the window
        reset_after: Duration,
    },
    /// The window is full; nothing was recorded.
    Denied { used: u64, retry_after: Duration },
}

impl Decision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admitted { .. })
    }
}

/// Read-only view of a log within a window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub used: u64,
    /// Timestamp of the oldest event still inside the window
    pub oldest_ms: Option<i64>,
}

/// Accepted events for one key, ordered by timestamp.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: VecDeque<(i64, u64)>,
    used: u64,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every event at or before `window_start`.
    pub fn prune(&mut self, window_start: i64) {
        while let Some(&(ts, tokens)) = self.events.front() {
            if ts > window_start {
                break;
            }
            self.events.pop_front();
            self.used -= tokens;
        }
    }

    /// Prune, then record the event if it fits.
    pub fn try_admit(&mut self, req: &Admit) -> Decision {
        self.prune(req.window_start());

        if self.used.saturating_add(req.cost) > req.capacity {
            return Decision::Denied {
                used: self.used,
                retry_after: self.time_until_room(req),
            };
        }

        // Keep the log ordered even if the wall clock steps backwards
        let ts = match self.events.back() {
            Some(&(last, _)) => req.now_ms.max(last),
            None => req.now_ms,
        };
        self.events.push_back((ts, req.cost));
        self.used += req.cost;

        Decision::Admitted {
            used: self.used,
            remaining: req.capacity - self.used,
            reset_after: self.reset_after(req.now_ms, req.window_ms),
        }
    }

    /// Usage inside the window without modifying the log.
    pub fn usage(&self, window_start: i64) -> Usage {
        let mut usage = Usage::default();
        for &(ts, tokens) in self.events.iter().filter(|(ts, _)| *ts > window_start) {
            usage.used += tokens;
            usage.oldest_ms.get_or_insert(ts);
        }
        usage
    }

    /// Tokens held by the log, including any not yet pruned.
    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    fn reset_after(&self, now_ms: i64, window_ms: i64) -> Duration {
        match self.events.front() {
            Some(&(oldest, _)) => millis_until(oldest.saturating_add(window_ms), now_ms),
            None => Duration::ZERO,
        }
    }

    /// How long until enough old events expire for `req.cost` to fit.
    fn time_until_room(&self, req: &Admit) -> Duration {
        if req.cost > req.capacity {
            return Duration::from_millis(req.window_ms.max(1) as u64);
        }

        let needed = self.used + req.cost - req.capacity;
        let mut freed = 0;
        for &(ts, tokens) in &self.events {
            freed += tokens;
            if freed >= needed {
                return millis_until(ts.saturating_add(req.window_ms), req.now_ms)
                    .max(Duration::from_millis(1));
            }
        }

        Duration::from_millis(req.window_ms.max(1) as u64)
    }
}

/// Milliseconds in `duration`, saturating at `i64::MAX`.
pub fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

pub(crate) fn millis_until(deadline_ms: i64, now_ms: i64) -> Duration {
    Duration::from_millis(deadline_ms.saturating_sub(now_ms).max(0) as u64)
}
