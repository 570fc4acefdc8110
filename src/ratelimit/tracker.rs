//! The rate tracker: admit or deny one event for an (operation, key) pair.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use super::clock::{Clock, SystemClock};
use super::key::RateKey;
use super::rules::{LimitTable, ResolvedLimit};
use super::store::{MemoryStore, RateStore};
use super::window::{duration_ms, millis_until, Admit, Decision};
use crate::error::{RateKeeperError, Result};

/// Default chance that a check also sweeps stale keys.
const DEFAULT_SWEEP_PROBABILITY: f64 = 0.01;
/// Default age after which any event is dropped by a sweep.
const DEFAULT_RETENTION: Duration = Duration::from_secs(3600);

/// Housekeeping settings for a tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerSettings {
    /// Probability, per check, of sweeping every key
    pub sweep_probability: f64,
    /// Events older than this are removed by a sweep. Sweeps always keep at
    /// least the longest operation window.
    pub retention: Duration,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            sweep_probability: DEFAULT_SWEEP_PROBABILITY,
            retention: DEFAULT_RETENTION,
        }
    }
}

/// A successful check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    /// Effective capacity of the window
    pub limit: u64,
    /// Tokens left in the window after this event
    pub remaining: u64,
    /// Time until the oldest counted event leaves the window
    pub reset_after: Duration,
}

/// Window usage for a key, as seen without recording an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub limit: u64,
    pub used: u64,
    pub remaining: u64,
    pub window: Duration,
    /// Time until the oldest counted event leaves the window
    pub reset_after: Duration,
}

/// Sliding-window rate tracker.
///
/// Thread-safe; share it behind an `Arc`. All per-key state lives in the store.
pub struct RateTracker<S: RateStore = MemoryStore> {
    table: Arc<LimitTable>,
    store: S,
    clock: Arc<dyn Clock>,
    settings: TrackerSettings,
}

impl RateTracker<MemoryStore> {
    /// Create a tracker backed by an in-process [`MemoryStore`].
    pub fn new(table: LimitTable) -> Self {
        Self::with_store(table, MemoryStore::new())
    }
}

impl Default for RateTracker<MemoryStore> {
    fn default() -> Self {
        Self::new(LimitTable::builtin())
    }
}

impl<S: RateStore> RateTracker<S> {
    /// Create a tracker over an arbitrary store.
    pub fn with_store(table: LimitTable, store: S) -> Self {
        info!(
            operations = table.operations.len(),
            roles = table.roles.len(),
            "Rate tracker initialized"
        );
        Self {
            table: Arc::new(table),
            store,
            clock: Arc::new(SystemClock),
            settings: TrackerSettings::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_settings(mut self, settings: TrackerSettings) -> Self {
        let longest = self.table.longest_window();
        if settings.retention < longest {
            warn!(
                retention_secs = settings.retention.as_secs(),
                longest_window_secs = longest.as_secs(),
                "Retention is shorter than the longest window, sweeps will keep events for the full window"
            );
        }
        self.settings = settings;
        self
    }

    pub fn table(&self) -> &LimitTable {
        &self.table
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Admit or deny one event for `key` under `operation`.
    ///
    /// Unknown operations and empty keys are configuration errors. A full window
    /// yields [`RateKeeperError::RateLimited`] with an estimated wait.
    pub async fn check(&self, operation: &str, key: &str, role: Option<&str>) -> Result<Admission> {
        let limit = self.table.resolve(operation, role)?;
        let rate_key = self.rate_key(operation, key)?;
        let now = self.clock.now_ms();

        trace!(
            key = %rate_key,
            role = role.unwrap_or(&self.table.base_role),
            limit = limit.max_events,
            "Checking rate limit"
        );

        let request = Admit::new(now, limit.window, limit.max_events, limit.tokens);
        let decision = self.store.admit(&rate_key, request).await?;

        self.maybe_sweep(now).await;

        match decision {
            Decision::Admitted {
                remaining,
                reset_after,
                ..
            } => Ok(Admission {
                limit: limit.max_events,
                remaining,
                reset_after,
            }),
            Decision::Denied { used, retry_after } => {
                debug!(
                    key = %rate_key,
                    used = used,
                    limit = limit.max_events,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Rate limit exceeded"
                );
                Err(RateKeeperError::RateLimited {
                    operation: operation.to_string(),
                    retry_after,
                })
            }
        }
    }

    /// Forget every event recorded for `key` under `operation`.
    pub async fn reset(&self, operation: &str, key: &str) -> Result<()> {
        let rate_key = RateKey::new(operation, key);
        debug!(key = %rate_key, "Resetting rate limit");
        self.store.clear(&rate_key).await
    }

    /// Report window usage for `key` without recording an event.
    pub async fn status(&self, operation: &str, key: &str, role: Option<&str>) -> Result<RateLimitStatus> {
        let limit = self.table.resolve(operation, role)?;
        let rate_key = self.rate_key(operation, key)?;
        let now = self.clock.now_ms();
        let window_ms = duration_ms(limit.window);

        let usage = self.store.peek(&rate_key, now.saturating_sub(window_ms)).await?;
        let reset_after = usage
            .oldest_ms
            .map(|oldest| millis_until(oldest.saturating_add(window_ms), now))
            .unwrap_or(Duration::ZERO);

        Ok(status_from(&limit, usage.used, reset_after))
    }

    /// Drop every event older than the retention horizon, across all keys.
    ///
    /// The horizon is never more recent than the longest operation window, so a
    /// sweep cannot drop an event that some window still counts.
    pub async fn sweep(&self) -> Result<usize> {
        let horizon = self.sweep_horizon(self.clock.now_ms());
        let removed = self.store.sweep(horizon).await?;
        debug!(removed = removed, "Swept stale rate limit keys");
        Ok(removed)
    }

    /// Number of keys currently tracked.
    pub async fn key_count(&self) -> Result<usize> {
        self.store.len().await
    }

    fn rate_key(&self, operation: &str, key: &str) -> Result<RateKey> {
        if key.is_empty() {
            return Err(RateKeeperError::Config(format!(
                "empty rate limit key for operation `{}`",
                operation
            )));
        }
        Ok(RateKey::new(operation, key))
    }

    fn sweep_horizon(&self, now: i64) -> i64 {
        let keep = self.settings.retention.max(self.table.longest_window());
        now.saturating_sub(duration_ms(keep))
    }

    fn sweep_due(&self) -> bool {
        let p = self.settings.sweep_probability;
        p > 0.0 && rand::thread_rng().gen_bool(p.min(1.0))
    }

    async fn maybe_sweep(&self, now: i64) {
        if !self.sweep_due() {
            return;
        }
        match self.store.sweep(self.sweep_horizon(now)).await {
            Ok(removed) => trace!(removed = removed, "Opportunistic sweep finished"),
            Err(e) => warn!(error = %e, "Opportunistic sweep failed"),
        }
    }
}

fn status_from(limit: &ResolvedLimit, used: u64, reset_after: Duration) -> RateLimitStatus {
    RateLimitStatus {
        limit: limit.max_events,
        used,
        remaining: limit.max_events.saturating_sub(used),
        window: limit.window,
        reset_after,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::store::ActorStore;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tokio_test::{assert_err, assert_ok};

    const START: i64 = 1_700_000_000_000;

    fn tracker_with_clock() -> (RateTracker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(START));
        let tracker = RateTracker::new(LimitTable::builtin()).with_clock(clock.clone());
        (tracker, clock)
    }

    #[tokio::test]
    async fn test_send_message_user_window() {
        let (tracker, clock) = tracker_with_clock();

        for i in 0..10 {
            let admission = tracker.check("SEND_MESSAGE", "u1", Some("user")).await.unwrap();
            assert_eq!(admission.limit, 10);
            assert_eq!(admission.remaining, 9 - i);
        }

        let err = tracker.check("SEND_MESSAGE", "u1", Some("user")).await.unwrap_err();
        assert!(err.is_rate_limited());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(60)));
        assert_eq!(
            err.to_string(),
            "Rate limit exceeded for SEND_MESSAGE. Try again in 60 seconds."
        );

        clock.advance(Duration::from_secs(61));
        assert_ok!(tracker.check("SEND_MESSAGE", "u1", Some("user")).await);
    }

    #[tokio::test]
    async fn test_send_message_admin_multiplier() {
        let (tracker, _clock) = tracker_with_clock();

        for _ in 0..1000 {
            assert_ok!(tracker.check("SEND_MESSAGE", "root", Some("admin")).await);
        }
        let err = tracker.check("SEND_MESSAGE", "root", Some("admin")).await.unwrap_err();
        assert!(err.is_rate_limited());
    }

    #[tokio::test]
    async fn test_reset_clears_rejection() {
        let (tracker, _clock) = tracker_with_clock();

        for _ in 0..5 {
            tracker.check("CREATE_POST", "u1", None).await.unwrap();
        }
        assert_err!(tracker.check("CREATE_POST", "u1", None).await);

        tracker.reset("CREATE_POST", "u1").await.unwrap();
        for role in [None, Some("guest"), Some("user"), Some("admin")] {
            tracker.reset("CREATE_POST", "u1").await.unwrap();
            assert_ok!(tracker.check("CREATE_POST", "u1", role).await);
        }
    }

    #[tokio::test]
    async fn test_reset_unknown_operation_is_harmless() {
        let (tracker, _clock) = tracker_with_clock();
        assert_ok!(tracker.reset("NOT_CONFIGURED", "u1").await);
    }

    #[tokio::test]
    async fn test_unknown_operation_is_configuration_error() {
        let (tracker, _clock) = tracker_with_clock();

        for role in [None, Some("user"), Some("admin")] {
            let err = tracker.check("LAUNCH_ROCKET", "u1", role).await.unwrap_err();
            assert!(matches!(err, RateKeeperError::UnknownOperation(_)));
            assert!(!err.is_rate_limited());
        }
        assert_eq!(tracker.key_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let (tracker, _clock) = tracker_with_clock();
        let err = tracker.check("SEND_MESSAGE", "", None).await.unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[tokio::test]
    async fn test_keys_and_operations_are_independent() {
        let (tracker, _clock) = tracker_with_clock();

        for _ in 0..5 {
            tracker.check("CREATE_POST", "u1", None).await.unwrap();
        }
        assert_err!(tracker.check("CREATE_POST", "u1", None).await);
        assert_ok!(tracker.check("CREATE_POST", "u2", None).await);
        assert_ok!(tracker.check("SEND_MESSAGE", "u1", None).await);
    }

    #[tokio::test]
    async fn test_multiplier_is_monotone() {
        let mut admitted_by_role = Vec::new();

        for role in ["guest", "user", "premium", "admin"] {
            let (tracker, _clock) = tracker_with_clock();
            let mut admitted = 0;
            for _ in 0..1500 {
                if tracker.check("CREATE_POST", "u1", Some(role)).await.is_ok() {
                    admitted += 1;
                }
            }
            admitted_by_role.push((tracker.table().multiplier(Some(role)), admitted));
        }

        for pair in admitted_by_role.windows(2) {
            let ((m1, a1), (m2, a2)) = (pair[0], pair[1]);
            assert!(m1 <= m2);
            assert!(a1 <= a2, "{:?}", admitted_by_role);
        }
        assert_eq!(admitted_by_role.last().unwrap().1, 500);
    }

    #[tokio::test]
    async fn test_accepted_calls_never_exceed_window() {
        let (tracker, clock) = tracker_with_clock();
        let mut rng = StdRng::seed_from_u64(7);
        let window_ms = 60_000;
        let mut accepted = Vec::new();

        for _ in 0..2000 {
            clock.advance(Duration::from_millis(rng.gen_range(0..400)));
            if tracker.check("SEND_MESSAGE", "u1", None).await.is_ok() {
                accepted.push(clock.now_ms());
            }
        }

        assert!(!accepted.is_empty());
        for (i, &ts) in accepted.iter().enumerate() {
            let in_window = accepted[..=i].iter().filter(|&&t| t > ts - window_ms).count();
            assert!(in_window <= 10, "{} events in window ending at {}", in_window, ts);
        }
    }

    #[tokio::test]
    async fn test_status_does_not_record() {
        let (tracker, clock) = tracker_with_clock();

        tracker.check("SEND_MESSAGE", "u1", None).await.unwrap();
        clock.advance(Duration::from_secs(20));
        tracker.check("SEND_MESSAGE", "u1", None).await.unwrap();

        let status = tracker.status("SEND_MESSAGE", "u1", None).await.unwrap();
        assert_eq!(status.limit, 10);
        assert_eq!(status.used, 2);
        assert_eq!(status.remaining, 8);
        assert_eq!(status.window, Duration::from_secs(60));
        assert_eq!(status.reset_after, Duration::from_secs(40));

        let again = tracker.status("SEND_MESSAGE", "u1", None).await.unwrap();
        assert_eq!(again.used, 2);
    }

    #[tokio::test]
    async fn test_sweep_drops_stale_keys() {
        let (tracker, clock) = tracker_with_clock();
        let tracker = tracker.with_settings(TrackerSettings {
            sweep_probability: 0.0,
            ..TrackerSettings::default()
        });

        tracker.check("SEND_MESSAGE", "idle", None).await.unwrap();
        clock.advance(Duration::from_secs(2 * 3600));
        tracker.check("SEND_MESSAGE", "active", None).await.unwrap();

        assert_eq!(tracker.key_count().await.unwrap(), 2);
        assert_eq!(tracker.sweep().await.unwrap(), 1);
        assert_eq!(tracker.key_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_opportunistic_sweep_runs_on_check() {
        let clock = Arc::new(ManualClock::new(START));
        let tracker = RateTracker::new(LimitTable::builtin())
            .with_clock(clock.clone())
            .with_settings(TrackerSettings {
                sweep_probability: 1.0,
                retention: Duration::from_secs(120),
            });

        tracker.check("SEND_MESSAGE", "idle", None).await.unwrap();
        clock.advance(Duration::from_secs(2 * 3600));
        tracker.check("SEND_MESSAGE", "active", None).await.unwrap();

        assert_eq!(tracker.key_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_short_retention_keeps_events_inside_window() {
        let clock = Arc::new(ManualClock::new(START));
        let tracker = RateTracker::new(LimitTable::builtin())
            .with_clock(clock.clone())
            .with_settings(TrackerSettings {
                sweep_probability: 1.0,
                retention: Duration::from_secs(30),
            });

        for _ in 0..10 {
            assert_ok!(tracker.check("SEND_MESSAGE", "u1", None).await);
        }
        clock.advance(Duration::from_secs(31));

        let mut admitted = 0;
        for _ in 0..10 {
            if tracker.check("SEND_MESSAGE", "u1", None).await.is_ok() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 0);

        assert_eq!(tracker.sweep().await.unwrap(), 0);
        assert_eq!(tracker.status("SEND_MESSAGE", "u1", None).await.unwrap().used, 10);
    }

    #[tokio::test]
    async fn test_tracker_over_actor_store() {
        let clock = Arc::new(ManualClock::new(START));
        let tracker = RateTracker::with_store(LimitTable::builtin(), ActorStore::spawn())
            .with_clock(clock.clone());

        for _ in 0..5 {
            assert_ok!(tracker.check("AUTH_ATTEMPT", "anonymous", Some("guest")).await);
        }
        let err = tracker.check("AUTH_ATTEMPT", "anonymous", Some("guest")).await.unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(15 * 60)));

        clock.advance(Duration::from_secs(15 * 60 + 1));
        assert_ok!(tracker.check("AUTH_ATTEMPT", "anonymous", Some("guest")).await);
    }
}
