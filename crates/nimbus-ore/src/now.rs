//! A pluggable clock, so tests can control time instead of racing the
//! wall clock. Mirrors the teacher workspace's `mz_ore::now::NowFn`.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

/// The current time in milliseconds since the Unix epoch.
pub type EpochMillis = u64;

/// A source of the current time. The default implementation reads the
/// system clock; tests substitute [`NowFn::mock`] to get deterministic,
/// manually-advanced timestamps for timeline monotonicity tests (P6).
#[derive(Clone)]
pub struct NowFn(Arc<dyn Fn() -> EpochMillis + Send + Sync>);

impl NowFn {
    pub fn real() -> NowFn {
        NowFn(Arc::new(|| {
            Utc::now().timestamp_millis().max(0) as EpochMillis
        }))
    }

    /// A clock that starts at `start` and advances only when
    /// [`MockClock::advance`] is called on the handle returned alongside it.
    pub fn mock(start: EpochMillis) -> (NowFn, MockClock) {
        let value = Arc::new(AtomicI64::new(start as i64));
        let clock = MockClock { value: value.clone() };
        let now = NowFn(Arc::new(move || value.load(Ordering::SeqCst) as EpochMillis));
        (now, clock)
    }

    pub fn call(&self) -> EpochMillis {
        (self.0)()
    }

    pub fn datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.call() as i64).unwrap_or_else(Utc::now)
    }
}

impl Default for NowFn {
    fn default() -> Self {
        NowFn::real()
    }
}

/// A handle to advance a [`NowFn::mock`] clock from test code.
#[derive(Clone)]
pub struct MockClock {
    value: Arc<AtomicI64>,
}

impl MockClock {
    pub fn advance(&self, millis: i64) {
        self.value.fetch_add(millis, Ordering::SeqCst);
    }

    pub fn set(&self, millis: EpochMillis) {
        self.value.store(millis as i64, Ordering::SeqCst);
    }
}
