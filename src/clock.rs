use std::sync::Mutex;

use chrono::{DateTime, NaiveDateTime, TimeDelta, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

/// Reference zone for every date/time comparison.
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::Asia::Seoul;

/// Source of "now" in the service's reference timezone.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Tz>;

    /// Wall-clock time in the reference zone, without offset.
    fn local_now(&self) -> NaiveDateTime {
        self.now().naive_local()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    tz: Tz,
}

impl SystemClock {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEZONE)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.tz)
    }
}

/// Manually driven clock for tests and replays.
#[derive(Debug)]
pub struct FixedClock {
    tz: Tz,
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    /// Clock reading `local` wall-clock time in `tz`.
    pub fn at_local(tz: Tz, local: NaiveDateTime) -> Self {
        let now = tz
            .from_local_datetime(&local)
            .earliest()
            .unwrap_or_else(|| tz.from_utc_datetime(&local))
            .with_timezone(&Utc);
        Self {
            tz,
            now: Mutex::new(now),
        }
    }

    pub fn set_local(&self, local: NaiveDateTime) {
        let now = self
            .tz
            .from_local_datetime(&local)
            .earliest()
            .unwrap_or_else(|| self.tz.from_utc_datetime(&local))
            .with_timezone(&Utc);
        *self.lock() = now;
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.lock();
        *now += by;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DateTime<Utc>> {
        // A poisoned clock still holds a valid instant.
        self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Tz> {
        self.lock().with_timezone(&self.tz)
    }
}

/// Drop seconds and sub-second precision.
pub fn floor_to_minute(t: NaiveDateTime) -> NaiveDateTime {
    t.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(t)
}
