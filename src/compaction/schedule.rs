//! Wall-clock schedule for background compaction.
//!
//! A schedule names a daily time of day and a repeat interval. The next fire
//! time is today's target, pushed forward by whole intervals until it lies
//! strictly in the future. With the default `03:00:00` every 24 hours that
//! is simply "the next 3 AM".

use std::time::Duration;

use chrono::{DateTime, Local, TimeDelta, TimeZone};

/// When background compaction runs.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use ringcache::CompactionSchedule;
///
/// // Every six hours, aligned to 01:30:00 local time.
/// let schedule = CompactionSchedule {
///     hour: 1,
///     minute: 30,
///     second: 0,
///     interval: Duration::from_secs(6 * 3600),
/// };
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionSchedule {
    /// Hour of the daily anchor, `0..24`.
    pub hour: u32,
    /// Minute of the daily anchor, `0..60`.
    pub minute: u32,
    /// Second of the daily anchor, `0..60`.
    pub second: u32,
    /// Time between runs. Must be at least one second.
    pub interval: Duration,
}

impl Default for CompactionSchedule {
    fn default() -> Self {
        Self {
            hour: 3,
            minute: 0,
            second: 0,
            interval: Duration::from_secs(24 * 3600),
        }
    }
}

impl CompactionSchedule {
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.hour >= 24 {
            return Err("compaction hour must be < 24".into());
        }
        if self.minute >= 60 {
            return Err("compaction minute must be < 60".into());
        }
        if self.second >= 60 {
            return Err("compaction second must be < 60".into());
        }
        if self.interval < Duration::from_secs(1) {
            return Err("compaction interval must be >= 1s".into());
        }
        if TimeDelta::from_std(self.interval).is_err() {
            return Err("compaction interval is too large".into());
        }
        Ok(())
    }

    /// First fire time strictly after `now`, in `now`'s time zone.
    ///
    /// Returns `None` only for a schedule that fails validation.
    pub fn next_fire_after<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let interval = TimeDelta::from_std(self.interval).ok()?;
        let interval_ms = interval.num_milliseconds();
        if interval_ms < 1000 {
            return None;
        }

        let anchor = now
            .date_naive()
            .and_hms_opt(self.hour, self.minute, self.second)?;
        // A time skipped by a DST jump has no local instant; start from now.
        let mut next = now
            .timezone()
            .from_local_datetime(&anchor)
            .earliest()
            .unwrap_or_else(|| now.clone());

        if next <= *now {
            let behind_ms = now
                .clone()
                .signed_duration_since(next.clone())
                .num_milliseconds();
            let steps = behind_ms / interval_ms + 1;
            next = next + TimeDelta::milliseconds(steps.saturating_mul(interval_ms));
        }
        while next <= *now {
            next = next + interval;
        }
        Some(next)
    }

    /// Time to wait from the current local time until the next run.
    pub(crate) fn delay_from_now(&self) -> Duration {
        let now = Local::now();
        self.next_fire_after(&now)
            .and_then(|next| next.signed_duration_since(now).to_std().ok())
            .unwrap_or(self.interval)
    }
}
