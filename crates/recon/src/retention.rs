use chrono::{DateTime, Duration, Utc};

use crate::record::Record;

/// Default staleness window: one day.
pub fn default_period() -> Duration {
    Duration::days(1)
}

/// `record.last_updated < now - period`. A record exactly at the cutoff is kept.
pub fn is_stale(record: &Record, now: DateTime<Utc>, period: Duration) -> bool {
    record.last_updated < now - period
}

/// How long an unseen record is kept before it is treated as removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    period: Duration,
}

impl RetentionPolicy {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Oldest permitted `last_updated` at `now`.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.period
    }

    pub fn is_stale(&self, record: &Record, now: DateTime<Utc>) -> bool {
        is_stale(record, now, self.period)
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::new(default_period())
    }
}
