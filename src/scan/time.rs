//! Clock abstraction so the ledger's day boundary and task schedules can be
//! driven deterministically in tests.

use chrono::{DateTime, NaiveDate, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

pub trait TimeProvider: Send + Sync + 'static {
    /// Current UTC time.
    fn utc_now(&self) -> DateTime<Utc>;

    /// Current Unix timestamp in seconds.
    fn now(&self) -> i64 {
        self.utc_now().timestamp()
    }

    /// Current UTC calendar day, the ledger's budget key.
    fn today(&self) -> NaiveDate {
        self.utc_now().date_naive()
    }
}

/// Real wall-clock time.
#[derive(Clone, Debug, Default)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests.
#[derive(Debug)]
pub struct ManualTimeProvider {
    timestamp: AtomicI64,
}

impl ManualTimeProvider {
    pub fn new(timestamp: i64) -> Self {
        Self {
            timestamp: AtomicI64::new(timestamp),
        }
    }

    pub fn set(&self, timestamp: i64) {
        self.timestamp.store(timestamp, Ordering::SeqCst);
    }

    pub fn advance_secs(&self, secs: i64) {
        self.timestamp.fetch_add(secs, Ordering::SeqCst);
    }
}

impl TimeProvider for ManualTimeProvider {
    fn utc_now(&self) -> DateTime<Utc> {
        let ts = self.timestamp.load(Ordering::SeqCst);
        DateTime::from_timestamp(ts, 0).unwrap_or_default()
    }

    fn now(&self) -> i64 {
        self.timestamp.load(Ordering::SeqCst)
    }
}

/// `YYYY-MM-DD` key used by the budget ledger.
pub fn budget_date(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}
