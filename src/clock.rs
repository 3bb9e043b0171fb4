use std::sync::RwLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;

/// Source of "now". Injected so cutoff logic is testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Wall-clock time in the operating timezone.
    fn local_now(&self, tz: Tz) -> NaiveDateTime {
        self.now().with_timezone(&tz).naive_local()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for tests and simulations.
#[derive(Debug)]
pub struct FixedClock {
    at: RwLock<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self { at: RwLock::new(at) }
    }

    /// Fixed at a wall-clock instant in `tz`.
    pub fn at_local(local: NaiveDateTime, tz: Tz) -> Self {
        let utc = local
            .and_local_timezone(tz)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| local.and_utc());
        Self::new(utc)
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.at.write().unwrap_or_else(|e| e.into_inner()) = at;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut guard = self.at.write().unwrap_or_else(|e| e.into_inner());
        *guard = *guard + by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.at.read().unwrap_or_else(|e| e.into_inner())
    }
}
