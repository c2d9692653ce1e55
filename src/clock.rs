use std::sync::RwLock;

use chrono::{Local, NaiveDateTime};

use crate::model::TimePoint;

/// Source of "now" in the hotel's local time.
pub trait Clock: Send + Sync {
    fn now(&self) -> TimePoint;
}

/// Wall clock, localized once at the edge.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> TimePoint {
        TimePoint::from(Local::now().naive_local())
    }
}

/// Settable clock for tests and replays.
#[derive(Debug)]
pub struct FixedClock {
    now: RwLock<NaiveDateTime>,
}

impl FixedClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: RwLock::new(now),
        }
    }

    pub fn set(&self, now: NaiveDateTime) {
        let mut guard = self.now.write().unwrap_or_else(|e| e.into_inner());
        *guard = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> TimePoint {
        let guard = self.now.read().unwrap_or_else(|e| e.into_inner());
        TimePoint::from(*guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_can_be_moved() {
        let start: NaiveDateTime = "2024-10-24T10:00:00".parse().unwrap();
        let clock = FixedClock::new(start);
        assert_eq!(clock.now(), TimePoint::from(start));

        let later: NaiveDateTime = "2024-10-25T08:30:00".parse().unwrap();
        clock.set(later);
        assert_eq!(clock.now().date.to_string(), "2024-10-25");
    }
}
