use std::sync::Mutex;

use chrono::{DateTime, Duration, TimeZone, Utc};
use recon_scheduler::Clock;

use crate::lock;

/// [`Clock`] that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Clock at 2024-01-01T00:00:00Z. Scenario times are offsets from here.
    pub fn at_epoch() -> Self {
        Self::new(Self::epoch())
    }

    pub fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_default()
    }

    /// Absolute time `mins` minutes after [`ManualClock::epoch`].
    pub fn minutes(mins: i64) -> DateTime<Utc> {
        Self::epoch() + Duration::minutes(mins)
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *lock(&self.now) = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = lock(&self.now);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_and_set() {
        let c = ManualClock::at_epoch();
        c.advance(Duration::minutes(7));
        assert_eq!(c.now(), ManualClock::minutes(7));
        c.set(ManualClock::minutes(67));
        assert_eq!(c.now(), ManualClock::minutes(67));
    }
}
