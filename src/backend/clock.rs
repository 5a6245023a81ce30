// Server clock for the in-process stores.
//
// Timestamps are stored as microseconds since the epoch. Two writes in the
// same microsecond would tie, so the clock bumps by one microsecond instead
// of ever repeating a value.

use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::sync::lock;

#[derive(Debug, Default)]
pub struct MonotonicClock {
    last_micros: Mutex<i64>,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current time, strictly later than every value returned before.
    pub fn now(&self) -> DateTime<Utc> {
        let wall = Utc::now();
        let mut last = lock(&self.last_micros);
        let micros = wall.timestamp_micros().max(*last + 1);
        *last = micros;
        DateTime::from_timestamp_micros(micros).unwrap_or(wall)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_strictly_increasing() {
        let clock = MonotonicClock::new();
        let mut previous = clock.now();
        for _ in 0..1000 {
            let next = clock.now();
            assert!(next > previous, "{next} should be after {previous}");
            previous = next;
        }
    }
}
