//! Active Expiry
//!
//! Lazy expiry alone leaks memory: a key that expires and is never read again
//! stays around forever. The server therefore runs an expiry cycle from a
//! repeating reactor timer.
//!
//! ## Design
//!
//! Each tick:
//! 1. Samples `samples_per_cycle` random entries of the expire index
//! 2. Deletes the sampled keys whose deadline has passed
//! 3. If more than `speedup_threshold` of the sample was expired, the index
//!    is probably full of dead keys, so it samples again (at most
//!    `max_rounds` times per tick)
//!
//! Every tick is bounded, which keeps the reactor responsive at the cost of
//! some expired keys surviving until they are sampled or read.

use crate::storage::Keyspace;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, trace};

/// Configuration for the active expiry cycle.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExpiryConfig {
    /// Interval between cycles in milliseconds (default: 100)
    pub interval_ms: u64,

    /// Entries sampled per round (default: 100)
    pub samples_per_cycle: usize,

    /// If this fraction of a round's samples were expired, run another round
    pub speedup_threshold: f64,

    /// Upper bound on rounds per tick
    pub max_rounds: usize,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            interval_ms: 100,
            samples_per_cycle: 100,
            speedup_threshold: 0.25,
            max_rounds: 16,
        }
    }
}

impl ExpiryConfig {
    /// The timer period.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

/// Runs one expiry tick. Returns the number of keys removed.
pub fn run_expire_cycle(keyspace: &mut Keyspace, config: &ExpiryConfig) -> usize {
    let samples = config.samples_per_cycle.max(1);
    let mut total = 0;

    for round in 0..config.max_rounds.max(1) {
        let expired = keyspace.active_expire_cycle(samples);
        total += expired;

        let rate = expired as f64 / samples as f64;
        if rate <= config.speedup_threshold || keyspace.expires() == 0 {
            break;
        }
        trace!(round, expired, "High expiry rate, sampling again");
    }

    if total > 0 {
        debug!(
            expired = total,
            keys_remaining = keyspace.len(),
            "Expired keys cleaned up"
        );
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Clock, Value};
    use bytes::Bytes;
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct TestClock(Rc<Cell<i64>>);

    impl Clock for TestClock {
        fn now_ms(&self) -> i64 {
            self.0.get()
        }
    }

    fn populate(ks: &mut Keyspace, count: usize, ttl_ms: i64) {
        for i in 0..count {
            let key = Bytes::from(format!("key{}", i));
            ks.set(key.clone(), Value::string("value"));
            ks.set_expire(&key, ks.now_ms() + ttl_ms);
        }
    }

    #[test]
    fn test_cycle_cleans_expired_keys() {
        let clock = TestClock::default();
        let mut ks = Keyspace::with_clock(clock.clone());
        populate(&mut ks, 10, 50);
        ks.set(Bytes::from("persistent"), Value::string("value"));

        clock.0.set(100);
        let config = ExpiryConfig::default();
        let mut removed = 0;
        while ks.expires() > 0 {
            removed += run_expire_cycle(&mut ks, &config);
        }

        assert_eq!(removed, 10);
        assert_eq!(ks.len(), 1);
        assert!(ks.exists(b"persistent"));
    }

    #[test]
    fn test_cycle_repeats_on_high_expiry_rate() {
        let clock = TestClock::default();
        let mut ks = Keyspace::with_clock(clock.clone());
        populate(&mut ks, 1000, 20);
        clock.0.set(100);

        let config = ExpiryConfig {
            samples_per_cycle: 20,
            max_rounds: 4,
            ..Default::default()
        };
        let removed = run_expire_cycle(&mut ks, &config);

        // Every sample is expired, so all rounds run but no more.
        assert!(removed > 20);
        assert!(removed <= 80);
    }

    #[test]
    fn test_cycle_is_bounded_when_nothing_expired() {
        let clock = TestClock::default();
        let mut ks = Keyspace::with_clock(clock);
        populate(&mut ks, 100, 10_000);
        assert_eq!(run_expire_cycle(&mut ks, &ExpiryConfig::default()), 0);
        assert_eq!(ks.len(), 100);
    }

    #[test]
    fn test_interval_never_zero() {
        let config = ExpiryConfig {
            interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.interval(), Duration::from_millis(1));
    }
}
