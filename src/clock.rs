//! Wall-clock access and monotonic stamps.
//!
//! Every timestamp the client persists goes through a [`Clock`] so tests can
//! move time forward without sleeping.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

/// Source of the current time in epoch milliseconds.
pub trait Clock: Send + Sync {
  fn now_millis(&self) -> i64;
}

pub type SharedClock = Arc<dyn Clock>;

/// The real clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now_millis(&self) -> i64 {
    Utc::now().timestamp_millis()
  }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
  now: AtomicI64,
}

impl ManualClock {
  pub fn new(start_millis: i64) -> Self {
    Self {
      now: AtomicI64::new(start_millis),
    }
  }

  pub fn advance(&self, by: Duration) {
    self.now.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
  }

  pub fn set(&self, millis: i64) {
    self.now.store(millis, Ordering::SeqCst);
  }
}

impl Clock for ManualClock {
  fn now_millis(&self) -> i64 {
    self.now.load(Ordering::SeqCst)
  }
}

/// Issues strictly increasing millisecond stamps.
///
/// A stamp is the current time unless that would not exceed the previous
/// stamp, in which case it is the previous stamp plus one. Queue ordering and
/// temp-id uniqueness both rely on this.
pub struct Stamper {
  clock: SharedClock,
  last: AtomicI64,
}

impl Stamper {
  pub fn new(clock: SharedClock) -> Self {
    Self {
      clock,
      last: AtomicI64::new(i64::MIN),
    }
  }

  /// Make sure future stamps are greater than `stamp`.
  pub fn observe(&self, stamp: i64) {
    self.last.fetch_max(stamp, Ordering::SeqCst);
  }

  pub fn next(&self) -> i64 {
    let now = self.clock.now_millis();
    let mut prev = self.last.load(Ordering::SeqCst);
    loop {
      let candidate = if prev == i64::MIN { now } else { now.max(prev + 1) };
      match self
        .last
        .compare_exchange(prev, candidate, Ordering::SeqCst, Ordering::SeqCst)
      {
        Ok(_) => return candidate,
        Err(actual) => prev = actual,
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_manual_clock_advances() {
    let clock = ManualClock::new(1_000);
    clock.advance(Duration::from_millis(3_600_001));
    assert_eq!(clock.now_millis(), 3_601_001);
  }

  #[test]
  fn test_stamper_is_strictly_increasing_on_frozen_clock() {
    let clock: SharedClock = Arc::new(ManualClock::new(5_000));
    let stamper = Stamper::new(clock);

    let stamps: Vec<i64> = (0..4).map(|_| stamper.next()).collect();
    assert_eq!(stamps, vec![5_000, 5_001, 5_002, 5_003]);
  }

  #[test]
  fn test_stamper_respects_observed_stamps() {
    let clock: SharedClock = Arc::new(ManualClock::new(100));
    let stamper = Stamper::new(clock);
    stamper.observe(900);
    assert_eq!(stamper.next(), 901);
  }
}
