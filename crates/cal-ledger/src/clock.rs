use std::fmt;
use std::sync::{Arc, Mutex};

use cal_types::temporal::wall_clock_ms;
use cal_types::Timestamp;

use crate::error::{LedgerError, LedgerResult};

/// Source of wall-clock milliseconds.
pub type WallClock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Hybrid logical clock issuing page timestamps.
///
/// - **Tick**: `physical = max(wall, last.physical)`. If physical advanced,
///   `logical = 0`; otherwise `logical += 1`.
/// - **Observe**: raise `last` to a timestamp seen elsewhere (the stored
///   head on open), so the next tick is strictly greater than it.
///
/// Every issued timestamp is strictly greater than every earlier one, even
/// if the wall clock steps backwards.
pub struct LedgerClock {
    wall: WallClock,
    last: Mutex<Timestamp>,
}

impl LedgerClock {
    /// A clock reading the system time.
    pub fn new() -> Self {
        Self::with_wall(Arc::new(wall_clock_ms))
    }

    /// A clock reading milliseconds from `wall`.
    pub fn with_wall(wall: WallClock) -> Self {
        Self {
            wall,
            last: Mutex::new(Timestamp::zero()),
        }
    }

    /// Issue the next timestamp.
    pub fn tick(&self) -> LedgerResult<Timestamp> {
        let wall = (self.wall)();
        let mut last = self.lock()?;
        let next = if wall > last.physical_ms {
            Timestamp::new(wall, 0)
        } else if last.logical == u32::MAX {
            Timestamp::new(last.physical_ms + 1, 0)
        } else {
            Timestamp::new(last.physical_ms, last.logical + 1)
        };
        *last = next;
        Ok(next)
    }

    /// Issue the next timestamp, strictly after `floor` as well.
    pub fn tick_after(&self, floor: Timestamp) -> LedgerResult<Timestamp> {
        self.observe(floor)?;
        self.tick()
    }

    /// Make sure later ticks come strictly after `seen`.
    pub fn observe(&self, seen: Timestamp) -> LedgerResult<()> {
        let mut last = self.lock()?;
        if seen > *last {
            *last = seen;
        }
        Ok(())
    }

    /// The most recently issued or observed timestamp.
    pub fn last(&self) -> LedgerResult<Timestamp> {
        Ok(*self.lock()?)
    }

    fn lock(&self) -> LedgerResult<std::sync::MutexGuard<'_, Timestamp>> {
        self.last
            .lock()
            .map_err(|_| LedgerError::Internal("clock lock poisoned".into()))
    }
}

impl Default for LedgerClock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LedgerClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerClock")
            .field("last", &self.last().ok())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    fn fixed(ms: u64) -> (Arc<AtomicU64>, LedgerClock) {
        let time = Arc::new(AtomicU64::new(ms));
        let source = Arc::clone(&time);
        let clock = LedgerClock::with_wall(Arc::new(move || source.load(Ordering::SeqCst)));
        (time, clock)
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = LedgerClock::new();
        let mut prev = clock.tick().unwrap();
        for _ in 0..1000 {
            let next = clock.tick().unwrap();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn same_millisecond_bumps_logical() {
        let (_, clock) = fixed(5_000);
        assert_eq!(clock.tick().unwrap(), Timestamp::new(5_000, 0));
        assert_eq!(clock.tick().unwrap(), Timestamp::new(5_000, 1));
        assert_eq!(clock.tick().unwrap(), Timestamp::new(5_000, 2));
    }

    #[test]
    fn advancing_wall_resets_logical() {
        let (time, clock) = fixed(5_000);
        clock.tick().unwrap();
        clock.tick().unwrap();
        time.store(5_001, Ordering::SeqCst);
        assert_eq!(clock.tick().unwrap(), Timestamp::new(5_001, 0));
    }

    #[test]
    fn wall_clock_going_backwards_is_absorbed() {
        let (time, clock) = fixed(9_000);
        let before = clock.tick().unwrap();
        time.store(1_000, Ordering::SeqCst);
        let after = clock.tick().unwrap();
        assert_eq!(after, Timestamp::new(9_000, 1));
        assert!(after > before);
    }

    #[test]
    fn observed_head_is_never_repeated() {
        let (_, clock) = fixed(1_000);
        clock.observe(Timestamp::new(2_000, 7)).unwrap();
        assert_eq!(clock.tick().unwrap(), Timestamp::new(2_000, 8));

        // Observing something older changes nothing.
        clock.observe(Timestamp::new(10, 0)).unwrap();
        assert_eq!(clock.last().unwrap(), Timestamp::new(2_000, 8));

        let next = clock.tick_after(Timestamp::new(3_000, 0)).unwrap();
        assert_eq!(next, Timestamp::new(3_000, 1));
    }

    #[test]
    fn logical_overflow_carries_into_physical() {
        let (_, clock) = fixed(1);
        clock.observe(Timestamp::new(50, u32::MAX)).unwrap();
        assert_eq!(clock.tick().unwrap(), Timestamp::new(51, 0));
    }
}
