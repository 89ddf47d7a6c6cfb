//! The reactor's cached wall-clock time.
//!
//! All time-based decisions within one loop turn use the same snapshot:
//! [`Reactor::wait`](crate::reactor::Reactor::wait) refreshes the clock
//! exactly once, immediately after the demultiplexer returns, and nothing
//! else does. This keeps "is this timer due?" and "how long may we sleep?"
//! consistent with each other.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock time with microsecond precision, in seconds since the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    pub sec: i64,
    pub usec: i64,
}

impl Timestamp {
    fn now() -> Self {
        let d = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp {
            sec: d.as_secs() as i64,
            usec: i64::from(d.subsec_micros()),
        }
    }
}

/// A shared handle to the cached time of day.
///
/// Clones observe the same snapshot; a freshly constructed clock holds the
/// accurate time of day.
#[derive(Debug, Clone)]
pub struct Clock {
    now: Rc<Cell<Timestamp>>,
}

impl Clock {
    pub fn new() -> Self {
        Clock {
            now: Rc::new(Cell::new(Timestamp::now())),
        }
    }

    /// The cached snapshot.
    pub fn now(&self) -> Timestamp {
        self.now.get()
    }

    /// The cached snapshot, truncated to whole seconds.
    pub fn now_secs(&self) -> i64 {
        self.now.get().sec
    }

    /// Refresh the snapshot from the operating system.
    pub fn update(&self) {
        self.now.set(Timestamp::now());
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_one_snapshot() {
        let a = Clock::new();
        let b = a.clone();
        let before = a.now();
        assert_eq!(before, b.now());
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(a.now(), before, "reading must not advance the clock");
        b.update();
        assert_eq!(a.now(), b.now());
    }
}
