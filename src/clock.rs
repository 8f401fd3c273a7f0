//! Wall-clock helpers and the position key generator.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Hands out ordering keys for newly created lists and todos.
///
/// Keys are derived from the wall clock so that later-created items sort
/// after earlier ones, but never repeat or go backwards within one process:
/// if the clock has not advanced (or stepped back) since the last key, the
/// previous key plus one is used instead. Keys minted by other processes can
/// still collide; readers break those ties by creation time and id.
#[derive(Debug, Default)]
pub struct PositionClock {
    last: AtomicI64,
}

impl PositionClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> i64 {
        self.next_from(now_millis())
    }

    fn next_from(&self, now: i64) -> i64 {
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, candidate, Ordering::SeqCst, Ordering::Relaxed)
            {
                Ok(_) => return candidate,
                Err(actual) => prev = actual,
            }
        }
    }
}
