//! Backoff used by readers that find a reservation still in flight.

use std::time::Duration;

const SPIN_LIMIT: u32 = 64;

/// Bounded backoff: busy-spin briefly, then park for a few nanoseconds per round.
#[derive(Debug, Default)]
pub(crate) struct Backoff {
    step: u32,
}

impl Backoff {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn snooze(&mut self) {
        if self.step < SPIN_LIMIT {
            std::hint::spin_loop();
            self.step += 1;
        } else {
            std::thread::park_timeout(Duration::from_nanos(10));
        }
    }
}
