use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const UNSET: u64 = u64::MAX;

/// Optional duration readable and writable without a lock.
///
/// Stored as whole milliseconds, rounded up. `None` is kept apart from
/// `Some(Duration::ZERO)`.
#[derive(Debug)]
pub struct AtomicDuration(AtomicU64);

impl AtomicDuration {
    pub fn new(dur: Option<Duration>) -> Self {
        AtomicDuration(AtomicU64::new(encode(dur)))
    }

    #[inline]
    pub fn get(&self) -> Option<Duration> {
        match self.0.load(Ordering::Relaxed) {
            UNSET => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    #[inline]
    pub fn store(&self, dur: Option<Duration>) {
        self.0.store(encode(dur), Ordering::Relaxed);
    }
}

fn encode(dur: Option<Duration>) -> u64 {
    match dur {
        None => UNSET,
        Some(d) => {
            let ms = d.as_nanos().div_ceil(1_000_000);
            u64::try_from(ms).unwrap_or(UNSET - 1).min(UNSET - 1)
        }
    }
}
