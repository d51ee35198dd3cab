use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Idle connections plus the counters that must change together with them.
///
/// Always accessed under the pool's single mutex. Holds
/// `borrowed + idle + connecting <= max` as long as callers only add
/// capacity through [`Registry::reserve`].
#[derive(Debug)]
pub(crate) struct Registry<T> {
    idle: VecDeque<T>,
    borrowed: u64,
    connecting: u64,
    last_cleanup: Instant,
    closed: bool,
}

impl<T> Registry<T> {
    pub fn new(initial: Vec<T>) -> Self {
        Self {
            idle: initial.into(),
            borrowed: 0,
            connecting: 0,
            last_cleanup: Instant::now(),
            closed: false,
        }
    }

    pub fn idle(&self) -> u64 {
        self.idle.len() as u64
    }

    pub fn borrowed(&self) -> u64 {
        self.borrowed
    }

    pub fn connecting(&self) -> u64 {
        self.connecting
    }

    /// idle + borrowed + slots reserved for connections being opened
    pub fn live(&self) -> u64 {
        self.idle() + self.borrowed + self.connecting
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Most recently returned first, so surplus settles at the front for trimming.
    pub fn checkout(&mut self) -> Option<T> {
        let conn = self.idle.pop_back()?;
        self.borrowed += 1;
        Some(conn)
    }

    pub fn checkin(&mut self, conn: T) {
        self.idle.push_back(conn);
        self.release_borrowed();
    }

    /// A borrowed connection left circulation without coming back.
    pub fn release_borrowed(&mut self) {
        debug_assert!(self.borrowed > 0, "borrowed count underflow");
        self.borrowed = self.borrowed.saturating_sub(1);
    }

    /// Claims up to `batch` slots of spare capacity; returns how many were claimed.
    pub fn reserve(&mut self, max: u64, batch: u64) -> u64 {
        let n = max.saturating_sub(self.live()).min(batch);
        self.connecting += n;
        n
    }

    /// Settles a reservation of `slots`, adding whatever was actually opened.
    pub fn admit(&mut self, opened: Vec<T>, slots: u64) {
        debug_assert!(opened.len() as u64 <= slots);
        self.connecting = self.connecting.saturating_sub(slots);
        self.idle.extend(opened);
    }

    /// Removes idle connections above `min`, longest idle first.
    pub fn surplus(&mut self, min: u64) -> Vec<T> {
        let extra = self.idle().saturating_sub(min) as usize;
        self.idle.drain(..extra).collect()
    }

    pub fn drain(&mut self) -> Vec<T> {
        self.idle.drain(..).collect()
    }

    /// True at most once per `interval`; the caller owns the resulting trim.
    pub fn cleanup_due(&mut self, interval: Duration) -> bool {
        let now = Instant::now();
        if now.saturating_duration_since(self.last_cleanup) > interval {
            self.last_cleanup = now;
            true
        } else {
            false
        }
    }

    pub fn reset_cleanup_clock(&mut self) {
        self.last_cleanup = Instant::now();
    }

    pub fn close(&mut self) -> Vec<T> {
        self.closed = true;
        self.drain()
    }
}
