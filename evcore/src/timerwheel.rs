use std::time::{Duration, Instant};

use crate::event::Event;

/// Ten buckets of doubling width, approximating a log-bucketed timer wheel
/// without a global heap ("Priority queue").
const BUCKET_COUNT: usize = 10;
const BASE_WIDTH_MS: u64 = 5;

fn bucket_lower_bound_ms(index: usize) -> u64 {
    // index 0 -> 5ms, 1 -> 10ms, 2 -> 20ms, ... 9 -> 2560ms
    BASE_WIDTH_MS << index
}

/// Timer events bucketed by relative deadline .
///
/// `check_ready` promotes any event whose bucket's lower bound has passed
/// into the returned "ready now" vector; events within a bucket are not
/// ordered relative to each other, matching the original's approximate
/// wheel.
pub struct PriorityQueue {
    buckets: [Vec<Event>; BUCKET_COUNT],
    /// Events with a deadline further out than the widest bucket; re-bucketed
    /// as time passes.
    overflow: Vec<Event>,
    origin: Instant,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| Vec::new()),
            overflow: Vec::new(),
            origin: Instant::now(),
        }
    }

    fn bucket_for(&self, now: Instant, event: &Event) -> Option<usize> {
        let deadline = event.timeout_at?;
        let relative_ms = deadline.saturating_duration_since(now).as_millis() as u64;
        (0..BUCKET_COUNT).find(|&i| relative_ms <= bucket_lower_bound_ms(i))
    }

    /// Inserts a timed event (an immediate event — `timeout_at == None` —
    /// does not belong in the wheel; callers dispatch those directly).
    pub fn insert(&mut self, now: Instant, event: Event) {
        match self.bucket_for(now, &event) {
            Some(i) => self.buckets[i].push(event),
            None => self.overflow.push(event),
        }
    }

    /// Moves every event whose bucket's lower bound has passed into the
    /// returned vector, demoting the rest into narrower buckets as their
    /// remaining time shrinks, and promoting overflow entries that have
    /// entered range.
    pub fn check_ready(&mut self, now: Instant) -> Vec<Event> {
        let mut ready = Vec::new();

        // Walk widest-to-narrowest so a re-bucketed event lands once, not
        // repeatedly, in this same pass.
        for i in (0..BUCKET_COUNT).rev() {
            let bucket = std::mem::take(&mut self.buckets[i]);
            for event in bucket {
                if event.is_ready(now) {
                    ready.push(event);
                    continue;
                }
                match self.bucket_for(now, &event) {
                    Some(j) => self.buckets[j].push(event),
                    None => self.overflow.push(event),
                }
            }
        }

        let overflow = std::mem::take(&mut self.overflow);
        for event in overflow {
            if event.is_ready(now) {
                ready.push(event);
                continue;
            }
            match self.bucket_for(now, &event) {
                Some(j) => self.buckets[j].push(event),
                None => self.overflow.push(event),
            }
        }

        ready
    }

    /// Shortest time until something in the wheel could become ready; used
    /// by the event loop's tail to bound its wait. `None` means the wheel
    /// holds nothing with a known-finite wait (only overflow).
    pub fn next_deadline(&self) -> Option<Instant> {
        self.buckets
            .iter()
            .flatten()
            .filter_map(|e| e.timeout_at)
            .min()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(Vec::is_empty) && self.overflow.is_empty()
    }
}

impl Default for PriorityQueue {
    fn default() -> Self {
        Self::new()
    }
}
