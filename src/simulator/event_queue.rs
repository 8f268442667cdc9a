//! Disturbance schedule and simulation clock for the simulated incubator

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::config::DisturbanceConfig;

/// A scheduled disturbance. Ordered so the heap pops the earliest one first.
#[derive(Debug, Clone)]
pub struct ScheduledDisturbance {
    pub time: f64,
    /// Insertion order, breaks ties between disturbances at the same time
    pub seq: usize,
    pub disturbance: DisturbanceConfig,
}

impl PartialEq for ScheduledDisturbance {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for ScheduledDisturbance {}
impl PartialOrd for ScheduledDisturbance {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ScheduledDisturbance {
    fn cmp(&self, other: &Self) -> Ordering {
        // reversed: BinaryHeap is a max-heap
        other
            .time
            .total_cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Default)]
pub struct DisturbanceQueue {
    queue: BinaryHeap<ScheduledDisturbance>,
    next_seq: usize,
}

impl DisturbanceQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_configs(configs: &[DisturbanceConfig]) -> Self {
        let mut queue = Self::new();
        for d in configs {
            queue.push(d.clone());
        }
        queue
    }

    pub fn push(&mut self, disturbance: DisturbanceConfig) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(ScheduledDisturbance { time: disturbance.time, seq, disturbance });
    }

    /// Removes and returns the earliest disturbance due at or before `now`.
    pub fn pop_due(&mut self, now: f64) -> Option<DisturbanceConfig> {
        if self.queue.peek()?.time <= now {
            self.queue.pop().map(|s| s.disturbance)
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Simulation clock in seconds, advanced in whole control steps
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    pub current_time: f64,
    pub steps: u64,
}

impl SimClock {
    pub fn new(start_time: f64) -> Self {
        Self { current_time: start_time, steps: 0 }
    }

    pub fn advance(&mut self, dt: f64) {
        self.current_time += dt;
        self.steps += 1;
    }
}
