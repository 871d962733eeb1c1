//! Task envelope and execution options.

use std::cmp::Ordering;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct TaskOptions {
    pub priority: i32,
    pub timeout: Duration,
    pub deadline: Duration,
    pub may_block: bool,
}

impl Default for TaskOptions {
    fn default() -> Self {
        TaskOptions {
            priority: 0,
            timeout: Duration::from_millis(0),
            deadline: Duration::from_millis(0),
            may_block: false,
        }
    }
}

impl TaskOptions {
    pub fn with_priority(priority: i32) -> Self {
        TaskOptions {
            priority,
            ..Default::default()
        }
    }
}

pub(crate) struct Task {
    pub func: Box<dyn FnOnce() + Send>,
    pub priority: i32,
    pub seq: u64,
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for Task {}

/// Higher priority first; among equal priority, lower sequence number first
/// (FIFO). `BinaryHeap` pops the greatest element, so we invert the sequence
/// comparison to make the earliest-enqueued task compare as greatest.
impl Ord for Task {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Task {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Metrics {
    pub pending: usize,
    pub active: usize,
    pub timed_out: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;

    #[test]
    fn priority_then_fifo_ordering() {
        let mut heap = BinaryHeap::new();
        heap.push(Task { func: Box::new(|| {}), priority: 0, seq: 0 }); // T1
        heap.push(Task { func: Box::new(|| {}), priority: 10, seq: 1 }); // T2
        heap.push(Task { func: Box::new(|| {}), priority: 10, seq: 2 }); // T3

        let order: Vec<(i32, u64)> = std::iter::from_fn(|| heap.pop().map(|t| (t.priority, t.seq)))
            .collect();
        assert_eq!(order, vec![(10, 1), (10, 2), (0, 0)]);
    }
}
