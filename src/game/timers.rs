//! Delayed-task queue polled by the tick loop
//!
//! Timers are never given their own task. They are pushed into a min-heap
//! keyed by fire time and drained on every move tick.

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

use crate::game::power_up::PowerUp;

/// Work to run once a timer fires
#[derive(Debug, Clone, PartialEq)]
pub enum TimerTask {
    /// End a timed power-up effect
    RevertPowerUp { grant_id: u64 },
    /// Put a power-up back into the registry
    RespawnPowerUp { power_up: PowerUp },
}

#[derive(Debug)]
struct Scheduled {
    at: Instant,
    /// Insertion order, keeps equal deadlines FIFO
    seq: u64,
    task: TimerTask,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.at.cmp(&other.at).then(self.seq.cmp(&other.seq))
    }
}

/// Min-heap of pending timers
#[derive(Debug, Default)]
pub struct TimerQueue {
    heap: Mutex<BinaryHeap<Reverse<Scheduled>>>,
    next_seq: AtomicU64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&self, at: Instant, task: TimerTask) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.heap.lock().push(Reverse(Scheduled { at, seq, task }));
    }

    /// Pop every task whose deadline is at or before `now`, earliest first
    pub fn drain_due(&self, now: Instant) -> Vec<TimerTask> {
        let mut heap = self.heap.lock();
        let mut due = Vec::new();
        while let Some(Reverse(next)) = heap.peek() {
            if next.at > now {
                break;
            }
            if let Some(Reverse(scheduled)) = heap.pop() {
                due.push(scheduled.task);
            }
        }
        due
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_drain_only_due() {
        let queue = TimerQueue::new();
        let now = Instant::now();
        queue.schedule(now + Duration::from_millis(20), TimerTask::RevertPowerUp { grant_id: 2 });
        queue.schedule(now + Duration::from_millis(10), TimerTask::RevertPowerUp { grant_id: 1 });

        assert!(queue.drain_due(now).is_empty());
        assert_eq!(
            queue.drain_due(now + Duration::from_millis(10)),
            vec![TimerTask::RevertPowerUp { grant_id: 1 }]
        );
        assert_eq!(queue.len(), 1);
        assert_eq!(
            queue.drain_due(now + Duration::from_millis(25)),
            vec![TimerTask::RevertPowerUp { grant_id: 2 }]
        );
    }

    #[test]
    fn test_equal_deadlines_fifo() {
        let queue = TimerQueue::new();
        let now = Instant::now();
        for id in 0..5 {
            queue.schedule(now, TimerTask::RevertPowerUp { grant_id: id });
        }
        let ids: Vec<u64> = queue
            .drain_due(now)
            .into_iter()
            .map(|t| match t {
                TimerTask::RevertPowerUp { grant_id } => grant_id,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }
}
