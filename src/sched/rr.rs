//! Round-robin scheduler.

use super::trait_def::Scheduler;
use crate::thread::ThreadId;
use std::collections::VecDeque;

/// Strict round-robin ready queue.
///
/// Threads run in arrival order; a thread that yields or is preempted goes
/// to the tail. There are no priorities.
#[derive(Debug, Default)]
pub struct RoundRobinScheduler {
    queue: VecDeque<ThreadId>,
}

impl RoundRobinScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
        }
    }
}

impl Scheduler for RoundRobinScheduler {
    fn enqueue(&mut self, thread: ThreadId) {
        debug_assert!(!self.contains(thread), "thread {} queued twice", thread);
        self.queue.push_back(thread);
    }

    fn current(&self) -> Option<ThreadId> {
        self.queue.front().copied()
    }

    fn rotate(&mut self) -> Option<(ThreadId, ThreadId)> {
        if self.queue.len() < 2 {
            return None;
        }
        // pop then push keeps the length, so the buffer never grows here
        let previous = self.queue.pop_front()?;
        self.queue.push_back(previous);
        let next = *self.queue.front()?;
        Some((previous, next))
    }

    fn retire_current(&mut self) -> Option<ThreadId> {
        self.queue.pop_front();
        self.current()
    }

    fn remove(&mut self, thread: ThreadId) -> bool {
        match self.queue.iter().position(|&queued| queued == thread) {
            Some(0) => {
                debug_assert!(false, "remove() called on the running thread");
                false
            }
            Some(index) => self.queue.remove(index).is_some(),
            None => false,
        }
    }

    fn contains(&self, thread: ThreadId) -> bool {
        self.queue.contains(&thread)
    }

    fn threads(&self) -> Vec<ThreadId> {
        self.queue.iter().copied().collect()
    }

    fn len(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: usize) -> ThreadId {
        ThreadId::new(raw as u64)
    }

    fn queue_of(ids: &[usize]) -> RoundRobinScheduler {
        let mut scheduler = RoundRobinScheduler::with_capacity(ids.len());
        for &raw in ids {
            scheduler.enqueue(id(raw));
        }
        scheduler
    }

    #[test]
    fn test_single_thread_rotation_is_noop() {
        let mut scheduler = queue_of(&[1]);
        assert_eq!(scheduler.rotate(), None);
        assert_eq!(scheduler.current(), Some(id(1)));
    }

    #[test]
    fn test_rotation_follows_arrival_order() {
        let mut scheduler = queue_of(&[1, 2, 3]);
        let mut order = Vec::new();
        for _ in 0..6 {
            let (_, next) = scheduler.rotate().unwrap();
            order.push(next.get());
        }
        assert_eq!(order, [2, 3, 1, 2, 3, 1]);
    }

    #[test]
    fn test_rotate_reports_previous() {
        let mut scheduler = queue_of(&[4, 5]);
        assert_eq!(scheduler.rotate(), Some((id(4), id(5))));
        assert_eq!(scheduler.rotate(), Some((id(5), id(4))));
    }

    #[test]
    fn test_retire_current_hands_over_to_next() {
        let mut scheduler = queue_of(&[1, 2, 3]);
        assert_eq!(scheduler.retire_current(), Some(id(2)));
        assert_eq!(scheduler.threads(), vec![id(2), id(3)]);
        assert_eq!(scheduler.retire_current(), Some(id(3)));
        assert_eq!(scheduler.retire_current(), None);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_remove_waiting_thread() {
        let mut scheduler = queue_of(&[1, 2, 3]);
        assert!(scheduler.remove(id(2)));
        assert!(!scheduler.remove(id(2)));
        assert!(!scheduler.contains(id(2)));
        assert_eq!(scheduler.rotate(), Some((id(1), id(3))));
    }
}
