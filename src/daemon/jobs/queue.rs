//! Priority queue of jobs ready to run

use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use tokio::sync::Notify;

use crate::types::{JobId, Priority};

#[derive(Debug, PartialEq, Eq)]
struct Entry {
    priority: Priority,
    seq: u64,
    id: JobId,
}

impl Ord for Entry {
    /// Higher priority first, then first-in first-out
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct Inner {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
}

/// Jobs waiting for a worker. Entries may go stale (a pending job cancelled
/// while queued); workers re-check the stored status before running.
#[derive(Default)]
pub struct JobQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, id: JobId, priority: Priority) {
        {
            let mut inner = self.inner.lock();
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.heap.push(Entry { priority, seq, id });
        }
        self.notify.notify_one();
    }

    pub fn try_pop(&self) -> Option<JobId> {
        self.inner.lock().heap.pop().map(|e| e.id)
    }

    /// Wait for the highest-priority job
    pub async fn pop(&self) -> JobId {
        loop {
            if let Some(id) = self.try_pop() {
                return id;
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    #[test]
    fn test_priority_then_fifo() {
        let q = JobQueue::new();
        let (low, med1, urgent, med2) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        q.push(low, Priority::Low);
        q.push(med1, Priority::Medium);
        q.push(urgent, Priority::Urgent);
        q.push(med2, Priority::Medium);

        assert_eq!(q.try_pop(), Some(urgent));
        assert_eq!(q.try_pop(), Some(med1));
        assert_eq!(q.try_pop(), Some(med2));
        assert_eq!(q.try_pop(), Some(low));
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let q = Arc::new(JobQueue::new());
        let id = Uuid::new_v4();
        let waiter = tokio::spawn({
            let q = q.clone();
            async move { q.pop().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.push(id, Priority::High);
        let popped = tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert_eq!(popped, id);
    }
}
