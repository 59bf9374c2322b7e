//! Shared priority queue drained by the worker pool.
//!
//! A mutex-guarded binary min-heap on `(priority, insertion order)` with
//! join semantics: [`JobQueue::join`] resolves once every pushed job has been
//! marked done.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::domain::PipelineJob;

struct QueuedJob {
    priority: i64,
    seq: u64,
    job: PipelineJob,
}

// Reversed so BinaryHeap pops the smallest (priority, seq) first
impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedJob {}

#[derive(Default)]
struct HeapState {
    heap: BinaryHeap<QueuedJob>,
    next_seq: u64,
}

pub struct JobQueue {
    state: Mutex<HeapState>,
    /// Jobs pushed but not yet marked done
    unfinished: watch::Sender<usize>,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    pub fn new() -> Self {
        let (unfinished, _) = watch::channel(0);
        Self {
            state: Mutex::new(HeapState::default()),
            unfinished,
        }
    }

    pub fn push(&self, priority: i64, job: PipelineJob) {
        {
            let mut state = self.state.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.heap.push(QueuedJob { priority, seq, job });
        }
        self.unfinished.send_modify(|n| *n += 1);
    }

    /// Pop the most urgent job, if any
    pub fn pop(&self) -> Option<PipelineJob> {
        self.state.lock().heap.pop().map(|q| q.job)
    }

    /// Mark one popped job as finished
    pub fn task_done(&self) {
        self.unfinished.send_modify(|n| *n = n.saturating_sub(1));
    }

    pub fn len(&self) -> usize {
        self.state.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Jobs pushed and not yet marked done
    pub fn unfinished(&self) -> usize {
        *self.unfinished.borrow()
    }

    /// Wait until every pushed job has been marked done
    pub async fn join(&self) {
        let mut rx = self.unfinished.subscribe();
        // The sender lives in `self`, so the channel cannot close here
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_priority_then_fifo() {
        let queue = JobQueue::new();
        queue.push(5, PipelineJob::new("e"));
        queue.push(1, PipelineJob::new("a"));
        queue.push(3, PipelineJob::new("c1"));
        queue.push(3, PipelineJob::new("c2"));

        let order: Vec<String> = std::iter::from_fn(|| queue.pop())
            .map(|j| j.reference)
            .collect();
        assert_eq!(order, vec!["a", "c1", "c2", "e"]);
        assert!(queue.is_empty());
        assert_eq!(queue.unfinished(), 4);
    }

    #[tokio::test]
    async fn test_join_waits_for_task_done() {
        let queue = Arc::new(JobQueue::new());
        queue.push(1, PipelineJob::new("a"));
        queue.push(2, PipelineJob::new("b"));

        let worker = {
            let queue = queue.clone();
            tokio::spawn(async move {
                while queue.pop().is_some() {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    queue.task_done();
                }
            })
        };

        tokio::time::timeout(Duration::from_secs(2), queue.join())
            .await
            .unwrap();
        assert_eq!(queue.unfinished(), 0);
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_join_on_empty_queue_returns() {
        let queue = JobQueue::new();
        tokio_test::assert_ready!(tokio_test::task::spawn(queue.join()).poll());
    }
}
