use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Mutex;
use std::time::Duration;

use scrape_types::CoreError;
use tokio::sync::Notify;
use uuid::Uuid;

use scrape_metrics::constants::{QUEUE_DEPTH, QUEUE_REJECTIONS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    job_id: Uuid,
    priority: i32,
    enqueue_seq: u64,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first; within the same priority, lower enqueue_seq
        // (older) first. `BinaryHeap` is a max-heap, so "comes out first"
        // means "compares greater".
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.enqueue_seq.cmp(&self.enqueue_seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Inner {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
}

/// A bounded in-memory priority FIFO over `(priority desc, enqueue_seq asc)`.
/// Admission control is a plain depth counter rather than the reference
/// stack's rate-limited capacity check — that caching trick exists there to
/// avoid re-querying Postgres on every insert attempt under load; a local
/// atomic counter is already O(1), so there is nothing to amortize.
pub struct JobQueue {
    inner: Mutex<Inner>,
    capacity: u64,
    depth: AtomicU64,
    item_available: Notify,
    capacity_freed: Notify,
}

impl JobQueue {
    pub fn new(capacity: u64) -> Self {
        JobQueue {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                next_seq: 0,
            }),
            capacity,
            depth: AtomicU64::new(0),
            item_available: Notify::new(),
            capacity_freed: Notify::new(),
        }
    }

    pub fn depth(&self) -> u64 {
        self.depth.load(AtomicOrdering::Relaxed)
    }

    fn is_full(&self) -> bool {
        self.depth() >= self.capacity
    }

    fn push(&self, job_id: Uuid, priority: i32) {
        let mut inner = self.inner.lock().unwrap();
        let enqueue_seq = inner.next_seq;
        inner.next_seq += 1;
        inner.heap.push(Entry {
            job_id,
            priority,
            enqueue_seq,
        });
        drop(inner);
        self.depth.fetch_add(1, AtomicOrdering::Relaxed);
        scrape_metrics::gauge(QUEUE_DEPTH, &[], self.depth() as f64);
        self.item_available.notify_one();
    }

    /// Fails immediately with `QUEUE_FULL` if the queue is at capacity.
    pub fn try_enqueue(&self, job_id: Uuid, priority: i32) -> Result<(), CoreError> {
        if self.is_full() {
            scrape_metrics::inc(QUEUE_REJECTIONS, &[], 1);
            return Err(CoreError::QueueFull(self.capacity));
        }
        self.push(job_id, priority);
        Ok(())
    }

    /// Waits for capacity to free up (or `timeout` to elapse) before
    /// enqueueing, instead of failing fast.
    pub async fn enqueue_blocking(
        &self,
        job_id: Uuid,
        priority: i32,
        timeout: Option<Duration>,
    ) -> Result<(), CoreError> {
        let deadline = timeout.map(|d| tokio::time::Instant::now() + d);

        loop {
            if !self.is_full() {
                self.push(job_id, priority);
                return Ok(());
            }

            let wait = self.capacity_freed.notified();
            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, wait).await.is_err() {
                        scrape_metrics::inc(QUEUE_REJECTIONS, &[], 1);
                        return Err(CoreError::QueueFull(self.capacity));
                    }
                }
                None => wait.await,
            }
        }
    }

    /// Blocks until an entry is available, then returns the
    /// highest-priority oldest one.
    pub async fn dequeue(&self) -> (Uuid, i32) {
        loop {
            {
                let mut inner = self.inner.lock().unwrap();
                if let Some(entry) = inner.heap.pop() {
                    drop(inner);
                    self.depth.fetch_sub(1, AtomicOrdering::Relaxed);
                    scrape_metrics::gauge(QUEUE_DEPTH, &[], self.depth() as f64);
                    self.capacity_freed.notify_one();
                    return (entry.job_id, entry.priority);
                }
            }
            self.item_available.notified().await;
        }
    }

    /// Removes `job_id` if it is still queued. Best-effort: if it has
    /// already been dequeued by a worker, the caller must cancel it there
    /// instead.
    pub fn cancel(&self, job_id: Uuid) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.heap.len();
        let remaining: Vec<Entry> = inner.heap.drain().filter(|e| e.job_id != job_id).collect();
        let removed = remaining.len() != before;
        inner.heap = BinaryHeap::from(remaining);
        drop(inner);
        if removed {
            self.depth.fetch_sub(1, AtomicOrdering::Relaxed);
            scrape_metrics::gauge(QUEUE_DEPTH, &[], self.depth() as f64);
            self.capacity_freed.notify_one();
        }
        removed
    }
}
