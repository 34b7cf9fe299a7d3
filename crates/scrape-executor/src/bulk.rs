use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;

/// Per-bulk-submission shared state: a counting semaphore enforcing the
/// bulk's parallelism cap, an abort flag flipped by `stop_on_error`, and a
/// remaining-job counter so the registry can evict itself once the last
/// job in the bulk reaches a terminal state.
pub struct BulkState {
    semaphore: Semaphore,
    aborted: AtomicBool,
    remaining: AtomicUsize,
}

impl BulkState {
    fn new(parallelism: usize, job_count: usize) -> Self {
        BulkState {
            semaphore: Semaphore::new(parallelism.max(1)),
            aborted: AtomicBool::new(false),
            remaining: AtomicUsize::new(job_count),
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Relaxed)
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Relaxed);
    }

    /// Call once a bulk-tagged job reaches COMPLETED/FAILED/CANCELLED.
    /// Returns true if this was the last outstanding job.
    pub fn mark_job_done(&self) -> bool {
        self.remaining.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// Blocks until a parallelism slot is free for this bulk submission.
    pub async fn acquire(&self) -> tokio::sync::SemaphorePermit<'_> {
        self.semaphore.acquire().await.expect("bulk semaphore is never closed")
    }
}

/// Registry of in-flight bulk submissions, keyed by `bulk_id`. Workers look
/// a bulk up by the `bulk_id` tag on a dequeued job, acquire a permit before
/// executing it, and check the abort flag first.
#[derive(Default, Clone)]
pub struct BulkCoordinator {
    bulks: Arc<Mutex<HashMap<String, Arc<BulkState>>>>,
}

impl BulkCoordinator {
    pub fn new() -> Self {
        BulkCoordinator::default()
    }

    pub fn register(&self, bulk_id: String, parallelism: usize, job_count: usize) -> Arc<BulkState> {
        let state = Arc::new(BulkState::new(parallelism, job_count));
        self.bulks.lock().expect("bulk registry poisoned").insert(bulk_id, state.clone());
        state
    }

    pub fn get(&self, bulk_id: &str) -> Option<Arc<BulkState>> {
        self.bulks.lock().expect("bulk registry poisoned").get(bulk_id).cloned()
    }

    /// Bulks are small and short-lived; forgetting to ever evict them would
    /// leak a handful of bytes per completed bulk submission over the life
    /// of a long-running process, so callers drop the entry once every job
    /// in the bulk has reached a terminal state.
    pub fn remove(&self, bulk_id: &str) {
        self.bulks.lock().expect("bulk registry poisoned").remove(bulk_id);
    }
}
