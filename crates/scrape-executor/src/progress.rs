use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use scrape_dispatch::ProgressReporter;
use scrape_store::Store;
use tracing::debug;
use uuid::Uuid;

const MIN_WRITE_INTERVAL: Duration = Duration::from_millis(250);

/// Debounced `ProgressReporter` backing a single job's fetch: writes land in
/// the store at most every `MIN_WRITE_INTERVAL`, plus always on the final
/// `report(100, _)` call so the last update is never dropped on the floor.
pub struct StoreProgressReporter {
    store: Arc<Store>,
    job_id: Uuid,
    last_write: Mutex<Option<Instant>>,
}

impl StoreProgressReporter {
    pub fn new(store: Arc<Store>, job_id: Uuid) -> Self {
        StoreProgressReporter {
            store,
            job_id,
            last_write: Mutex::new(None),
        }
    }

    fn should_write(&self, progress: u8) -> bool {
        should_write_given(&self.last_write, progress)
    }
}

/// Debounce decision, factored out of the struct so it can be exercised
/// without a live `Store` to back a full `StoreProgressReporter`.
fn should_write_given(last_write: &Mutex<Option<Instant>>, progress: u8) -> bool {
    if progress >= 100 {
        return true;
    }
    let mut last_write = last_write.lock().expect("progress reporter mutex poisoned");
    let now = Instant::now();
    match *last_write {
        Some(last) if now.duration_since(last) < MIN_WRITE_INTERVAL => false,
        _ => {
            *last_write = Some(now);
            true
        }
    }
}

#[async_trait]
impl ProgressReporter for StoreProgressReporter {
    async fn report(&self, progress: u8, message: Option<String>) {
        if !self.should_write(progress) {
            return;
        }
        if let Err(err) = self.store.update_progress(self.job_id, progress, message).await {
            debug!(job_id = %self.job_id, %err, "dropped progress update");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_write_always_goes_through() {
        let last_write = Mutex::new(None);
        assert!(should_write_given(&last_write, 10));
    }

    #[test]
    fn rapid_successive_writes_are_debounced() {
        let last_write = Mutex::new(None);
        assert!(should_write_given(&last_write, 10));
        assert!(!should_write_given(&last_write, 20));
    }

    #[test]
    fn final_progress_always_writes_even_if_debounced() {
        let last_write = Mutex::new(None);
        assert!(should_write_given(&last_write, 10));
        assert!(should_write_given(&last_write, 100));
    }
}
