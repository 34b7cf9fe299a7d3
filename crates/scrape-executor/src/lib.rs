//! Worker pool and per-job execution protocol: dequeue, claim, fetch,
//! route to retry/terminal state, fire the callback. The part of the
//! orchestration core that actually moves jobs through their lifecycle.

mod bulk;
mod callback;
mod progress;
mod retry;
mod worker;

pub use bulk::{BulkCoordinator, BulkState};
pub use progress::StoreProgressReporter;
pub use retry::RetryPolicy;
pub use worker::WorkerPool;
