//! In-process job queue with a worker pool, capped exponential backoff and
//! an operational failure channel for abandoned jobs.

pub mod job_queue;
pub mod retry;
pub mod worker_pool;

pub use job_queue::{Job, JobQueue, QueueError, QueueMetrics};
pub use retry::{RetryPolicy, Retryable};
pub use worker_pool::{FailedJob, JobHandler, WorkerPool};
