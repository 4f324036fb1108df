use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::timeout;

use address_ledger::infrastructure::queue::{
    JobHandler, JobQueue, RetryPolicy, Retryable, WorkerPool,
};

#[derive(Debug, Clone)]
struct Flaky {
    name: &'static str,
    /// Transient failures before the job succeeds
    failures: u32,
    permanent: bool,
}

#[derive(Debug)]
struct FlakyError {
    transient: bool,
}

impl fmt::Display for FlakyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.transient {
            f.write_str("daemon unavailable")
        } else {
            f.write_str("insufficient funds")
        }
    }
}

impl Retryable for FlakyError {
    fn is_transient(&self) -> bool {
        self.transient
    }
}

struct Recorder {
    attempts: Mutex<HashMap<&'static str, u32>>,
    done: mpsc::UnboundedSender<&'static str>,
}

#[async_trait]
impl JobHandler<Flaky> for Recorder {
    type Error = FlakyError;

    async fn handle(&self, job: &Flaky) -> Result<(), FlakyError> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let entry = attempts.entry(job.name).or_default();
            *entry += 1;
            *entry
        };
        if job.permanent {
            return Err(FlakyError { transient: false });
        }
        if attempt <= job.failures {
            return Err(FlakyError { transient: true });
        }
        let _ = self.done.send(job.name);
        Ok(())
    }

    fn describe(&self, job: &Flaky) -> String {
        job.name.to_string()
    }
}

fn start(
    policy: RetryPolicy,
) -> (
    Arc<Recorder>,
    JobQueue<Flaky>,
    WorkerPool,
    mpsc::UnboundedReceiver<&'static str>,
    mpsc::UnboundedReceiver<address_ledger::infrastructure::queue::FailedJob<Flaky>>,
) {
    let (done, finished) = mpsc::unbounded_channel();
    let handler = Arc::new(Recorder {
        attempts: Mutex::new(HashMap::new()),
        done,
    });
    let (queue, receiver) = JobQueue::channel();
    let (pool, failed) = WorkerPool::start(2, handler.clone(), queue.clone(), receiver, policy);
    (handler, queue, pool, finished, failed)
}

#[tokio::test]
async fn transient_failures_are_retried_until_success() {
    let (handler, queue, pool, mut finished, _failed) = start(RetryPolicy::new(5, 1, 5));

    queue
        .enqueue(Flaky {
            name: "reorg",
            failures: 2,
            permanent: false,
        })
        .unwrap();

    let name = timeout(Duration::from_secs(5), finished.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(name, "reorg");
    assert_eq!(handler.attempts.lock().unwrap()["reorg"], 3);

    // Shutdown waits for the in-flight job to be counted
    pool.shutdown().await;
    let metrics = queue.metrics();
    assert_eq!(metrics.total_enqueued, 1);
    assert_eq!(metrics.total_retried, 2);
    assert_eq!(metrics.total_processed, 1);
    assert_eq!(metrics.current_queue_size, 0);
}

#[tokio::test]
async fn business_errors_are_abandoned_immediately() {
    let (handler, queue, pool, _finished, mut failed) = start(RetryPolicy::new(5, 1, 5));

    queue
        .enqueue(Flaky {
            name: "overdraft",
            failures: 0,
            permanent: true,
        })
        .unwrap();

    let failure = timeout(Duration::from_secs(5), failed.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(!failure.transient);
    assert_eq!(failure.job.attempt, 1);
    assert_eq!(failure.error, "insufficient funds");
    assert_eq!(handler.attempts.lock().unwrap()["overdraft"], 1);
    assert_eq!(queue.metrics().total_failed, 1);

    pool.shutdown().await;
}

#[tokio::test]
async fn retries_stop_at_max_attempts() {
    let (handler, queue, pool, _finished, mut failed) = start(RetryPolicy::new(3, 1, 2));

    queue
        .enqueue(Flaky {
            name: "daemon-down",
            failures: u32::MAX,
            permanent: false,
        })
        .unwrap();

    let failure = timeout(Duration::from_secs(5), failed.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(failure.transient);
    assert_eq!(failure.job.attempt, 3);
    assert_eq!(handler.attempts.lock().unwrap()["daemon-down"], 3);

    pool.shutdown().await;
}
