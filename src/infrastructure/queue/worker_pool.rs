//! Workers sharing one receiver. A failed job is retried after its backoff
//! while it is transient and has attempts left; otherwise it is abandoned to
//! the failure channel.

use std::fmt::{Debug, Display};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::interval;

use super::job_queue::{Job, JobQueue};
use super::retry::{RetryPolicy, Retryable};
use crate::utils::logging;

/// Processes one job payload
#[async_trait]
pub trait JobHandler<T>: Send + Sync + 'static {
    type Error: Retryable + Display + Send;

    async fn handle(&self, payload: &T) -> Result<(), Self::Error>;

    /// Short label for logs
    fn describe(&self, _payload: &T) -> String {
        String::from("job")
    }
}

/// A job given up on, reported on the failure channel
#[derive(Debug, Clone)]
pub struct FailedJob<T> {
    pub job: Job<T>,
    pub error: String,
    /// False when the error was a business error and never retried
    pub transient: bool,
}

pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

struct Worker<T, H> {
    id: usize,
    handler: Arc<H>,
    queue: JobQueue<T>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<Job<T>>>>,
    failures: mpsc::UnboundedSender<FailedJob<T>>,
    policy: RetryPolicy,
}

impl WorkerPool {
    /// Spawn `workers` workers consuming `receiver`
    pub fn start<T, H>(
        workers: usize,
        handler: Arc<H>,
        queue: JobQueue<T>,
        receiver: mpsc::UnboundedReceiver<Job<T>>,
        policy: RetryPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<FailedJob<T>>)
    where
        T: Clone + Debug + Send + Sync + 'static,
        H: JobHandler<T>,
    {
        let (failures, failed) = mpsc::unbounded_channel();
        let (shutdown, stop) = watch::channel(false);
        let receiver = Arc::new(Mutex::new(receiver));

        logging::log_info(&format!(
            "[QUEUE] starting {} worker(s) (max attempts: {}, backoff: {}ms..{}ms)",
            workers, policy.max_attempts, policy.base_delay_ms, policy.max_delay_ms
        ));

        let handles = (0..workers.max(1))
            .map(|id| {
                let worker = Worker {
                    id,
                    handler: handler.clone(),
                    queue: queue.clone(),
                    receiver: receiver.clone(),
                    failures: failures.clone(),
                    policy,
                };
                tokio::spawn(worker.run(stop.clone()))
            })
            .collect();

        (
            Self {
                workers: handles,
                shutdown,
            },
            failed,
        )
    }

    /// Log queue counters every `every` until shutdown
    pub fn spawn_metrics_logger<T: Send + 'static>(
        &self,
        queue: JobQueue<T>,
        every: Duration,
    ) -> JoinHandle<()> {
        let mut stop = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut timer = interval(every);
            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        let stats = queue.metrics();
                        logging::log_info(&format!(
                            "[QUEUE] Enqueued: {}, Processed: {}, Retried: {}, Failed: {}, Queue Size: {}",
                            stats.total_enqueued,
                            stats.total_processed,
                            stats.total_retried,
                            stats.total_failed,
                            stats.current_queue_size
                        ));
                    }
                    _ = stop.changed() => break,
                }
            }
        })
    }

    /// Stop taking jobs and wait for in-flight ones to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for worker in self.workers {
            if let Err(e) = worker.await {
                logging::log_error(&format!("[QUEUE] worker ended abnormally: {}", e));
            }
        }
        logging::log_info("[QUEUE] all workers stopped");
    }
}

impl<T, H> Worker<T, H>
where
    T: Clone + Debug + Send + Sync + 'static,
    H: JobHandler<T>,
{
    async fn run(self, mut stop: watch::Receiver<bool>) {
        loop {
            let next = tokio::select! {
                job = async { self.receiver.lock().await.recv().await } => job,
                _ = stop.changed() => None,
            };
            let Some(job) = next else {
                break;
            };
            self.process(job).await;
        }
        logging::log_debug(&format!("[QUEUE] worker {} stopped", self.id));
    }

    async fn process(&self, mut job: Job<T>) {
        job.attempt += 1;
        let label = self.handler.describe(&job.payload);

        match self.handler.handle(&job.payload).await {
            Ok(()) => {
                self.queue.mark_processed();
                logging::log_debug(&format!(
                    "[QUEUE] worker {} finished job {} ({})",
                    self.id, job.id, label
                ));
            }
            Err(e) if e.is_transient() && self.policy.should_retry(job.attempt) => {
                let delay = self.policy.delay_for(job.attempt);
                logging::log_warning(&format!(
                    "[QUEUE] job {} ({}) failed (attempt {}/{}): {}. Retrying in {}ms",
                    job.id,
                    label,
                    job.attempt,
                    self.policy.max_attempts,
                    e,
                    delay.as_millis()
                ));

                let queue = self.queue.clone();
                let failures = self.failures.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if queue.requeue(job.clone()).is_err() {
                        queue.mark_failed();
                        let _ = failures.send(FailedJob {
                            job,
                            error: "queue closed before retry".to_string(),
                            transient: true,
                        });
                    }
                });
            }
            Err(e) => {
                let transient = e.is_transient();
                logging::log_error(&format!(
                    "[QUEUE] job {} ({}) abandoned after {} attempt(s): {}",
                    job.id, label, job.attempt, e
                ));
                self.queue.mark_failed();
                let _ = self.failures.send(FailedJob {
                    job,
                    error: e.to_string(),
                    transient,
                });
            }
        }
    }
}
