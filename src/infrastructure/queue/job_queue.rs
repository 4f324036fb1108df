use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

/// Error type for queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue channel closed")]
    ChannelClosed,
}

/// One unit of work and how many times it has been tried
#[derive(Debug, Clone)]
pub struct Job<T> {
    pub id: u64,
    pub attempt: u32,
    pub payload: T,
}

/// Snapshot of the queue counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueMetrics {
    pub total_enqueued: u64,
    pub total_processed: u64,
    pub total_retried: u64,
    pub total_failed: u64,
    pub current_queue_size: u64,
}

#[derive(Debug, Default)]
struct Counters {
    next_id: AtomicU64,
    enqueued: AtomicU64,
    processed: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
}

/// Producer side of the queue. Cheap to clone.
#[derive(Debug)]
pub struct JobQueue<T> {
    sender: mpsc::UnboundedSender<Job<T>>,
    counters: Arc<Counters>,
}

impl<T> Clone for JobQueue<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            counters: self.counters.clone(),
        }
    }
}

impl<T: Send + 'static> JobQueue<T> {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Job<T>>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender,
                counters: Arc::new(Counters::default()),
            },
            receiver,
        )
    }

    /// Queue a new job, returning its id
    pub fn enqueue(&self, payload: T) -> Result<u64, QueueError> {
        let id = self.counters.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.sender
            .send(Job {
                id,
                attempt: 0,
                payload,
            })
            .map_err(|_| QueueError::ChannelClosed)?;
        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    /// Put a failed job back for another attempt
    pub(crate) fn requeue(&self, job: Job<T>) -> Result<(), QueueError> {
        self.sender
            .send(job)
            .map_err(|_| QueueError::ChannelClosed)?;
        self.counters.retried.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub(crate) fn mark_processed(&self) {
        self.counters.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn mark_failed(&self) {
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn metrics(&self) -> QueueMetrics {
        let enqueued = self.counters.enqueued.load(Ordering::Relaxed);
        let processed = self.counters.processed.load(Ordering::Relaxed);
        let failed = self.counters.failed.load(Ordering::Relaxed);
        QueueMetrics {
            total_enqueued: enqueued,
            total_processed: processed,
            total_retried: self.counters.retried.load(Ordering::Relaxed),
            total_failed: failed,
            current_queue_size: enqueued.saturating_sub(processed + failed),
        }
    }
}
