use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// In-process FIFO of job IDs waiting for the worker.
#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::UnboundedSender<String>,
    depth: Arc<AtomicUsize>,
}

/// Receiving half of a [`JobQueue`], owned by the single job worker.
pub struct QueueReceiver {
    receiver: mpsc::UnboundedReceiver<String>,
    depth: Arc<AtomicUsize>,
}

impl JobQueue {
    pub fn new() -> (Self, QueueReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));
        (
            Self {
                sender,
                depth: Arc::clone(&depth),
            },
            QueueReceiver { receiver, depth },
        )
    }

    /// Enqueue a job for processing.
    pub fn enqueue(&self, job_id: &str) -> Result<(), QueueError> {
        self.depth.fetch_add(1, Ordering::SeqCst);
        self.sender.send(job_id.to_string()).map_err(|_| {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            QueueError::Closed
        })?;
        metrics::gauge!("generation_queue_depth").set(self.depth() as f64);
        Ok(())
    }

    /// Get the current queue depth (pending jobs).
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}

impl QueueReceiver {
    /// Wait for the next job ID. `None` once every queue handle is dropped.
    pub async fn next(&mut self) -> Option<String> {
        let job_id = self.receiver.recv().await?;
        let depth = self.depth.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        metrics::gauge!("generation_queue_depth").set(depth as f64);
        Some(job_id)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Job worker is not running")]
    Closed,
}
