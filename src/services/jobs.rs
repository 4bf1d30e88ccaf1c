use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use uuid::Uuid;

use crate::models::job::{Job, JobResult, JobStatus};
use crate::models::request::GenerationRequest;

/// In-memory job table. Jobs live until pruned or the process exits.
///
/// Every mutation goes through [`JobStatus::can_transition_to`], so a job's
/// status never regresses and terminal jobs are never rewritten.
#[derive(Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<String, Job>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new job in `QUEUED`.
    pub fn create(&self, request: GenerationRequest) -> Job {
        self.insert(Some(request), JobStatus::Queued, None)
    }

    /// Insert a job that was rejected at submission. It never enters `RUNNING`.
    pub fn create_rejected(&self, error: &str) -> Job {
        self.insert(None, JobStatus::Failed, Some(error.to_string()))
    }

    fn insert(&self, request: Option<GenerationRequest>, status: JobStatus, error: Option<String>) -> Job {
        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4().to_string(),
            request,
            status,
            result: None,
            error,
            created_at: now,
            updated_at: now,
        };
        self.write().insert(job.id.clone(), job.clone());
        job
    }

    /// Get a job by ID
    pub fn get(&self, id: &str) -> Option<Job> {
        self.read().get(id).cloned()
    }

    pub fn mark_running(&self, id: &str) -> Result<(), JobError> {
        self.transition(id, JobStatus::Running, None, None)
    }

    /// Attach the delivered result and move to `COMPLETED`.
    pub fn complete(&self, id: &str, result: JobResult) -> Result<(), JobError> {
        self.transition(id, JobStatus::Completed, Some(result), None)
    }

    /// Attach the error text and move to `FAILED`.
    pub fn fail(&self, id: &str, error: &str) -> Result<(), JobError> {
        self.transition(id, JobStatus::Failed, None, Some(error.to_string()))
    }

    fn transition(
        &self,
        id: &str,
        next: JobStatus,
        result: Option<JobResult>,
        error: Option<String>,
    ) -> Result<(), JobError> {
        let mut jobs = self.write();
        let job = jobs.get_mut(id).ok_or_else(|| JobError::NotFound(id.to_string()))?;

        if !job.status.can_transition_to(next) {
            return Err(JobError::InvalidTransition {
                id: id.to_string(),
                from: job.status,
                to: next,
            });
        }

        job.status = next;
        job.result = result;
        job.error = error;
        job.updated_at = Utc::now();
        Ok(())
    }

    /// Number of jobs in each status.
    pub fn status_counts(&self) -> HashMap<JobStatus, usize> {
        let mut counts = HashMap::new();
        for job in self.read().values() {
            *counts.entry(job.status).or_insert(0) += 1;
        }
        counts
    }

    /// Drop finished jobs last updated more than `retention` ago.
    pub fn prune_finished(&self, retention: Duration) -> usize {
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return 0;
        };
        let cutoff = Utc::now() - retention;

        let mut jobs = self.write();
        let before = jobs.len();
        jobs.retain(|_, job| !(job.status.is_terminal() && job.updated_at <= cutoff));
        before - jobs.len()
    }

    // A panic while holding the lock leaves the map itself consistent, so
    // poisoning is ignored.
    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Job>> {
        self.jobs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Job>> {
        self.jobs.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Count of jobs currently executing, shared with the idle watchdog.
#[derive(Debug, Clone, Default)]
pub struct JobActivity {
    running: Arc<AtomicUsize>,
}

impl JobActivity {
    /// Mark a job as running until the returned guard is dropped.
    pub fn begin(&self) -> ActivityGuard {
        self.running.fetch_add(1, Ordering::SeqCst);
        ActivityGuard {
            running: Arc::clone(&self.running),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.running.load(Ordering::SeqCst) > 0
    }
}

/// Decrements the running-job count when dropped.
#[derive(Debug)]
pub struct ActivityGuard {
    running: Arc<AtomicUsize>,
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job {0} not found")]
    NotFound(String),

    #[error("Job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: JobStatus,
        to: JobStatus,
    },
}
