use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use super::models::{Job, JobStatus};

/// In-memory store of every submitted job, keyed by job id.
///
/// The map behind the mutex is the only shared mutable structure in the
/// engine; every read or write is a single critical section and no
/// operation blocks on I/O. Capacity is bounded only by process memory and
/// jobs are never evicted -- persistence across restarts is an explicit
/// non-goal.
#[derive(Clone)]
pub struct JobRegistry {
    jobs: Arc<Mutex<HashMap<Uuid, Job>>>,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Store a freshly created job and return its id.
    pub fn create(&self, job: Job) -> Uuid {
        let id = job.id;
        let mut jobs = self.jobs.lock().expect("job registry lock poisoned");
        jobs.insert(id, job);
        id
    }

    /// Fetch a point-in-time copy of one job.
    pub fn get(&self, id: Uuid) -> Option<Job> {
        let jobs = self.jobs.lock().expect("job registry lock poisoned");
        jobs.get(&id).cloned()
    }

    /// Snapshot of all jobs, oldest first. A consistent copy, not a live
    /// view.
    pub fn list(&self) -> Vec<Job> {
        let jobs = self.jobs.lock().expect("job registry lock poisoned");
        let mut snapshot: Vec<Job> = jobs.values().cloned().collect();
        snapshot.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        snapshot
    }

    /// Append a timestamped line to a job's log.
    pub fn append_log(&self, id: Uuid, message: &str) {
        self.with_job(id, |job| job.append_log(message));
    }

    /// Raise a job's progress fraction. Progress is monotonic while the
    /// job runs; a lower value than the current one is ignored.
    pub fn set_progress(&self, id: Uuid, progress: f64) {
        self.with_job(id, |job| {
            if progress > job.progress {
                job.progress = progress.min(1.0);
            }
        });
    }

    /// Transition a job into `Running`, stamping `started_at` exactly once.
    ///
    /// Returns false without mutating anything if the job is missing or
    /// already past `Queued` (the worker uses this as its idempotency
    /// guard against duplicate dequeues and late cancellation).
    pub fn mark_running(&self, id: Uuid) -> bool {
        self.with_job(id, |job| {
            if job.status != JobStatus::Queued {
                return false;
            }
            job.status = JobStatus::Running;
            job.started_at = Some(Utc::now());
            true
        })
        .unwrap_or(false)
    }

    /// Transition a job into a terminal state, stamping `finished_at`.
    ///
    /// Terminal states are final: a job that already completed, failed or
    /// was cancelled is left untouched and false is returned.
    pub fn mark_finished(&self, id: Uuid, status: JobStatus) -> bool {
        debug_assert!(status.is_terminal());
        self.with_job(id, |job| {
            if job.status.is_terminal() {
                return false;
            }
            job.status = status;
            job.finished_at = Some(Utc::now());
            true
        })
        .unwrap_or(false)
    }

    fn with_job<T>(&self, id: Uuid, f: impl FnOnce(&mut Job) -> T) -> Option<T> {
        let mut jobs = self.jobs.lock().expect("job registry lock poisoned");
        match jobs.get_mut(&id) {
            Some(job) => Some(f(job)),
            None => {
                warn!("Registry update for unknown job {}", id);
                None
            }
        }
    }
}
