use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use tracing::{info, warn};
use uuid::Uuid;

use super::error::{SchedulerError, SchedulerResult};
use super::models::{Job, JobStatus, TargetDevice, WatermarkSpec};
use super::pool::WorkerPool;
use super::registry::JobRegistry;

/// Process-wide scheduling configuration.
///
/// Owned by the [`JobScheduler`]; read at every job creation and by the
/// pool resize logic, updated only through
/// [`JobScheduler::update_settings`].
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub max_parallel_jobs: usize,
    pub default_output_format: String,
    pub ffmpeg_binary: String,
    pub allow_gpu: bool,
}

/// Partial update to the pool configuration. Absent fields are left
/// unchanged.
#[derive(Debug, Default, Clone)]
pub struct PoolConfigUpdate {
    pub max_parallel_jobs: Option<i64>,
    pub default_output_format: Option<String>,
    pub ffmpeg_binary: Option<String>,
    pub allow_gpu: Option<bool>,
}

/// A validated job submission.
#[derive(Debug)]
pub struct JobRequest {
    /// Already-persisted input file paths, in processing order.
    pub input_files: Vec<PathBuf>,
    pub watermark: WatermarkSpec,
    /// Overrides the configured default output format when set.
    pub output_format: Option<String>,
    pub target_device: TargetDevice,
    pub metadata: HashMap<String, String>,
}

/// Single entry point of the scheduling engine.
///
/// Composes the job registry and the worker pool: accepts submissions,
/// enqueues them, answers lifecycle queries and applies live
/// reconfiguration.
pub struct JobScheduler {
    registry: JobRegistry,
    pool: WorkerPool,
    config: RwLock<PoolConfig>,
    output_dir: PathBuf,
}

impl JobScheduler {
    /// Build the scheduler and spawn the initial worker pool.
    pub fn new(config: PoolConfig, output_dir: PathBuf) -> Self {
        let registry = JobRegistry::new();
        let pool = WorkerPool::new(registry.clone());
        pool.resize(config.max_parallel_jobs);
        Self {
            registry,
            pool,
            config: RwLock::new(config),
            output_dir,
        }
    }

    /// Create a job from a submission and enqueue it.
    ///
    /// Configuration is read once here: the job captures the transcoder
    /// binary and the default output format in effect at creation time. A
    /// non-CPU target device silently falls back to CPU while GPU encoding
    /// is not permitted.
    pub fn submit(&self, request: JobRequest) -> SchedulerResult<Uuid> {
        if request.input_files.is_empty() {
            return Err(SchedulerError::SpecInvalid(
                "at least one input file is required".to_string(),
            ));
        }

        let config = self.config.read().expect("pool config lock poisoned");
        let target_device = if request.target_device != TargetDevice::Cpu && !config.allow_gpu {
            warn!(
                "GPU encoding not permitted, falling back to cpu for target {}",
                request.target_device
            );
            TargetDevice::Cpu
        } else {
            request.target_device
        };
        let output_format = request
            .output_format
            .filter(|f| !f.is_empty())
            .unwrap_or_else(|| config.default_output_format.clone());

        let mut metadata = request.metadata;
        metadata
            .entry("ffmpeg_binary".to_string())
            .or_insert_with(|| config.ffmpeg_binary.clone());
        drop(config);

        let job = Job::new(
            request.input_files,
            request.watermark,
            output_format,
            self.output_dir.clone(),
            target_device,
            metadata,
        );
        let id = self.registry.create(job);
        self.registry.append_log(id, "Job created and queued");
        self.pool.enqueue(id);

        info!("Submitted job {}", id);
        Ok(id)
    }

    /// Snapshot of all jobs, oldest first.
    pub fn list_jobs(&self) -> Vec<Job> {
        self.registry.list()
    }

    /// Full detail of one job.
    pub fn get_job(&self, id: Uuid) -> SchedulerResult<Job> {
        self.registry.get(id).ok_or(SchedulerError::NotFound(id))
    }

    /// Log lines of one job.
    pub fn job_log(&self, id: Uuid) -> SchedulerResult<Vec<String>> {
        Ok(self.get_job(id)?.log)
    }

    /// Cancel a job that has not started yet.
    ///
    /// A queued job flips to `Cancelled` and is skipped when a worker
    /// eventually dequeues it. Jobs that are already running (or finished)
    /// are rejected; interrupting a running transcode is out of scope.
    pub fn cancel_job(&self, id: Uuid) -> SchedulerResult<()> {
        let job = self.get_job(id)?;
        if job.status != JobStatus::Queued {
            return Err(SchedulerError::NotCancellable(id));
        }
        if self.registry.mark_finished(id, JobStatus::Cancelled) {
            self.registry.append_log(id, "Job cancelled");
            info!("Cancelled job {}", id);
            Ok(())
        } else {
            // lost the race against a worker picking it up
            Err(SchedulerError::NotCancellable(id))
        }
    }

    /// Apply a partial configuration update.
    ///
    /// The whole update is validated before any field is applied; on
    /// rejection the prior configuration remains in effect. A change to
    /// `max_parallel_jobs` resizes the pool immediately.
    pub fn update_settings(&self, update: PoolConfigUpdate) -> SchedulerResult<PoolConfig> {
        if let Some(n) = update.max_parallel_jobs {
            if n < 1 {
                return Err(SchedulerError::ConfigInvalid(format!(
                    "max_parallel_jobs must be at least 1, got {n}"
                )));
            }
        }
        if let Some(ref format) = update.default_output_format {
            if format.is_empty() {
                return Err(SchedulerError::ConfigInvalid(
                    "default_output_format cannot be empty".to_string(),
                ));
            }
        }
        if let Some(ref binary) = update.ffmpeg_binary {
            if binary.is_empty() {
                return Err(SchedulerError::ConfigInvalid(
                    "ffmpeg_binary cannot be empty".to_string(),
                ));
            }
        }

        let mut config = self.config.write().expect("pool config lock poisoned");
        if let Some(n) = update.max_parallel_jobs {
            let n = n as usize;
            if n != config.max_parallel_jobs {
                config.max_parallel_jobs = n;
                self.pool.resize(n);
                info!("Resized worker pool to {}", n);
            }
        }
        if let Some(format) = update.default_output_format {
            config.default_output_format = format;
        }
        if let Some(binary) = update.ffmpeg_binary {
            config.ffmpeg_binary = binary;
        }
        if let Some(allow_gpu) = update.allow_gpu {
            config.allow_gpu = allow_gpu;
        }

        info!("Settings updated: {:?}", *config);
        Ok(config.clone())
    }

    /// Current configuration snapshot.
    pub fn current_settings(&self) -> PoolConfig {
        self.config.read().expect("pool config lock poisoned").clone()
    }

    /// Workers that have not yet exited.
    pub fn live_workers(&self) -> usize {
        self.pool.live_workers()
    }

    /// Retire all workers and wait (bounded) for them to exit.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}
