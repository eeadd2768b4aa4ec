use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::ffmpeg::{build_command, run_transcode};

use super::error::SchedulerResult;
use super::models::{Job, JobStatus};
use super::registry::JobRegistry;

/// How long shutdown waits for each worker to drain its current job.
const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// One unit of work on the shared queue.
///
/// `Retire` is a control signal instructing exactly one worker to exit its
/// loop; keeping it a distinct variant means "stop" can never collide with
/// a legitimate job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerTask {
    Run(Uuid),
    Retire,
}

struct WorkerHandle {
    id: u32,
    handle: JoinHandle<()>,
}

type TaskReceiver = Arc<AsyncMutex<mpsc::UnboundedReceiver<WorkerTask>>>;

/// A resizable set of concurrent workers pulling job ids from a single
/// shared FIFO queue.
///
/// # Ordering
/// Admission into the queue is FIFO, but once multiple workers are active
/// two jobs submitted back-to-back may finish out of order. Only per-job
/// input order is guaranteed.
///
/// # Resize
/// Growing spawns additional workers onto the same queue. Shrinking posts
/// one retire token per worker to remove; tokens queue behind pending work,
/// so the roster converges on the target eventually rather than instantly.
/// Unconsumed retire tokens count against the roster, so a grow issued
/// while a shrink is still draining spawns enough workers to land on the
/// target once the stale tokens are consumed. Finished workers are pruned
/// from the roster on every resize and count.
pub struct WorkerPool {
    registry: JobRegistry,
    queue_tx: mpsc::UnboundedSender<WorkerTask>,
    queue_rx: TaskReceiver,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<WorkerHandle>>,
    next_worker_id: AtomicU32,
    pending_retires: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Create a pool with no workers. Call [`WorkerPool::resize`] to spawn
    /// the initial roster.
    pub fn new(registry: JobRegistry) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            registry,
            queue_tx,
            queue_rx: Arc::new(AsyncMutex::new(queue_rx)),
            shutdown_tx,
            workers: Mutex::new(Vec::new()),
            next_worker_id: AtomicU32::new(1),
            pending_retires: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Put a job id on the work queue.
    pub fn enqueue(&self, job_id: Uuid) {
        if self.queue_tx.send(WorkerTask::Run(job_id)).is_err() {
            warn!("Work queue closed, dropping job {}", job_id);
        }
    }

    /// Grow or shrink the roster towards `target` workers.
    pub fn resize(&self, target: usize) {
        let mut workers = self.workers.lock().expect("worker roster lock poisoned");
        workers.retain(|w| !w.handle.is_finished());
        // Workers already earmarked for retirement will exit as soon as
        // their token surfaces in the queue; they no longer count towards
        // the roster, otherwise a grow issued during a draining shrink
        // would leave the pool short once the token is consumed.
        let pending = self.pending_retires.load(Ordering::Acquire);
        let current = workers.len().saturating_sub(pending);

        if target > current {
            for _ in 0..target - current {
                let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
                let handle = tokio::spawn(worker_loop(
                    id,
                    self.registry.clone(),
                    Arc::clone(&self.queue_rx),
                    self.shutdown_tx.subscribe(),
                    Arc::clone(&self.pending_retires),
                ));
                workers.push(WorkerHandle { id, handle });
                info!("Spawned worker {}", id);
            }
        } else if target < current {
            self.pending_retires
                .fetch_add(current - target, Ordering::AcqRel);
            for _ in 0..current - target {
                let _ = self.queue_tx.send(WorkerTask::Retire);
            }
            info!(
                "Posted {} retire token(s), pool shrinking from {} to {}",
                current - target,
                current,
                target
            );
        }
    }

    /// Number of workers that have not yet exited. During a resize-down
    /// this can transiently exceed the target until the retire tokens are
    /// consumed.
    pub fn live_workers(&self) -> usize {
        let mut workers = self.workers.lock().expect("worker roster lock poisoned");
        workers.retain(|w| !w.handle.is_finished());
        workers.len()
    }

    /// Retire every worker and wait (bounded) for each to exit. Workers
    /// finish the job they are currently processing first.
    pub async fn shutdown(&self) {
        let workers: Vec<WorkerHandle> = {
            let mut workers = self.workers.lock().expect("worker roster lock poisoned");
            workers.drain(..).collect()
        };
        info!("Retiring {} worker(s)...", workers.len());

        for _ in &workers {
            let _ = self.queue_tx.send(WorkerTask::Retire);
        }
        if self.shutdown_tx.send(true).is_err() {
            debug!("No workers subscribed to the shutdown signal");
        }

        for worker in workers {
            match timeout(WORKER_JOIN_TIMEOUT, worker.handle).await {
                Ok(Ok(())) => info!("Worker {} stopped", worker.id),
                Ok(Err(e)) => error!("Worker {} panicked: {:?}", worker.id, e),
                Err(_) => warn!(
                    "Worker {} did not stop within {:?}, abandoning it",
                    worker.id, WORKER_JOIN_TIMEOUT
                ),
            }
        }
        info!("Worker pool stopped");
    }
}

/// Main loop of one worker.
///
/// Blocks on the shared queue until a task or the shutdown signal arrives.
/// A `Run` task is processed inline -- one worker owns a job for its entire
/// run and processes one job at a time.
async fn worker_loop(
    worker_id: u32,
    registry: JobRegistry,
    queue_rx: TaskReceiver,
    mut shutdown_rx: watch::Receiver<bool>,
    pending_retires: Arc<AtomicUsize>,
) {
    info!("Worker {} started", worker_id);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        tokio::select! {
            changed = shutdown_rx.changed() => {
                // a closed channel means the pool itself is gone
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            task = async { queue_rx.lock().await.recv().await } => {
                match task {
                    None => break,
                    Some(WorkerTask::Retire) => {
                        // shutdown posts untracked tokens, hence saturating
                        let _ = pending_retires.fetch_update(
                            Ordering::AcqRel,
                            Ordering::Acquire,
                            |n| Some(n.saturating_sub(1)),
                        );
                        info!("Worker {} retiring", worker_id);
                        break;
                    }
                    Some(WorkerTask::Run(job_id)) => {
                        run_job(&registry, worker_id, job_id).await;
                    }
                }
            }
        }
    }

    info!("Worker {} stopped", worker_id);
}

/// Execute one job end to end, updating the registry as it goes.
///
/// Inputs are processed strictly in submission order. The first failure
/// (command build error, spawn failure or non-zero exit) marks the job
/// failed and stops processing the remaining inputs; already-produced
/// outputs are not rolled back. Failures never escape this function -- the
/// worker returns to the pool for its next job regardless.
async fn run_job(registry: &JobRegistry, worker_id: u32, job_id: Uuid) {
    // Guard against duplicate dequeue and late cancellation: only a
    // still-queued job may transition into Running.
    if !registry.mark_running(job_id) {
        debug!("Worker {} skipping job {} (not queued)", worker_id, job_id);
        return;
    }
    let Some(job) = registry.get(job_id) else {
        warn!("Worker {} acquired unknown job {}", worker_id, job_id);
        return;
    };

    let total = job.input_files.len();
    info!("Worker {} running job {} ({} file(s))", worker_id, job_id, total);
    registry.append_log(job_id, &format!("Starting job with {} file(s)", total));

    for (index, input_file) in job.input_files.iter().enumerate() {
        match process_input(registry, &job, input_file).await {
            Ok(()) => {
                registry.set_progress(job_id, (index + 1) as f64 / total as f64);
            }
            Err(e) => {
                registry.mark_finished(job_id, JobStatus::Failed);
                registry.append_log(job_id, &format!("Failed: {e}"));
                error!("Worker {} job {} failed: {}", worker_id, job_id, e);
                return;
            }
        }
    }

    registry.mark_finished(job_id, JobStatus::Completed);
    registry.append_log(job_id, "Job finished successfully");
    info!("Worker {} completed job {}", worker_id, job_id);
}

/// Watermark a single input file.
async fn process_input(registry: &JobRegistry, job: &Job, input_file: &Path) -> SchedulerResult<()> {
    let stem = input_file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".to_string());
    let output_path = job
        .output_dir
        .join(format!("{stem}_watermarked.{}", job.output_format));

    tokio::fs::create_dir_all(&job.output_dir).await?;

    let cmd = build_command(job, input_file, &output_path)?;
    registry.append_log(
        job.id,
        &format!(
            "Processing {} -> {}",
            display_name(input_file),
            display_name(&output_path)
        ),
    );
    registry.append_log(job.id, &format!("Command: {}", cmd.to_log_string()));

    let log_registry = registry.clone();
    let job_id = job.id;
    run_transcode(&cmd, move |line| log_registry.append_log(job_id, line)).await?;

    registry.append_log(job.id, &format!("Completed {}", display_name(input_file)));
    Ok(())
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;

    use super::*;
    use crate::scheduler::models::{AnchorPosition, TargetDevice, WatermarkSpec};

    fn job_with_binary(binary: &str, inputs: &[&str], output_dir: &Path) -> Job {
        let watermark =
            WatermarkSpec::text("demo", None, 36, "white", 1.0, AnchorPosition::TopRight, 20, 20)
                .unwrap();
        Job::new(
            inputs.iter().map(PathBuf::from).collect(),
            watermark,
            "mp4".to_string(),
            output_dir.to_path_buf(),
            TargetDevice::Cpu,
            HashMap::from([("ffmpeg_binary".to_string(), binary.to_string())]),
        )
    }

    async fn wait_terminal(registry: &JobRegistry, id: Uuid) -> Job {
        for _ in 0..1000 {
            if let Some(job) = registry.get(id) {
                if job.status.is_terminal() {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} never reached a terminal state");
    }

    async fn wait_live_workers(pool: &WorkerPool, target: usize) {
        for _ in 0..1000 {
            if pool.live_workers() == target {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "pool never converged on {target} live workers (now {})",
            pool.live_workers()
        );
    }

    #[tokio::test]
    async fn successful_job_completes_with_full_progress() {
        let registry = JobRegistry::new();
        let pool = WorkerPool::new(registry.clone());
        pool.resize(1);

        let dir = tempfile::tempdir().unwrap();
        let id = registry.create(job_with_binary("echo", &["a.mp4", "b.mp4"], dir.path()));
        pool.enqueue(id);

        let job = wait_terminal(&registry, id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 1.0);
        assert!(job.started_at.unwrap() <= job.finished_at.unwrap());
        let completions = job
            .log
            .iter()
            .filter(|l| l.contains("Job finished successfully"))
            .count();
        assert_eq!(completions, 1);

        pool.shutdown().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failure_freezes_progress_and_skips_remaining_inputs() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        // fake transcoder: succeeds except when asked for b's output
        let script = dir.path().join("fake-transcoder.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\ncase \"$*\" in *b_watermarked*) exit 1;; *) exit 0;; esac\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let registry = JobRegistry::new();
        let pool = WorkerPool::new(registry.clone());
        pool.resize(1);

        let id = registry.create(job_with_binary(
            &script.to_string_lossy(),
            &["a.mp4", "b.mp4", "c.mp4"],
            dir.path(),
        ));
        pool.enqueue(id);

        let job = wait_terminal(&registry, id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert!((job.progress - 1.0 / 3.0).abs() < 1e-9);
        assert!(job.finished_at.is_some());

        let failures = job.log.iter().filter(|l| l.contains("Failed:")).count();
        assert_eq!(failures, 1);
        assert!(!job.log.iter().any(|l| l.contains("Processing c.mp4")));

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn concurrent_jobs_all_reach_terminal_state() {
        let registry = JobRegistry::new();
        let pool = WorkerPool::new(registry.clone());
        pool.resize(2);

        let dir = tempfile::tempdir().unwrap();
        let ids: Vec<Uuid> = (0..6)
            .map(|_| {
                let id = registry.create(job_with_binary("echo", &["a.mp4"], dir.path()));
                pool.enqueue(id);
                id
            })
            .collect();

        for id in ids {
            let job = wait_terminal(&registry, id).await;
            assert_eq!(job.status, JobStatus::Completed);
        }

        pool.shutdown().await;
    }

    #[cfg(unix)]
    fn write_slow_transcoder(dir: &Path, seconds: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("slow-transcoder.sh");
        std::fs::write(&script, format!("#!/bin/sh\nsleep {seconds}\n")).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn running_jobs_never_exceed_worker_count() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_slow_transcoder(dir.path(), "0.3");

        let registry = JobRegistry::new();
        let pool = WorkerPool::new(registry.clone());
        pool.resize(2);

        let ids: Vec<Uuid> = (0..6)
            .map(|_| {
                let id = registry.create(job_with_binary(
                    &script.to_string_lossy(),
                    &["a.mp4"],
                    dir.path(),
                ));
                pool.enqueue(id);
                id
            })
            .collect();

        let mut max_running = 0;
        for _ in 0..2000 {
            let jobs = registry.list();
            let running = jobs
                .iter()
                .filter(|j| j.status == JobStatus::Running)
                .count();
            max_running = max_running.max(running);
            if jobs.iter().all(|j| j.status.is_terminal()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(
            max_running <= 2,
            "observed {max_running} running jobs on a pool of 2"
        );
        assert!(max_running > 0, "never sampled a running job");
        for id in ids {
            assert_eq!(registry.get(id).unwrap().status, JobStatus::Completed);
        }

        pool.shutdown().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn resize_down_then_up_while_busy_returns_to_target() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_slow_transcoder(dir.path(), "0.5");

        let registry = JobRegistry::new();
        let pool = WorkerPool::new(registry.clone());
        pool.resize(2);

        let ids: Vec<Uuid> = (0..2)
            .map(|_| {
                let id = registry.create(job_with_binary(
                    &script.to_string_lossy(),
                    &["a.mp4"],
                    dir.path(),
                ));
                pool.enqueue(id);
                id
            })
            .collect();

        // occupy both workers so the retire token queues behind their jobs
        for _ in 0..1000 {
            let running = registry
                .list()
                .iter()
                .filter(|j| j.status == JobStatus::Running)
                .count();
            if running == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // the grow must account for the still-unconsumed retire token,
        // otherwise consuming it later leaves the pool one worker short
        pool.resize(1);
        pool.resize(2);

        for id in ids {
            let job = wait_terminal(&registry, id).await;
            assert_eq!(job.status, JobStatus::Completed);
        }
        wait_live_workers(&pool, 2).await;

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn resize_down_converges_without_dropping_jobs() {
        let registry = JobRegistry::new();
        let pool = WorkerPool::new(registry.clone());
        pool.resize(3);
        assert_eq!(pool.live_workers(), 3);

        pool.resize(1);
        wait_live_workers(&pool, 1).await;

        // the surviving worker still drains the queue
        let dir = tempfile::tempdir().unwrap();
        let id = registry.create(job_with_binary("echo", &["a.mp4"], dir.path()));
        pool.enqueue(id);
        let job = wait_terminal(&registry, id).await;
        assert_eq!(job.status, JobStatus::Completed);

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn cancelled_queued_job_is_skipped() {
        let registry = JobRegistry::new();
        let pool = WorkerPool::new(registry.clone());

        let dir = tempfile::tempdir().unwrap();
        let cancelled = registry.create(job_with_binary("echo", &["a.mp4"], dir.path()));
        let sentinel = registry.create(job_with_binary("echo", &["a.mp4"], dir.path()));
        pool.enqueue(cancelled);
        pool.enqueue(sentinel);

        // flip to cancelled before any worker exists to pick it up
        registry.mark_finished(cancelled, JobStatus::Cancelled);
        pool.resize(1);

        // FIFO: once the sentinel finished, the cancelled job was dequeued
        let job = wait_terminal(&registry, sentinel).await;
        assert_eq!(job.status, JobStatus::Completed);

        let skipped = registry.get(cancelled).unwrap();
        assert_eq!(skipped.status, JobStatus::Cancelled);
        assert!(skipped.started_at.is_none());
        assert!(!skipped.log.iter().any(|l| l.contains("Starting job")));

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_stops_all_workers() {
        let registry = JobRegistry::new();
        let pool = WorkerPool::new(registry.clone());
        pool.resize(2);

        pool.shutdown().await;
        assert_eq!(pool.live_workers(), 0);
    }
}
