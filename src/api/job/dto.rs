use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::scheduler::{Job, JobStatus, TargetDevice, WatermarkSpec};

/// Response for job submission
#[derive(Serialize)]
pub struct JobCreateResponse {
    pub job_id: Uuid,
}

/// Summary row in the job list
#[derive(Serialize)]
pub struct JobListItem {
    pub id: Uuid,
    pub status: JobStatus,
    pub progress: f64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&Job> for JobListItem {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            status: job.status,
            progress: job.progress,
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
        }
    }
}

/// Full detail of one job
#[derive(Serialize)]
pub struct JobDetail {
    #[serde(flatten)]
    pub summary: JobListItem,
    pub watermark: WatermarkSpec,
    pub output_format: String,
    pub output_dir: String,
    pub target_device: TargetDevice,
    pub metadata: HashMap<String, String>,
    pub log: Vec<String>,
    pub input_files: Vec<String>,
}

impl From<Job> for JobDetail {
    fn from(job: Job) -> Self {
        Self {
            summary: JobListItem::from(&job),
            watermark: job.watermark,
            output_format: job.output_format,
            output_dir: job.output_dir.display().to_string(),
            target_device: job.target_device,
            metadata: job.metadata,
            log: job.log,
            input_files: job
                .input_files
                .iter()
                .map(|p| p.display().to_string())
                .collect(),
        }
    }
}

/// Response for the log-only query
#[derive(Serialize)]
pub struct JobLogResponse {
    pub log: Vec<String>,
}
