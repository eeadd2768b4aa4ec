use std::env;
use std::path::PathBuf;

use crate::scheduler::PoolConfig;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Root directory for uploads and transcoded outputs
    pub storage_root: PathBuf,

    /// Initial number of pool workers (resizable at runtime)
    pub max_parallel_jobs: usize,

    /// Name or path of the transcoder binary
    pub ffmpeg_binary: String,

    /// Whether non-CPU target devices are permitted
    pub allow_gpu: bool,

    /// Output container format used when a job does not override it
    pub default_output_format: String,

    /// Maximum payload size for all requests (in bytes)
    /// Default: 10MB (10 * 1024 * 1024)
    pub max_payload_size: usize,

    /// Directory for rotating log files
    pub log_dir: String,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Optional environment variables:
    /// - STORAGE_ROOT: base directory for uploads/ and output/ (default: storage)
    /// - MAX_PARALLEL_JOBS: initial worker count, must be >= 1 (default: 2)
    /// - FFMPEG_BINARY: transcoder binary name or path (default: ffmpeg)
    /// - ALLOW_GPU: permit intel/nvidia target devices (default: false)
    /// - DEFAULT_OUTPUT_FORMAT: fallback container format (default: mp4)
    /// - MAX_PAYLOAD_SIZE: maximum request payload size in bytes (default: 10485760 = 10MB)
    /// - LOG_DIR: directory for rotating log files (default: logs)
    pub fn from_env() -> Result<Self, String> {
        // Load .env file if it exists
        dotenv::dotenv().ok();

        let storage_root = env::var("STORAGE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("storage"));

        let max_parallel_jobs = env::var("MAX_PARALLEL_JOBS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(2);
        if max_parallel_jobs < 1 {
            return Err("MAX_PARALLEL_JOBS must be at least 1".to_string());
        }

        let ffmpeg_binary = env::var("FFMPEG_BINARY").unwrap_or_else(|_| "ffmpeg".to_string());
        if ffmpeg_binary.is_empty() {
            return Err("FFMPEG_BINARY must not be empty".to_string());
        }

        let allow_gpu = env::var("ALLOW_GPU")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(false);

        let default_output_format =
            env::var("DEFAULT_OUTPUT_FORMAT").unwrap_or_else(|_| "mp4".to_string());
        if default_output_format.is_empty() {
            return Err("DEFAULT_OUTPUT_FORMAT must not be empty".to_string());
        }

        // Parse MAX_PAYLOAD_SIZE with default fallback
        let max_payload_size = env::var("MAX_PAYLOAD_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10 * 1024 * 1024); // Default: 10MB

        let log_dir = env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string());

        Ok(Config {
            storage_root,
            max_parallel_jobs,
            ffmpeg_binary,
            allow_gpu,
            default_output_format,
            max_payload_size,
            log_dir,
        })
    }

    /// Destination for uploaded input and watermark files
    pub fn upload_path(&self) -> PathBuf {
        self.storage_root.join("uploads")
    }

    /// Destination for transcoded outputs
    pub fn output_path(&self) -> PathBuf {
        self.storage_root.join("output")
    }

    /// Scheduler-facing view of the runtime-tunable settings
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_parallel_jobs: self.max_parallel_jobs,
            default_output_format: self.default_output_format.clone(),
            ffmpeg_binary: self.ffmpeg_binary.clone(),
            allow_gpu: self.allow_gpu,
        }
    }
}
