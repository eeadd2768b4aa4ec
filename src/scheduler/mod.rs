pub mod error;
pub mod models;
pub mod pool;
pub mod registry;
pub mod service;

// Re-export commonly used types
pub use error::SchedulerError;
pub use models::{AnchorPosition, Job, JobStatus, OverlaySource, TargetDevice, WatermarkSpec};
pub use service::{JobRequest, JobScheduler, PoolConfig, PoolConfigUpdate};
