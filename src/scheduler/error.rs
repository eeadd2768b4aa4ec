use uuid::Uuid;

/// Errors produced by the scheduling engine.
///
/// Every failure is local to one job and one worker: a failed job never
/// affects another job or the pool's ability to keep processing, and
/// nothing is retried automatically.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Watermark specification is missing or violating a required field
    /// for its kind (e.g. an image watermark without an image path).
    #[error("invalid watermark spec: {0}")]
    SpecInvalid(String),

    /// The external transcoder exited with a non-zero status.
    #[error("transcoder exited with code {}", code_display(.code))]
    ExecutionFailed { code: Option<i32> },

    /// A reconfiguration request carried an out-of-range value. The
    /// previous configuration remains in effect.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// No job with the given identifier exists in the registry.
    #[error("job not found: {0}")]
    NotFound(Uuid),

    /// The job is not in a state that allows cancellation.
    #[error("job {0} cannot be cancelled in its current state")]
    NotCancellable(Uuid),

    /// Filesystem or process-spawn failure while executing a job input.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

fn code_display(code: &Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
