use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{SchedulerError, SchedulerResult};

/// Lifecycle state of a job.
///
/// Transitions: `Queued -> Running -> {Completed, Failed}`, plus
/// `Cancelled` reachable from `Queued`. Terminal states are never left.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Hardware target for the video encode.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TargetDevice {
    Cpu,
    Intel,
    Nvidia,
}

impl FromStr for TargetDevice {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(Self::Cpu),
            "intel" => Ok(Self::Intel),
            "nvidia" => Ok(Self::Nvidia),
            other => Err(SchedulerError::SpecInvalid(format!(
                "unknown target device: {other}"
            ))),
        }
    }
}

impl fmt::Display for TargetDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Cpu => "cpu",
            Self::Intel => "intel",
            Self::Nvidia => "nvidia",
        };
        f.write_str(name)
    }
}

/// Named placement of the overlay, resolved to ffmpeg pixel expressions.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AnchorPosition {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    Center,
}

impl AnchorPosition {
    /// Resolve to an `(x, y)` expression pair.
    ///
    /// `W`/`H` are the output frame dimensions and `w`/`h` the overlay
    /// dimensions; the offsets are margins from the matching edge and are
    /// ignored for `Center`.
    pub fn resolve(&self, offset_x: u32, offset_y: u32) -> (String, String) {
        match self {
            Self::TopLeft => (format!("{offset_x}"), format!("{offset_y}")),
            Self::TopRight => (format!("W-w-{offset_x}"), format!("{offset_y}")),
            Self::BottomLeft => (format!("{offset_x}"), format!("H-h-{offset_y}")),
            Self::BottomRight => (format!("W-w-{offset_x}"), format!("H-h-{offset_y}")),
            Self::Center => ("(W-w)/2".to_string(), "(H-h)/2".to_string()),
        }
    }
}

impl FromStr for AnchorPosition {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "top-left" => Ok(Self::TopLeft),
            "top-right" => Ok(Self::TopRight),
            "bottom-left" => Ok(Self::BottomLeft),
            "bottom-right" => Ok(Self::BottomRight),
            "center" => Ok(Self::Center),
            other => Err(SchedulerError::SpecInvalid(format!(
                "unknown anchor position: {other}"
            ))),
        }
    }
}

/// What gets drawn over the video.
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OverlaySource {
    Text {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        font_path: Option<PathBuf>,
        font_size: u32,
        color: String,
    },
    Image {
        path: PathBuf,
    },
}

/// Immutable description of a text or image watermark and its placement.
///
/// Built through [`WatermarkSpec::text`] / [`WatermarkSpec::image`], which
/// validate all fields once at submission time.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct WatermarkSpec {
    #[serde(flatten)]
    pub overlay: OverlaySource,
    pub opacity: f64,
    pub position: AnchorPosition,
    pub offset_x: u32,
    pub offset_y: u32,
}

impl WatermarkSpec {
    /// Create a validated text watermark.
    pub fn text(
        text: impl Into<String>,
        font_path: Option<PathBuf>,
        font_size: u32,
        color: impl Into<String>,
        opacity: f64,
        position: AnchorPosition,
        offset_x: u32,
        offset_y: u32,
    ) -> SchedulerResult<Self> {
        let text = text.into();
        if text.is_empty() {
            return Err(SchedulerError::SpecInvalid(
                "text watermark requires non-empty text".to_string(),
            ));
        }
        if !(8..=256).contains(&font_size) {
            return Err(SchedulerError::SpecInvalid(format!(
                "font size {font_size} out of range 8-256"
            )));
        }
        validate_placement(opacity, offset_x, offset_y)?;
        Ok(Self {
            overlay: OverlaySource::Text {
                text,
                font_path,
                font_size,
                color: color.into(),
            },
            opacity,
            position,
            offset_x,
            offset_y,
        })
    }

    /// Create a validated image watermark.
    pub fn image(
        path: impl Into<PathBuf>,
        opacity: f64,
        position: AnchorPosition,
        offset_x: u32,
        offset_y: u32,
    ) -> SchedulerResult<Self> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(SchedulerError::SpecInvalid(
                "image watermark requires an image path".to_string(),
            ));
        }
        validate_placement(opacity, offset_x, offset_y)?;
        Ok(Self {
            overlay: OverlaySource::Image { path },
            opacity,
            position,
            offset_x,
            offset_y,
        })
    }
}

fn validate_placement(opacity: f64, offset_x: u32, offset_y: u32) -> SchedulerResult<()> {
    if !(0.0..=1.0).contains(&opacity) {
        return Err(SchedulerError::SpecInvalid(format!(
            "opacity {opacity} out of range 0.0-1.0"
        )));
    }
    for (name, value) in [("offset_x", offset_x), ("offset_y", offset_y)] {
        if value > 4096 {
            return Err(SchedulerError::SpecInvalid(format!(
                "{name} {value} out of range 0-4096"
            )));
        }
    }
    Ok(())
}

/// One watermarking task over a batch of input files.
#[derive(Debug, Serialize, Clone)]
pub struct Job {
    pub id: Uuid,
    pub input_files: Vec<PathBuf>,
    pub watermark: WatermarkSpec,
    pub output_format: String,
    pub output_dir: PathBuf,
    pub target_device: TargetDevice,
    pub status: JobStatus,
    pub progress: f64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub log: Vec<String>,
    pub metadata: HashMap<String, String>,
}

impl Job {
    pub fn new(
        input_files: Vec<PathBuf>,
        watermark: WatermarkSpec,
        output_format: String,
        output_dir: PathBuf,
        target_device: TargetDevice,
        metadata: HashMap<String, String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            input_files,
            watermark,
            output_format,
            output_dir,
            target_device,
            status: JobStatus::Queued,
            progress: 0.0,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            log: Vec::new(),
            metadata,
        }
    }

    /// Append a timestamped entry to the job log. The log is append-only
    /// and never reordered or truncated.
    pub fn append_log(&mut self, message: &str) {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        self.log.push(format!("[{timestamp}] {message}"));
    }
}
