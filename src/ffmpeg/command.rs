//! Translation of a job's watermark spec into a transcoder invocation.
//!
//! Pure and deterministic: no filesystem access, no process spawning.
//! Every dynamic value that enters the filter graph is escaped for the
//! filter mini-language, and the final command is a list of discrete argv
//! tokens -- it is never joined into a shell string except for the
//! human-readable log rendering, where each token is shell-quoted.

use std::path::Path;

use crate::scheduler::{
    error::{SchedulerError, SchedulerResult},
    models::{Job, OverlaySource, TargetDevice},
};

/// Default x264 preset when the job metadata does not override it.
const DEFAULT_PRESET: &str = "medium";

/// A fully resolved transcoder invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeCommand {
    /// Program name or path, taken from the job's captured configuration.
    pub program: String,
    /// Arguments as discrete tokens.
    pub args: Vec<String>,
}

impl TranscodeCommand {
    /// Render the command for the job log, shell-quoting each token so the
    /// line is safe to copy-paste.
    pub fn to_log_string(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(shell_quote)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Build the transcoder command for one input of a job.
pub fn build_command(
    job: &Job,
    input_file: &Path,
    output_file: &Path,
) -> SchedulerResult<TranscodeCommand> {
    let (extra_inputs, filters) = build_filter_and_inputs(job)?;

    let program = job
        .metadata
        .get("ffmpeg_binary")
        .cloned()
        .unwrap_or_else(|| "ffmpeg".to_string());

    let mut args: Vec<String> = vec![
        "-y".to_string(),
        "-i".to_string(),
        input_file.to_string_lossy().into_owned(),
    ];
    args.extend(extra_inputs);
    if !filters.is_empty() {
        args.push("-filter_complex".to_string());
        args.push(filters.join(";"));
    }
    match job.target_device {
        TargetDevice::Cpu => {
            let preset = job
                .metadata
                .get("preset")
                .map(String::as_str)
                .unwrap_or(DEFAULT_PRESET);
            args.extend(["-c:v", "libx264", "-preset", preset].map(str::to_string));
        }
        TargetDevice::Intel => args.extend(["-c:v", "h264_qsv"].map(str::to_string)),
        TargetDevice::Nvidia => args.extend(["-c:v", "h264_nvenc"].map(str::to_string)),
    }
    args.extend(["-c:a".to_string(), "copy".to_string()]);
    args.push(output_file.to_string_lossy().into_owned());

    Ok(TranscodeCommand { program, args })
}

/// Return the extra `-i` inputs and the filter graph stages for the job's
/// watermark.
fn build_filter_and_inputs(job: &Job) -> SchedulerResult<(Vec<String>, Vec<String>)> {
    let watermark = &job.watermark;
    let (x_expr, y_expr) = watermark
        .position
        .resolve(watermark.offset_x, watermark.offset_y);

    match &watermark.overlay {
        OverlaySource::Text {
            text,
            font_path,
            font_size,
            color,
        } => {
            let color = if watermark.opacity < 1.0 {
                // drawtext expects color@alpha
                format!("{color}@{:.2}", watermark.opacity)
            } else {
                color.clone()
            };
            let mut drawtext = format!(
                "drawtext=text={}:fontcolor={}:fontsize={}:x={}:y={}",
                escape_filter_text(text),
                color,
                font_size,
                x_expr,
                y_expr,
            );
            if let Some(font_path) = font_path {
                drawtext.push_str(&format!(
                    ":fontfile={}",
                    escape_filter_text(&font_path.to_string_lossy())
                ));
            }
            Ok((Vec::new(), vec![drawtext]))
        }
        OverlaySource::Image { path } => {
            if path.as_os_str().is_empty() {
                return Err(SchedulerError::SpecInvalid(
                    "image watermark requires an image path".to_string(),
                ));
            }
            let extra_inputs = vec!["-i".to_string(), path.to_string_lossy().into_owned()];
            let filters = vec![
                format!(
                    "[1]format=rgba,colorchannelmixer=aa={:.2}[wm]",
                    watermark.opacity
                ),
                format!("[0][wm]overlay={x_expr}:{y_expr}"),
            ];
            Ok((extra_inputs, filters))
        }
    }
}

/// Escape a value for the ffmpeg filter mini-language.
///
/// Backslash must go first so that the escapes introduced for colon and
/// quote are not themselves double-escaped.
fn escape_filter_text(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}

/// Quote a single token for safe shell display, `shlex.quote` style.
fn shell_quote(token: &str) -> String {
    if !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c))
    {
        return token.to_string();
    }
    format!("'{}'", token.replace('\'', "'\"'\"'"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;

    use super::*;
    use crate::scheduler::models::{AnchorPosition, WatermarkSpec};

    fn job_with(watermark: WatermarkSpec, device: TargetDevice) -> Job {
        Job::new(
            vec![PathBuf::from("in.mp4")],
            watermark,
            "mp4".to_string(),
            PathBuf::from("output"),
            device,
            HashMap::from([("ffmpeg_binary".to_string(), "ffmpeg".to_string())]),
        )
    }

    fn filter_arg(cmd: &TranscodeCommand) -> &str {
        let idx = cmd
            .args
            .iter()
            .position(|a| a == "-filter_complex")
            .expect("filter_complex missing");
        &cmd.args[idx + 1]
    }

    #[test]
    fn escapes_backslash_before_colon_and_quote() {
        assert_eq!(escape_filter_text("a:b"), "a\\:b");
        assert_eq!(escape_filter_text("a'b"), "a\\'b");
        assert_eq!(escape_filter_text("a\\b"), "a\\\\b");
        // a backslash followed by a colon must not double-escape
        assert_eq!(escape_filter_text("\\:"), "\\\\\\:");
    }

    #[test]
    fn text_watermark_escapes_literal_text() {
        let spec = WatermarkSpec::text(
            "Hi: there",
            None,
            36,
            "white",
            1.0,
            AnchorPosition::Center,
            0,
            0,
        )
        .unwrap();
        let job = job_with(spec, TargetDevice::Cpu);
        let cmd = build_command(&job, Path::new("in.mp4"), Path::new("out.mp4")).unwrap();

        let filter = filter_arg(&cmd);
        assert!(filter.contains("text=Hi\\: there"));
        assert!(filter.contains("x=(W-w)/2"));
        assert!(filter.contains("y=(H-h)/2"));
    }

    #[test]
    fn text_opacity_below_one_suffixes_color() {
        let spec = WatermarkSpec::text(
            "hi",
            None,
            36,
            "white",
            0.5,
            AnchorPosition::TopRight,
            20,
            20,
        )
        .unwrap();
        let job = job_with(spec, TargetDevice::Cpu);
        let cmd = build_command(&job, Path::new("in.mp4"), Path::new("out.mp4")).unwrap();
        assert!(filter_arg(&cmd).contains("fontcolor=white@0.50"));
    }

    #[test]
    fn text_full_opacity_omits_suffix() {
        let spec = WatermarkSpec::text(
            "hi",
            None,
            36,
            "white",
            1.0,
            AnchorPosition::TopRight,
            20,
            20,
        )
        .unwrap();
        let job = job_with(spec, TargetDevice::Cpu);
        let cmd = build_command(&job, Path::new("in.mp4"), Path::new("out.mp4")).unwrap();
        let filter = filter_arg(&cmd);
        assert!(filter.contains("fontcolor=white:"));
        assert!(!filter.contains('@'));
    }

    #[test]
    fn anchor_expressions_reach_the_filter() {
        let spec = WatermarkSpec::text(
            "hi",
            None,
            36,
            "white",
            1.0,
            AnchorPosition::TopRight,
            20,
            20,
        )
        .unwrap();
        let job = job_with(spec, TargetDevice::Cpu);
        let cmd = build_command(&job, Path::new("in.mp4"), Path::new("out.mp4")).unwrap();
        let filter = filter_arg(&cmd);
        assert!(filter.contains("x=W-w-20"));
        assert!(filter.contains("y=20"));
    }

    #[test]
    fn font_file_is_escaped_into_the_filter() {
        let spec = WatermarkSpec::text(
            "hi",
            Some(PathBuf::from("/fonts/My Font:v2.ttf")),
            36,
            "white",
            1.0,
            AnchorPosition::TopLeft,
            0,
            0,
        )
        .unwrap();
        let job = job_with(spec, TargetDevice::Cpu);
        let cmd = build_command(&job, Path::new("in.mp4"), Path::new("out.mp4")).unwrap();
        assert!(filter_arg(&cmd).contains("fontfile=/fonts/My Font\\:v2.ttf"));
    }

    #[test]
    fn image_watermark_adds_second_input_and_alpha_stage() {
        let spec =
            WatermarkSpec::image("wm.png", 1.0, AnchorPosition::BottomRight, 10, 10).unwrap();
        let job = job_with(spec, TargetDevice::Cpu);
        let cmd = build_command(&job, Path::new("in.mp4"), Path::new("out.mp4")).unwrap();

        let i_positions: Vec<usize> = cmd
            .args
            .iter()
            .enumerate()
            .filter(|(_, a)| *a == "-i")
            .map(|(i, _)| i)
            .collect();
        assert_eq!(i_positions.len(), 2);
        assert_eq!(cmd.args[i_positions[1] + 1], "wm.png");

        // alpha stage applies even at full opacity
        let filter = filter_arg(&cmd);
        assert_eq!(
            filter,
            "[1]format=rgba,colorchannelmixer=aa=1.00[wm];[0][wm]overlay=W-w-10:H-h-10"
        );
    }

    #[test]
    fn image_opacity_is_two_decimal() {
        let spec =
            WatermarkSpec::image("wm.png", 0.333, AnchorPosition::Center, 0, 0).unwrap();
        let job = job_with(spec, TargetDevice::Cpu);
        let cmd = build_command(&job, Path::new("in.mp4"), Path::new("out.mp4")).unwrap();
        assert!(filter_arg(&cmd).contains("colorchannelmixer=aa=0.33[wm]"));
    }

    #[test]
    fn device_selects_codec_clause() {
        let spec = WatermarkSpec::text(
            "hi",
            None,
            36,
            "white",
            1.0,
            AnchorPosition::TopRight,
            20,
            20,
        )
        .unwrap();

        let cpu = build_command(
            &job_with(spec.clone(), TargetDevice::Cpu),
            Path::new("in.mp4"),
            Path::new("out.mp4"),
        )
        .unwrap();
        let cpu_args = cpu.args.join(" ");
        assert!(cpu_args.contains("-c:v libx264 -preset medium"));
        assert!(cpu_args.ends_with("-c:a copy out.mp4"));

        let mut job = job_with(spec.clone(), TargetDevice::Cpu);
        job.metadata.insert("preset".to_string(), "fast".to_string());
        let cpu_fast =
            build_command(&job, Path::new("in.mp4"), Path::new("out.mp4")).unwrap();
        assert!(cpu_fast.args.join(" ").contains("-preset fast"));

        let intel = build_command(
            &job_with(spec.clone(), TargetDevice::Intel),
            Path::new("in.mp4"),
            Path::new("out.mp4"),
        )
        .unwrap();
        assert!(intel.args.join(" ").contains("-c:v h264_qsv"));
        assert!(!intel.args.contains(&"-preset".to_string()));

        let nvidia = build_command(
            &job_with(spec, TargetDevice::Nvidia),
            Path::new("in.mp4"),
            Path::new("out.mp4"),
        )
        .unwrap();
        assert!(nvidia.args.join(" ").contains("-c:v h264_nvenc"));
    }

    #[test]
    fn binary_comes_from_job_metadata() {
        let spec = WatermarkSpec::text(
            "hi",
            None,
            36,
            "white",
            1.0,
            AnchorPosition::TopRight,
            20,
            20,
        )
        .unwrap();
        let mut job = job_with(spec, TargetDevice::Cpu);
        job.metadata
            .insert("ffmpeg_binary".to_string(), "/opt/ffmpeg/bin/ffmpeg".to_string());
        let cmd = build_command(&job, Path::new("in.mp4"), Path::new("out.mp4")).unwrap();
        assert_eq!(cmd.program, "/opt/ffmpeg/bin/ffmpeg");
    }

    #[test]
    fn log_rendering_quotes_unsafe_tokens() {
        assert_eq!(shell_quote("in.mp4"), "in.mp4");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), "'it'\"'\"'s'");
        assert_eq!(shell_quote(""), "''");

        let cmd = TranscodeCommand {
            program: "ffmpeg".to_string(),
            args: vec!["-i".to_string(), "my clip.mp4".to_string()],
        };
        assert_eq!(cmd.to_log_string(), "ffmpeg -i 'my clip.mp4'");
    }
}
