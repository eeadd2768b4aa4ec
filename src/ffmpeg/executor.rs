//! Single external-process invocation with live output streaming.

use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::scheduler::error::{SchedulerError, SchedulerResult};

use super::command::TranscodeCommand;

/// Run a transcoder command to completion, invoking `on_line` for every
/// line the process writes to stdout or stderr as it is produced.
///
/// Blocks until the process exits and returns its exit code. A non-zero
/// exit maps to [`SchedulerError::ExecutionFailed`]. No retry and no
/// timeout: duration is bounded only by the transcoding work itself.
pub async fn run_transcode<F>(cmd: &TranscodeCommand, on_line: F) -> SchedulerResult<i32>
where
    F: Fn(&str) + Send + Sync + 'static,
{
    debug!("Spawning transcoder: {}", cmd.to_log_string());

    let mut child = Command::new(&cmd.program)
        .args(&cmd.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    // The transcoder interleaves diagnostics across both streams; feed
    // them through the same callback so the job log sees a merged view.
    let on_line = Arc::new(on_line);
    let stdout = child.stdout.take().expect("stdout not captured");
    let stderr = child.stderr.take().expect("stderr not captured");
    let stdout_task = tokio::spawn(stream_lines(stdout, Arc::clone(&on_line)));
    let stderr_task = tokio::spawn(stream_lines(stderr, on_line));

    let status = child.wait().await?;
    let _ = stdout_task.await;
    let _ = stderr_task.await;

    if status.success() {
        Ok(status.code().unwrap_or(0))
    } else {
        Err(SchedulerError::ExecutionFailed {
            code: status.code(),
        })
    }
}

async fn stream_lines<R, F>(reader: R, on_line: Arc<F>)
where
    R: AsyncRead + Unpin,
    F: Fn(&str) + Send + Sync,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            on_line(trimmed);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn command(program: &str, args: &[&str]) -> TranscodeCommand {
        TranscodeCommand {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn clean_exit_streams_output_lines() {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&captured);

        let cmd = command("echo", &["one two"]);
        let code = run_transcode(&cmd, move |line| {
            sink.lock().unwrap().push(line.to_string());
        })
        .await
        .unwrap();

        assert_eq!(code, 0);
        assert_eq!(*captured.lock().unwrap(), vec!["one two".to_string()]);
    }

    #[tokio::test]
    async fn stderr_is_merged_into_the_stream() {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&captured);

        let cmd = command("sh", &["-c", "echo out; echo err 1>&2"]);
        run_transcode(&cmd, move |line| {
            sink.lock().unwrap().push(line.to_string());
        })
        .await
        .unwrap();

        let mut lines = captured.lock().unwrap().clone();
        lines.sort();
        assert_eq!(lines, vec!["err".to_string(), "out".to_string()]);
    }

    #[tokio::test]
    async fn nonzero_exit_maps_to_execution_failed() {
        let cmd = command("sh", &["-c", "exit 3"]);
        let err = run_transcode(&cmd, |_| {}).await.unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::ExecutionFailed { code: Some(3) }
        ));
    }

    #[tokio::test]
    async fn missing_binary_is_an_io_error() {
        let cmd = command("definitely-not-a-real-binary", &[]);
        let err = run_transcode(&cmd, |_| {}).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Io(_)));
    }
}
