use std::process::Stdio;
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::error::{EngineError, EngineResult};

/// Grace window between SIGTERM and SIGKILL on cancellation, mirroring the
/// Restart Coordinator's own "stop gracefully, then insist" shutdown shape
/// (§4.E, §4.L).
pub const TERMINATE_GRACE: Duration = Duration::from_secs(3);

/// Default timeout for short auxiliary commands (ffprobe, mediainfo); long
/// ones (ffmpeg, yt-dlp) pass `None`.
pub const SHORT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

pub struct Output {
    pub status_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl Output {
    pub fn success(&self) -> bool {
        self.status_code == Some(0)
    }
}

/// Runs `program` with `args`, capturing stdout/stderr. Checks the PATH for
/// the binary first (§4.E "absence is a Fatal error surfaced to the user"),
/// mirroring `misc::check_external_binary`. Streams each stderr line to
/// `on_stderr_line` as it arrives, the same shape `yt_dlp()` uses for its
/// stdout/stderr reader tasks, generalised from fire-and-forget tracing
/// calls to a caller-supplied sink so ffmpeg/yt-dlp progress can be parsed.
#[tracing::instrument(skip(args, cancel, on_stderr_line), fields(program = %program))]
pub async fn run(
    program: &str,
    args: &[String],
    cwd: Option<&std::path::Path>,
    cancel: CancellationToken,
    timeout: Option<Duration>,
    mut on_stderr_line: impl FnMut(&str) + Send,
) -> EngineResult<Output> {
    let mut cmd = Command::new(program);
    cmd.args(args).stdout(Stdio::piped()).stderr(Stdio::piped()).stdin(Stdio::null());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            EngineError::fatal(e)
        } else {
            EngineError::transient("subprocess spawn", e)
        }
    })?;

    let stdout = child.stdout.take().expect("stdout was piped");
    let stderr = child.stderr.take().expect("stderr was piped");
    let mut stdout_lines = BufReader::new(stdout).lines();
    let mut stderr_lines = BufReader::new(stderr).lines();

    let mut stdout_buf = Vec::new();
    let mut stderr_buf = Vec::new();

    let wait_body = async {
        loop {
            tokio::select! {
                line = stdout_lines.next_line() => {
                    match line {
                        Ok(Some(l)) => { trace!("stdout: {l}"); stdout_buf.extend_from_slice(l.as_bytes()); stdout_buf.push(b'\n'); }
                        Ok(None) => {}
                        Err(e) => { warn!("stdout read error: {e}"); }
                    }
                }
                line = stderr_lines.next_line() => {
                    match line {
                        Ok(Some(l)) => { on_stderr_line(&l); stderr_buf.extend_from_slice(l.as_bytes()); stderr_buf.push(b'\n'); }
                        Ok(None) => {}
                        Err(e) => { warn!("stderr read error: {e}"); }
                    }
                }
                status = child.wait() => {
                    return status;
                }
            }
        }
    };

    let wait_result = tokio::select! {
        status = wait_body => Some(status),
        _ = cancel.cancelled() => None,
        _ = async { match timeout { Some(d) => tokio::time::sleep(d).await, None => std::future::pending().await } } => None,
    };

    match wait_result {
        Some(Ok(status)) => Ok(Output { status_code: status.code(), stdout: stdout_buf, stderr: stderr_buf }),
        Some(Err(e)) => Err(EngineError::transient("subprocess wait", e)),
        None => {
            terminate_then_kill(&mut child).await;
            let _ = child.wait().await;
            Err(EngineError::Cancelled)
        }
    }
}

/// SIGTERM, wait `TERMINATE_GRACE`, SIGKILL if still alive (§4.E "terminate
/// means SIGTERM ... short grace window before an unconditional SIGKILL").
async fn terminate_then_kill(child: &mut tokio::process::Child) {
    if let Some(raw_pid) = child.id() {
        let pid = Pid::from_raw(raw_pid as i32);
        if let Err(e) = signal::kill(pid, Signal::SIGTERM) {
            warn!("SIGTERM failed: {e}");
        }
    }

    tokio::select! {
        _ = child.wait() => return,
        _ = tokio::time::sleep(TERMINATE_GRACE) => {}
    }

    if let Err(e) = child.kill().await {
        warn!("SIGKILL failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_exit_status() {
        let output = run("echo", &["hello".to_string()], None, CancellationToken::new(), Some(SHORT_COMMAND_TIMEOUT), |_| {}).await.unwrap();
        assert!(output.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hello");
    }

    #[tokio::test]
    async fn missing_binary_is_a_fatal_error() {
        let result = run("definitely-not-a-real-binary-xyz", &[], None, CancellationToken::new(), None, |_| {}).await;
        assert!(matches!(result, Err(EngineError::Fatal(_))));
    }

    #[tokio::test]
    async fn stderr_lines_reach_the_callback() {
        let mut seen = Vec::new();
        let output = run("sh", &["-c".to_string(), "echo oops 1>&2".to_string()], None, CancellationToken::new(), Some(SHORT_COMMAND_TIMEOUT), |line| seen.push(line.to_string())).await.unwrap();
        assert!(output.success());
        assert_eq!(seen, vec!["oops".to_string()]);
    }

    #[tokio::test]
    async fn cancellation_during_a_long_running_command_yields_cancelled() {
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel_clone.cancel();
        });
        let result = run("sleep", &["10".to_string()], None, cancel, None, |_| {}).await;
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }
}
