//! External tool execution
//!
//! Every invocation of yt-dlp, ffprobe or ffmpeg goes through [`run_tool`],
//! which binds the child process to an optional deadline and a cancellation
//! token. The child is spawned with `kill_on_drop`, so losing the race
//! against either one terminates it.

use media_normalizer_config::ToolConfig;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Only the end of stderr is kept in errors; tools can be very chatty.
const STDERR_TAIL_CHARS: usize = 2000;

/// Error type for external tool execution
#[derive(Debug, Error)]
pub enum ToolError {
    /// The program could not be started (missing binary, permissions)
    #[error("{tool} could not be started: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// The program ran and exited unsuccessfully
    #[error("{tool} exited with {}: {stderr}", exit_label(.code))]
    Failed {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    /// The deadline passed before the program finished
    #[error("{tool} timed out after {limit:?}")]
    TimedOut { tool: String, limit: Duration },

    /// The caller cancelled the run
    #[error("{tool} was cancelled")]
    Cancelled { tool: String },

    /// Waiting on the child failed
    #[error("IO error while waiting for {tool}: {source}")]
    Io {
        tool: String,
        #[source]
        source: std::io::Error,
    },
}

impl ToolError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ToolError::Cancelled { .. })
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "a signal".to_string(),
    }
}

/// Deadline and cancellation shared by the external invocations of one request
#[derive(Debug, Clone)]
pub struct RunControl {
    /// Upper bound for a single invocation (`None` = wait indefinitely)
    pub timeout: Option<Duration>,
    /// Cancelling this token kills whatever tool is currently running
    pub cancel: CancellationToken,
}

impl RunControl {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            timeout: None,
            cancel,
        }
    }

    /// Same token, different deadline
    pub fn with_timeout(&self, timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            cancel: self.cancel.clone(),
        }
    }
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

/// Converts a configured number of seconds into a deadline, 0 meaning none.
pub fn timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Captured output of a successful invocation
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: Vec<u8>,
    pub stderr: String,
}

/// Starts a command for the configured program, with its prefix arguments
/// already applied.
pub fn tool_command(tool: &ToolConfig) -> Command {
    let mut cmd = Command::new(&tool.program);
    cmd.args(&tool.prefix_args);
    cmd
}

/// Renders a command as a single line for logging.
pub fn command_line(cmd: &Command) -> String {
    let std_cmd = cmd.as_std();
    std::iter::once(std_cmd.get_program())
        .chain(std_cmd.get_args())
        .map(|part| part.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let count = text.chars().count();
    if count <= STDERR_TAIL_CHARS {
        return text.to_string();
    }
    text.chars().skip(count - STDERR_TAIL_CHARS).collect()
}

/// Runs `cmd` to completion, honoring the deadline and cancellation token
/// in `ctl`.
///
/// Stdout and stderr are captured. A non-zero exit becomes
/// [`ToolError::Failed`] carrying the tail of stderr.
pub async fn run_tool(
    tool: &str,
    mut cmd: Command,
    ctl: &RunControl,
) -> Result<ToolOutput, ToolError> {
    if ctl.cancel.is_cancelled() {
        return Err(ToolError::Cancelled {
            tool: tool.to_string(),
        });
    }

    tracing::debug!(tool, command = %command_line(&cmd), "running external tool");

    cmd.kill_on_drop(true)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let child = cmd.spawn().map_err(|source| ToolError::Spawn {
        tool: tool.to_string(),
        source,
    })?;

    let limit = ctl.timeout;
    let run = async move {
        let waited = match limit {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| ToolError::TimedOut {
                    tool: tool.to_string(),
                    limit,
                })?,
            None => child.wait_with_output().await,
        };
        waited.map_err(|source| ToolError::Io {
            tool: tool.to_string(),
            source,
        })
    };

    // Dropping the losing branch drops the child, which kills it.
    let output = tokio::select! {
        res = run => res?,
        _ = ctl.cancel.cancelled() => {
            return Err(ToolError::Cancelled { tool: tool.to_string() });
        }
    };

    if output.status.success() {
        Ok(ToolOutput {
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    } else {
        if !output.stdout.is_empty() {
            tracing::debug!(
                tool,
                stdout = %String::from_utf8_lossy(&output.stdout).trim(),
                "tool output before failure"
            );
        }
        Err(ToolError::Failed {
            tool: tool.to_string(),
            code: output.status.code(),
            stderr: stderr_tail(&output.stderr),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn shell(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[tokio::test]
    async fn test_captures_stdout_on_success() {
        let out = run_tool("sh", shell("printf hello"), &RunControl::default())
            .await
            .expect("sh should succeed");
        assert_eq!(out.stdout, b"hello");
    }

    #[tokio::test]
    async fn test_non_zero_exit_reports_code_and_stderr() {
        let err = run_tool(
            "sh",
            shell("echo broken pipe >&2; exit 3"),
            &RunControl::default(),
        )
        .await
        .unwrap_err();

        match err {
            ToolError::Failed { tool, code, stderr } => {
                assert_eq!(tool, "sh");
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "broken pipe");
            }
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let cmd = Command::new("definitely-not-a-real-tool-8731");
        let err = run_tool("fake", cmd, &RunControl::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_timeout_kills_long_running_tool() {
        let ctl = RunControl::default().with_timeout(Some(Duration::from_millis(100)));
        let started = Instant::now();
        let err = run_tool("sh", shell("sleep 5"), &ctl).await.unwrap_err();

        assert!(matches!(err, ToolError::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_cancellation_kills_running_tool() {
        let ctl = RunControl::default();
        let token = ctl.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            token.cancel();
        });

        let started = Instant::now();
        let err = run_tool("sh", shell("sleep 5"), &ctl).await.unwrap_err();

        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_already_cancelled_never_spawns() {
        let ctl = RunControl::default();
        ctl.cancel.cancel();
        let cmd = Command::new("definitely-not-a-real-tool-8731");
        let err = run_tool("fake", cmd, &ctl).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_tool_command_applies_prefix_args() {
        let tool = ToolConfig {
            program: "python3".to_string(),
            prefix_args: vec!["-m".to_string(), "yt_dlp".to_string()],
        };
        let mut cmd = tool_command(&tool);
        cmd.arg("--version");
        assert_eq!(command_line(&cmd), "python3 -m yt_dlp --version");
    }

    #[test]
    fn test_timeout_from_secs_zero_is_unbounded() {
        assert_eq!(timeout_from_secs(0), None);
        assert_eq!(timeout_from_secs(30), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_stderr_tail_keeps_end() {
        let long = "x".repeat(STDERR_TAIL_CHARS) + "END";
        let tail = stderr_tail(long.as_bytes());
        assert_eq!(tail.chars().count(), STDERR_TAIL_CHARS);
        assert!(tail.ends_with("END"));
    }
}
