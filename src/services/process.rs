use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Errors from external-tool invocation.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Process error: {0}")]
    Io(#[from] std::io::Error),
}

/// An external-tool invocation: program, arguments, optional timeout.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Option<Duration>,
}

impl ToolCommand {
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: None,
        }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Argv rendered as one string, for logging and for matching in test fakes.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// Buffered result of a completed tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Which stream of a child process is tailed line-by-line; the other stream
/// is captured whole for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSource {
    Stdout,
    Stderr,
}

/// Final status of a streamed invocation.
#[derive(Debug, Clone)]
pub struct StreamExit {
    pub exit_code: i32,
    /// Full text of the non-streamed stream.
    pub captured: String,
}

/// A running child whose chosen stream arrives line-by-line.
///
/// The line sequence is finite and not restartable; once it ends, [`wait`]
/// yields the exit status and the captured companion stream.
///
/// [`wait`]: Self::wait
pub struct StreamingChild {
    lines: mpsc::Receiver<String>,
    status: JoinHandle<Result<StreamExit, ProcessError>>,
}

impl StreamingChild {
    /// Next line from the streamed source, or `None` when it is exhausted.
    pub async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }

    /// Wait for the child to exit.
    pub async fn wait(self) -> Result<StreamExit, ProcessError> {
        drop(self.lines);
        self.status
            .await
            .map_err(|e| ProcessError::Io(std::io::Error::other(e)))?
    }

    /// A pre-scripted child for test doubles of [`ProcessRunner`].
    pub fn scripted(lines: Vec<String>, exit: StreamExit) -> Self {
        let (tx, rx) = mpsc::channel(lines.len().max(1));
        let status = tokio::spawn(async move {
            for line in lines {
                let _ = tx.send(line).await;
            }
            Ok(exit)
        });
        Self { lines: rx, status }
    }
}

/// Capability seam for subprocess execution, so pipeline logic never depends
/// on the process substrate directly and is testable with a scripted runner.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run to completion, buffering both output streams.
    async fn run(&self, cmd: &ToolCommand) -> Result<ToolOutput, ProcessError>;

    /// Spawn and tail one output stream line-by-line.
    async fn stream(
        &self,
        cmd: &ToolCommand,
        source: StreamSource,
    ) -> Result<StreamingChild, ProcessError>;
}

/// Production [`ProcessRunner`] backed by `tokio::process`.
#[derive(Debug, Default, Clone)]
pub struct TokioProcessRunner;

impl TokioProcessRunner {
    pub fn new() -> Self {
        Self
    }

    fn command(cmd: &ToolCommand) -> Command {
        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, cmd: &ToolCommand) -> Result<ToolOutput, ProcessError> {
        tracing::debug!("Executing: {}", cmd.display());

        let child = Self::command(cmd).spawn().map_err(|e| ProcessError::Spawn {
            program: cmd.program.clone(),
            source: e,
        })?;

        let output = match cmd.timeout {
            Some(duration) => timeout(duration, child.wait_with_output())
                .await
                .map_err(|_| {
                    tracing::warn!("{} timed out after {:?}", cmd.program, duration);
                    ProcessError::Timeout(duration)
                })??,
            None => child.wait_with_output().await?,
        };

        Ok(ToolOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn stream(
        &self,
        cmd: &ToolCommand,
        source: StreamSource,
    ) -> Result<StreamingChild, ProcessError> {
        tracing::debug!("Streaming: {}", cmd.display());

        let mut child = Self::command(cmd).spawn().map_err(|e| ProcessError::Spawn {
            program: cmd.program.clone(),
            source: e,
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProcessError::Io(std::io::Error::other("stdout not captured")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ProcessError::Io(std::io::Error::other("stderr not captured")))?;

        let (streamed, companion): (
            Box<dyn AsyncRead + Unpin + Send>,
            Box<dyn AsyncRead + Unpin + Send>,
        ) = match source {
            StreamSource::Stdout => (Box::new(stdout), Box::new(stderr)),
            StreamSource::Stderr => (Box::new(stderr), Box::new(stdout)),
        };

        let (tx, rx) = mpsc::channel(256);
        let deadline = cmd.timeout;

        let status = tokio::spawn(async move {
            let stream_lines = async {
                let mut lines = BufReader::new(streamed).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tx.send(line).await.is_err() {
                        // Receiver gone; keep draining so the child never
                        // blocks on a full pipe.
                        continue;
                    }
                }
            };

            let capture = async {
                let mut buf = String::new();
                let _ = BufReader::new(companion).read_to_string(&mut buf).await;
                buf
            };

            let work = async {
                let ((), captured) = tokio::join!(stream_lines, capture);
                let status = child.wait().await?;
                Ok::<_, ProcessError>(StreamExit {
                    exit_code: status.code().unwrap_or(-1),
                    captured,
                })
            };

            match deadline {
                Some(duration) => match timeout(duration, work).await {
                    Ok(result) => result,
                    Err(_) => Err(ProcessError::Timeout(duration)),
                },
                None => work.await,
            }
        });

        Ok(StreamingChild { lines: rx, status })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_command_builder() {
        let cmd = ToolCommand::new("aip")
            .args(["--cache", "/tmp/cache"])
            .arg("toc")
            .arg("fetch")
            .arg("--vfr");

        assert_eq!(cmd.program, "aip");
        assert_eq!(cmd.args, vec!["--cache", "/tmp/cache", "toc", "fetch", "--vfr"]);
        assert_eq!(cmd.display(), "aip --cache /tmp/cache toc fetch --vfr");
        assert!(cmd.timeout.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_captures_output_and_exit_code() {
        let runner = TokioProcessRunner::new();
        let cmd = ToolCommand::new("sh").args(["-c", "echo out; echo err 1>&2; exit 3"]);

        let output = runner.run(&cmd).await.unwrap();
        assert_eq!(output.exit_code, 3);
        assert!(!output.success());
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stream_stdout_lines_and_companion_capture() {
        let runner = TokioProcessRunner::new();
        let cmd = ToolCommand::new("sh").args(["-c", "echo one; echo two; echo diag 1>&2"]);

        let mut child = runner.stream(&cmd, StreamSource::Stdout).await.unwrap();
        let mut lines = Vec::new();
        while let Some(line) = child.next_line().await {
            lines.push(line);
        }
        let exit = child.wait().await.unwrap();

        assert_eq!(lines, vec!["one", "two"]);
        assert_eq!(exit.exit_code, 0);
        assert_eq!(exit.captured.trim(), "diag");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stream_stderr_source() {
        let runner = TokioProcessRunner::new();
        let cmd = ToolCommand::new("sh").args(["-c", "echo page 1>&2; echo done"]);

        let mut child = runner.stream(&cmd, StreamSource::Stderr).await.unwrap();
        assert_eq!(child.next_line().await.as_deref(), Some("page"));
        assert_eq!(child.next_line().await, None);

        let exit = child.wait().await.unwrap();
        assert_eq!(exit.captured.trim(), "done");
    }

    #[tokio::test]
    async fn test_spawn_failure_reported() {
        let runner = TokioProcessRunner::new();
        let cmd = ToolCommand::new("/definitely/not/a/real/tool");

        let err = runner.run(&cmd).await.unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_scripted_child() {
        let exit = StreamExit {
            exit_code: 0,
            captured: String::new(),
        };
        let mut child = StreamingChild::scripted(vec!["a".to_string(), "b".to_string()], exit);

        assert_eq!(child.next_line().await.as_deref(), Some("a"));
        assert_eq!(child.next_line().await.as_deref(), Some("b"));
        assert_eq!(child.next_line().await, None);
        assert_eq!(child.wait().await.unwrap().exit_code, 0);
    }
}
