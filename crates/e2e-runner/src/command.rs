//! Child process execution with streamed output
//!
//! Provisioning and the test suite are long-running external tools. Their
//! output is streamed line by line into `tracing` and kept for log files.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// What to run
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
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

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Execution limits
#[derive(Debug, Clone)]
pub struct CommandConfig {
    /// Kills the process if exceeded
    pub timeout: Duration,
    /// Time to wait for streaming tasks to flush after the command completes
    pub stream_flush_timeout: Duration,
}

impl CommandConfig {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            stream_flush_timeout: Duration::from_secs(5),
        }
    }
}

/// Result of a completed command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    /// Interleaved stdout and stderr lines in arrival order
    pub lines: Vec<String>,
}

/// Run a command, streaming its output into `tracing` under `label`.
///
/// Returns `Ok` with `success == false` on a non-zero exit; `Err` on spawn
/// failure or timeout. The child is killed if the returned future is dropped.
pub async fn run_command_streaming(
    label: &str,
    spec: &CommandSpec,
    config: &CommandConfig,
) -> Result<CommandOutput> {
    info!(
        label = %label,
        cmd = %spec.program,
        args = ?spec.args,
        timeout_secs = config.timeout.as_secs(),
        "Running command"
    );

    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .envs(spec.env.iter().map(|(k, v)| (k, v)))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &spec.cwd {
        command.current_dir(cwd);
    }

    let mut child = command
        .spawn()
        .with_context(|| format!("Failed to spawn command: {}", spec.program))?;

    let stdout = child.stdout.take().context("Failed to capture stdout")?;
    let stderr = child.stderr.take().context("Failed to capture stderr")?;

    let lines = Arc::new(Mutex::new(Vec::new()));
    let stdout_handle = stream_lines(label, stdout, lines.clone());
    let stderr_handle = stream_lines(label, stderr, lines.clone());

    let success = match tokio::time::timeout(config.timeout, child.wait()).await {
        Ok(Ok(status)) => status.success(),
        Ok(Err(e)) => return Err(e).context("Failed waiting for command"),
        Err(_) => {
            warn!(
                cmd = %spec.program,
                timeout_secs = config.timeout.as_secs(),
                "Command timed out, killing process"
            );
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to kill timed-out process");
            }
            anyhow::bail!(
                "Command '{}' timed out after {}s",
                spec.program,
                config.timeout.as_secs()
            );
        }
    };

    let _ = tokio::time::timeout(config.stream_flush_timeout, stdout_handle).await;
    let _ = tokio::time::timeout(config.stream_flush_timeout, stderr_handle).await;

    let lines = std::mem::take(&mut *lines.lock().unwrap_or_else(|e| e.into_inner()));
    Ok(CommandOutput { success, lines })
}

fn stream_lines<R>(label: &str, reader: R, sink: Arc<Mutex<Vec<String>>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let label = label.to_string();
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            info!(target: "e2e_runner::output", label = %label, "{line}");
            sink.lock().unwrap_or_else(|e| e.into_inner()).push(line);
        }
    })
}
