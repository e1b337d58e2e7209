//! Single-shot execution of one toolkit command.
//!
//! The runner spawns a command line under the configured shell with the
//! toolkit environment sourced first, merges stdout and stderr into one
//! stream, and hands each line to a [`LineSink`] after appending it to the
//! stage transcript. The process handle is registered with the
//! [`JobRegistry`] before the first read so a stop request can reach it.

use crate::config::models::AppConfig;
use crate::exec::sink::LineSink;
use crate::state::process::ProcessHandle;
use crate::state::registry::JobRegistry;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal::{killpg, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

const RULE_WIDTH: usize = 60;

/// One command invocation.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub run_id: String,
    /// Stage label used in transcript headers and marker lines.
    pub stage: String,
    pub command_line: String,
    pub work_dir: PathBuf,
    /// Stage transcript; truncated on start.
    pub log_file: PathBuf,
    /// Strings to look for anywhere in the output.
    pub watch_for: Vec<String>,
    /// Line prefixes whose first occurrence is kept, e.g. `cells:`.
    pub capture: Vec<String>,
}

impl CommandRequest {
    pub fn new(
        run_id: impl Into<String>,
        stage: impl Into<String>,
        command_line: impl Into<String>,
        work_dir: impl Into<PathBuf>,
        log_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            stage: stage.into(),
            command_line: command_line.into(),
            work_dir: work_dir.into(),
            log_file: log_file.into(),
            watch_for: Vec::new(),
            capture: Vec::new(),
        }
    }

    pub fn watch(mut self, marker: impl Into<String>) -> Self {
        self.watch_for.push(marker.into());
        self
    }

    /// Keep the rest of the first line that starts with `prefix`, leading
    /// whitespace ignored.
    pub fn capture(mut self, prefix: impl Into<String>) -> Self {
        self.capture.push(prefix.into());
        self
    }
}

/// What a finished command left behind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal or never ran.
    pub exit_code: Option<i32>,
    /// The last lines of output, oldest first.
    pub tail: Vec<String>,
    /// Watched markers that appeared at least once.
    pub markers_seen: Vec<String>,
    /// `(prefix, rest of line)` for each captured prefix that appeared.
    pub captured: Vec<(String, String)>,
    /// The process was terminated by a stop request, or never spawned
    /// because one was pending.
    pub cancelled: bool,
    pub spawn_error: Option<String>,
}

impl CommandOutput {
    pub fn spawn_failure(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            tail: vec![message.clone()],
            spawn_error: Some(message),
            ..Self::default()
        }
    }

    pub fn cancelled() -> Self {
        Self {
            cancelled: true,
            ..Self::default()
        }
    }

    /// Ran to completion with exit code zero.
    pub fn success(&self) -> bool {
        !self.cancelled && self.spawn_error.is_none() && self.exit_code == Some(0)
    }

    pub fn saw(&self, marker: &str) -> bool {
        self.markers_seen.iter().any(|m| m == marker)
    }

    pub fn captured(&self, prefix: &str) -> Option<&str> {
        self.captured
            .iter()
            .find(|(p, _)| p == prefix)
            .map(|(_, rest)| rest.as_str())
    }

    /// Human-readable failure summary naming `what` ran.
    pub fn failure_message(&self, what: &str) -> String {
        if let Some(err) = &self.spawn_error {
            return format!("{what} could not be started: {err}");
        }
        if self.cancelled {
            return format!("{what} was stopped");
        }
        let code = describe_exit(self.exit_code);
        match self.tail.iter().rev().find(|l| !l.trim().is_empty()) {
            Some(last) => format!("{what} failed (exit code: {code}): {}", last.trim()),
            None => format!("{what} failed (exit code: {code})"),
        }
    }
}

fn describe_exit(code: Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |c| c.to_string())
}

/// Executes one command for a stage.
///
/// Implementations are single-shot: no retries. Failures are reported in
/// the returned [`CommandOutput`], never as a panic or error.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, request: &CommandRequest, sink: &dyn LineSink) -> CommandOutput;
}

/// Runs commands through a shell with the toolkit environment sourced.
pub struct ShellProcessRunner {
    shell: PathBuf,
    toolkit_env: Option<PathBuf>,
    registry: JobRegistry,
    tail_lines: usize,
    stop_grace: Duration,
}

impl ShellProcessRunner {
    pub fn new(shell: impl Into<PathBuf>, registry: JobRegistry) -> Self {
        Self {
            shell: shell.into(),
            toolkit_env: None,
            registry,
            tail_lines: 50,
            stop_grace: Duration::from_secs(5),
        }
    }

    pub fn from_config(config: &AppConfig, registry: JobRegistry) -> Self {
        Self::new(&config.shell, registry)
            .with_toolkit_env(config.toolkit_env().map(Path::to_path_buf))
            .with_tail_lines(config.tail_lines)
            .with_stop_grace(Duration::from_secs(config.stop_grace_seconds))
    }

    pub fn with_toolkit_env(mut self, env: Option<PathBuf>) -> Self {
        self.toolkit_env = env;
        self
    }

    pub fn with_tail_lines(mut self, lines: usize) -> Self {
        self.tail_lines = lines;
        self
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    fn script(&self, command_line: &str) -> String {
        match &self.toolkit_env {
            Some(env) => format!(
                "exec 2>&1\n. {} && {command_line}",
                shell_quote(&env.to_string_lossy())
            ),
            None => format!("exec 2>&1\n{command_line}"),
        }
    }

    /// SIGTERM the process group, then SIGKILL the leader after the grace
    /// period. Returns the exit code, if any.
    async fn terminate(&self, pid: u32, child: &mut Child) -> Option<i32> {
        #[cfg(unix)]
        match process_group(pid) {
            Some(group) => match killpg(group, Signal::SIGTERM) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => warn!(pid, error = %e, "failed to signal process group"),
            },
            None => debug!(pid, "no process group to signal"),
        }

        match tokio::time::timeout(self.stop_grace, child.wait()).await {
            Ok(Ok(status)) => return status.code(),
            Ok(Err(e)) => warn!(pid, error = %e, "failed to wait for terminated process"),
            Err(_) => info!(pid, "process outlived grace period; killing"),
        }

        if let Err(e) = child.kill().await {
            warn!(pid, error = %e, "failed to kill process");
        }
        child.try_wait().ok().flatten().and_then(|s| s.code())
    }
}

#[async_trait]
impl ProcessRunner for ShellProcessRunner {
    async fn run(&self, request: &CommandRequest, sink: &dyn LineSink) -> CommandOutput {
        let run_id = request.run_id.as_str();
        let stage = request.stage.as_str();

        if self.registry.is_stop_requested(run_id).await {
            info!(run_id, stage, "stop pending; not spawning");
            return CommandOutput::cancelled();
        }

        let mut transcript = Transcript::create(&request.log_file).await;
        transcript.header(request).await;
        sink.line(&format!("[{stage}] Running: {}", request.command_line))
            .await;

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(self.script(&request.command_line))
            .current_dir(&request.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        info!(run_id, stage, cmd = %request.command_line, "starting process");

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let message = format!(
                    "Failed to spawn command '{}': {e}",
                    request.command_line
                );
                warn!(run_id, stage, error = %e, "spawn failed");
                transcript.write_line(&message).await;
                transcript.footer(None).await;
                sink.line(&message).await;
                sink.line(&format!("[{stage}] failed (exit code: none)")).await;
                return CommandOutput::spawn_failure(message);
            }
        };

        let Some(pid) = child.id() else {
            // Already reaped; there is nothing left to track or stream.
            let exit_code = child.wait().await.ok().and_then(|s| s.code());
            transcript.footer(exit_code).await;
            return CommandOutput {
                exit_code,
                ..CommandOutput::default()
            };
        };
        let (handle, mut cancel_rx) = ProcessHandle::new(pid, stage);
        if self.registry.register_process(run_id, handle).await.is_err() {
            info!(run_id, stage, pid, "stop requested during spawn; terminating");
            let exit_code = self.terminate(pid, &mut child).await;
            transcript.footer(exit_code).await;
            return CommandOutput {
                exit_code,
                ..CommandOutput::cancelled()
            };
        }

        let Some(stdout) = child.stdout.take() else {
            let exit_code = self.terminate(pid, &mut child).await;
            self.registry.release_process(run_id, pid).await;
            transcript.footer(exit_code).await;
            return CommandOutput::spawn_failure("Failed to capture process output");
        };

        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        let mut tail: VecDeque<String> = VecDeque::with_capacity(self.tail_lines);
        let mut markers_seen: Vec<String> = Vec::new();
        let mut captured: Vec<(String, String)> = Vec::new();
        let mut cancelled = false;
        let mut listening = true;

        loop {
            tokio::select! {
                biased;

                signal = &mut cancel_rx, if listening => {
                    if signal.is_ok() {
                        cancelled = true;
                        break;
                    }
                    // Handle dropped without a stop request.
                    listening = false;
                }

                read = reader.read_until(b'\n', &mut buf) => match read {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = decode_line(&buf);
                        buf.clear();

                        transcript.write_line(&line).await;
                        sink.line(&line).await;

                        for marker in &request.watch_for {
                            if !markers_seen.contains(marker) && line.contains(marker.as_str()) {
                                markers_seen.push(marker.clone());
                            }
                        }
                        capture_line(&request.capture, &line, &mut captured);
                        if self.tail_lines > 0 {
                            if tail.len() == self.tail_lines {
                                tail.pop_front();
                            }
                            tail.push_back(line);
                        }
                    }
                    Err(e) => {
                        warn!(run_id, stage, error = %e, "failed to read process output");
                        break;
                    }
                },
            }
        }

        let exit_code = if cancelled {
            self.terminate(pid, &mut child).await
        } else {
            loop {
                tokio::select! {
                    biased;

                    signal = &mut cancel_rx, if listening => {
                        if signal.is_ok() {
                            cancelled = true;
                            break self.terminate(pid, &mut child).await;
                        }
                        listening = false;
                    }

                    status = child.wait() => break match status {
                        Ok(status) => status.code(),
                        Err(e) => {
                            warn!(run_id, stage, error = %e, "failed to wait for process");
                            None
                        }
                    },
                }
            }
        };

        self.registry.release_process(run_id, pid).await;
        transcript.footer(exit_code).await;

        let output = CommandOutput {
            exit_code,
            tail: tail.into(),
            markers_seen,
            captured,
            cancelled,
            spawn_error: None,
        };

        let verdict = if output.cancelled {
            "stopped"
        } else if output.success() {
            "completed"
        } else {
            "failed"
        };
        sink.line(&format!(
            "[{stage}] {verdict} (exit code: {})",
            describe_exit(exit_code)
        ))
        .await;

        info!(run_id, stage, pid, exit_code, cancelled, "process finished");
        output
    }
}

/// Process group led by `pid`. Commands are spawned as group leaders, so
/// the group id is the pid. Pid 0 would address the caller's own group.
#[cfg(unix)]
fn process_group(pid: u32) -> Option<Pid> {
    i32::try_from(pid)
        .ok()
        .filter(|raw| *raw > 0)
        .map(Pid::from_raw)
}

fn capture_line(prefixes: &[String], line: &str, captured: &mut Vec<(String, String)>) {
    let text = line.trim_start();
    for prefix in prefixes {
        if captured.iter().any(|(p, _)| p == prefix) {
            continue;
        }
        if let Some(rest) = text.strip_prefix(prefix.as_str()) {
            captured.push((prefix.clone(), rest.trim().to_string()));
        }
    }
}

fn decode_line(buf: &[u8]) -> String {
    String::from_utf8_lossy(buf)
        .trim_end_matches(['\n', '\r'])
        .to_string()
}

/// Single-quote `s` for a POSIX shell.
pub(crate) fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Per-stage transcript. Write failures are logged once and further writes
/// are dropped; the command keeps running.
struct Transcript {
    path: PathBuf,
    file: Option<File>,
}

impl Transcript {
    async fn create(path: &Path) -> Self {
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!(path = %parent.display(), error = %e, "failed to create transcript directory");
            }
        }
        let file = match File::create(path).await {
            Ok(file) => Some(file),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to create transcript");
                None
            }
        };
        Self {
            path: path.to_path_buf(),
            file,
        }
    }

    async fn write_line(&mut self, line: &str) {
        let Some(file) = self.file.as_mut() else {
            return;
        };
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
        let result = match file.write_all(&bytes).await {
            Ok(()) => file.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(path = %self.path.display(), error = %e, "failed to append to transcript");
            self.file = None;
        }
    }

    async fn header(&mut self, request: &CommandRequest) {
        let rule = "=".repeat(RULE_WIDTH);
        for line in [
            format!("# Step: {}", request.stage),
            format!("# Command: {}", request.command_line),
            format!("# Directory: {}", request.work_dir.display()),
            format!("# Started: {}", Utc::now().to_rfc3339()),
            rule,
            String::new(),
        ] {
            self.write_line(&line).await;
        }
        debug!(path = %self.path.display(), "transcript opened");
    }

    async fn footer(&mut self, exit_code: Option<i32>) {
        let rule = "=".repeat(RULE_WIDTH);
        for line in [
            String::new(),
            rule,
            format!("# Return code: {}", describe_exit(exit_code)),
            format!("# Finished: {}", Utc::now().to_rfc3339()),
        ] {
            self.write_line(&line).await;
        }
    }
}
