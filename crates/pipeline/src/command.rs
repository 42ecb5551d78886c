//! [`ResearchCrew`] backed by an external program.
//!
//! The program receives the job's [`CrewInputs`] as JSON on stdin. Every
//! stdout and stderr line is streamed into the job's output capture as it
//! arrives, and the last non-empty stdout line is parsed as the JSON
//! result. A line that is not JSON is used as the raw result text.
//!
//! The program runs in its own process group. On timeout the whole group
//! is killed, so helpers it started cannot hold the job open.

use std::io::Write;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::runtime::Handle;

use crate::crew::{BodyError, CrewFactory, CrewInputs, CrewOutput, ResearchCrew};
use crate::sink::CaptureWriter;

/// Builds [`CommandCrew`]s for a configured program.
#[derive(Debug, Clone)]
pub struct CommandCrewFactory {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandCrewFactory {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    /// Split a whitespace-separated command line such as
    /// `python -m research_crew`.
    pub fn from_command_line(line: &str, timeout: Duration) -> Self {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next().unwrap_or_default();
        Self::new(program, parts.collect(), timeout)
    }
}

impl CrewFactory for CommandCrewFactory {
    /// Must be called from within a Tokio runtime; the crew drives its
    /// child process on that runtime from the blocking worker.
    fn build(&self, _inputs: &CrewInputs) -> Result<Box<dyn ResearchCrew>, BodyError> {
        if self.program.is_empty() {
            return Err(BodyError::internal("research command is not configured"));
        }
        let handle = Handle::try_current()
            .map_err(|e| BodyError::internal(format!("no async runtime for research command: {e}")))?;
        Ok(Box::new(CommandCrew {
            program: self.program.clone(),
            args: self.args.clone(),
            timeout: self.timeout,
            handle,
        }))
    }
}

/// Factory used when no research command is configured. Every build fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredCrewFactory;

impl CrewFactory for UnconfiguredCrewFactory {
    fn build(&self, _inputs: &CrewInputs) -> Result<Box<dyn ResearchCrew>, BodyError> {
        Err(BodyError::internal("RESEARCH_COMMAND is not set"))
    }
}

pub struct CommandCrew {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    handle: Handle,
}

impl ResearchCrew for CommandCrew {
    fn run(
        &self,
        inputs: &CrewInputs,
        output: &mut CrewOutput,
    ) -> Result<serde_json::Value, BodyError> {
        self.handle.block_on(self.execute(inputs, output))
    }
}

impl CommandCrew {
    async fn execute(
        &self,
        inputs: &CrewInputs,
        output: &mut CrewOutput,
    ) -> Result<serde_json::Value, BodyError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| BodyError::internal(format!("failed to start {}: {e}", self.program)))?;
        let pid = child.id();

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let payload = serde_json::to_vec(inputs).unwrap_or_default();

        let exchange = async {
            let feed = async move {
                if let Some(mut stdin) = stdin {
                    // The program may exit without reading its input.
                    let _ = stdin.write_all(&payload).await;
                }
            };
            let ((), last_line, _) = tokio::join!(
                feed,
                pump(stdout, &mut output.stdout),
                pump(stderr, &mut output.stderr),
            );
            (last_line, child.wait().await)
        };

        let (last_line, status) = match tokio::time::timeout(self.timeout, exchange).await {
            Ok(done) => done,
            Err(_) => {
                tracing::warn!(
                    program = %self.program,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Research process timed out, killing its process group",
                );
                kill_process_group(pid);
                return Err(BodyError::timeout("timeout"));
            }
        };

        let status = status.map_err(|e| {
            BodyError::internal(format!("failed to wait for research process: {e}"))
        })?;
        if !status.success() {
            let code = status
                .code()
                .map_or_else(|| "a signal".to_string(), |c| format!("code {c}"));
            return Err(BodyError::upstream(format!(
                "{} exited with {code}",
                self.program
            )));
        }

        let line = last_line
            .ok_or_else(|| BodyError::internal(format!("{} produced no result", self.program)))?;
        Ok(serde_json::from_str(&line).unwrap_or(serde_json::Value::String(line)))
    }
}

/// Copy `pipe` line by line into `writer`, returning the last non-empty line.
async fn pump<R: AsyncRead + Unpin>(pipe: Option<R>, writer: &mut CaptureWriter) -> Option<String> {
    let pipe = pipe?;
    let mut lines = BufReader::new(pipe).lines();
    let mut last = None;
    while let Ok(Some(line)) = lines.next_line().await {
        let _ = writeln!(writer, "{line}");
        if !line.trim().is_empty() {
            last = Some(line);
        }
    }
    let _ = writer.flush();
    last
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid else {
        return;
    };
    // Safety: killpg only sends a signal. The child was spawned with
    // `process_group(0)`, so its pid is the group id.
    let ret = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    if ret != 0 {
        tracing::debug!(
            pid,
            error = %std::io::Error::last_os_error(),
            "Failed to kill research process group",
        );
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}
