use std::process::Stdio;

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};

use crate::error::{QueueError, Result};
use crate::worker::command::SysbenchCommand;

/// Output of an exited benchmark process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Text kept as the failure reason: stderr, or the exit code when the
    /// process wrote nothing there.
    pub fn error_text(&self) -> String {
        if self.stderr.trim().is_empty() {
            match self.exit_code {
                Some(code) => format!("Exit code: {}", code),
                None => "Terminated by signal".to_string(),
            }
        } else {
            self.stderr.clone()
        }
    }
}

/// A spawned benchmark process.
#[derive(Debug)]
pub struct RunningProcess {
    pub pid: u32,
    child: Child,
}

/// Starts benchmark processes, waits for them and kills them on request.
///
/// Each process is started as the leader of its own process group so that
/// killing it also takes down anything it forked; otherwise an orphaned child
/// could keep the output pipes open.
#[derive(Debug, Clone, Default)]
pub struct ProcessSupervisor;

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self
    }

    /// Spawn `command` with stdout and stderr piped.
    pub fn spawn(&self, command: &SysbenchCommand) -> Result<RunningProcess> {
        tracing::info!(command = %command.display(), "Spawning benchmark process");

        let child = Command::new(command.program())
            .args(command.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn()
            .map_err(QueueError::Spawn)?;

        let pid = child.id().ok_or_else(|| {
            QueueError::Spawn(std::io::Error::other("process exited before its pid was read"))
        })?;

        Ok(RunningProcess { pid, child })
    }

    /// Block until the process exits, capturing both streams in full.
    pub async fn wait(&self, process: RunningProcess) -> Result<ProcessOutcome> {
        let pid = process.pid;
        let output = process.child.wait_with_output().await?;

        let outcome = ProcessOutcome {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        tracing::info!(pid, exit_code = ?outcome.exit_code, "Benchmark process exited");
        Ok(outcome)
    }

    /// Kill the process group led by `pid`. A process that is already gone is
    /// not an error.
    pub fn terminate(&self, pid: u32) -> Result<()> {
        let raw = i32::try_from(pid)
            .map_err(|_| QueueError::Io(std::io::Error::other(format!("invalid pid {}", pid))))?;

        match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
            Ok(()) => {
                tracing::info!(pid, "Killed benchmark process");
                Ok(())
            }
            Err(Errno::ESRCH) => {
                tracing::debug!(pid, "Benchmark process already exited");
                Ok(())
            }
            Err(errno) => {
                tracing::error!(pid, error = %errno, "Failed to kill benchmark process");
                Err(QueueError::Io(errno.into()))
            }
        }
    }
}
