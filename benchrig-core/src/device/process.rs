// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Worker process management.
//!
//! Spawns worker processes with a piped stdout, streams their output line by
//! line, and guarantees termination: SIGTERM, a grace period, then SIGKILL.
//! Each worker leads its own process group and signals go to the whole
//! group, so anything the worker forked is stopped with it.

use std::collections::BTreeMap;
use std::os::unix::process::CommandExt;
use std::process::{Command as StdCommand, ExitStatus, Stdio};
use std::time::Duration;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};

use crate::error::DeviceError;
use crate::types::ProcessId;

/// Device-independent part of a worker invocation: the argument vector and
/// the environment describing the running experiment. The device decides
/// which program runs it and how it reaches the target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerCommand {
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

/// A launched worker process.
pub struct WorkerProcess {
    /// Child process handle.
    child: Child,
    /// Reader over the worker's stdout.
    stdout: BufReader<ChildStdout>,
    /// Bytes of a line not yet terminated by a newline.
    pending: Vec<u8>,
    /// Process ID, if the OS reported one.
    pid: Option<ProcessId>,
    /// Program name for diagnostics.
    program: String,
}

impl WorkerProcess {
    /// Spawn `command` as a worker in a new process group. Stdin is closed,
    /// stdout is captured for the event stream and stderr is inherited.
    pub(crate) fn spawn(mut command: StdCommand, program: String) -> Result<Self, DeviceError> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .process_group(0);
        let mut command = Command::from(command);
        command.kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| DeviceError::SpawnFailed {
            program: program.clone(),
            reason: e.to_string(),
        })?;

        let stdout = child.stdout.take().ok_or_else(|| DeviceError::SpawnFailed {
            program: program.clone(),
            reason: "worker stdout was not captured".to_string(),
        })?;

        let pid = child.id().and_then(ProcessId::new);

        tracing::debug!(
            program = %program,
            pid = pid.map(|p| p.value()),
            "Spawned worker process"
        );

        Ok(Self {
            child,
            stdout: BufReader::new(stdout),
            pending: Vec::new(),
            pid,
            program,
        })
    }

    /// Get the process ID.
    pub fn pid(&self) -> Option<ProcessId> {
        self.pid
    }

    /// Get the program name.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Read the next line of worker output as raw bytes, without the line
    /// terminator. `Ok(None)` means stdout closed. Cancel-safe: a partially
    /// read line is kept until the next call, so this can sit in a `select!`
    /// next to a timeout.
    pub async fn next_line(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        let read = self.stdout.read_until(b'\n', &mut self.pending).await?;
        if read == 0 && self.pending.is_empty() {
            return Ok(None);
        }

        let mut line = std::mem::take(&mut self.pending);
        if line.last() == Some(&b'\n') {
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
        }
        Ok(Some(line))
    }

    /// Wait for the worker to exit.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Check if the process is still running.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Send `signal` to the worker's process group. Fails with ESRCH once
    /// every member has exited, which callers ignore.
    fn signal_group(&self, signal: Signal) -> nix::Result<()> {
        match self.pid {
            Some(pid) => killpg(Pid::from_raw(pid.value() as i32), signal),
            None => Ok(()),
        }
    }

    /// Terminate the worker and its process group: SIGTERM, wait up to
    /// `grace`, then SIGKILL. Returns once the worker has been reaped.
    /// Descendants still alive at that point are killed too.
    pub async fn terminate(&mut self, grace: Duration) {
        if self.is_running() {
            let _ = self.signal_group(Signal::SIGTERM);

            if tokio::time::timeout(grace, self.child.wait()).await.is_err() {
                tracing::warn!(
                    program = %self.program,
                    pid = self.pid.map(|p| p.value()),
                    grace_ms = grace.as_millis() as u64,
                    "Worker ignored SIGTERM, killing"
                );
                let _ = self.signal_group(Signal::SIGKILL);
                if let Err(e) = self.child.kill().await {
                    tracing::error!(program = %self.program, error = %e, "Failed to kill worker");
                }
            }
        }

        // Leftover children of an exited worker.
        let _ = self.signal_group(Signal::SIGKILL);
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.signal_group(Signal::SIGKILL);
            let _ = self.child.start_kill();
        }
    }
}

impl std::fmt::Debug for WorkerProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerProcess")
            .field("program", &self.program)
            .field("pid", &self.pid)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str) -> StdCommand {
        let mut command = StdCommand::new("/bin/sh");
        command.arg("-c").arg(script);
        command
    }

    #[tokio::test]
    async fn test_streams_lines_until_eof() {
        let mut worker =
            WorkerProcess::spawn(sh("echo one; echo two"), "sh".to_string()).unwrap();
        assert!(worker.pid().is_some());
        assert_eq!(worker.next_line().await.unwrap().as_deref(), Some(&b"one"[..]));
        assert_eq!(worker.next_line().await.unwrap().as_deref(), Some(&b"two"[..]));
        assert_eq!(worker.next_line().await.unwrap(), None);
        assert!(worker.wait().await.unwrap().success());
    }

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let command = StdCommand::new("/nonexistent/benchrig-worker");
        let err = WorkerProcess::spawn(command, "/nonexistent/benchrig-worker".to_string())
            .unwrap_err();
        assert!(matches!(err, DeviceError::SpawnFailed { .. }));
    }

    #[tokio::test]
    async fn test_terminate_stops_sleeping_worker() {
        let mut worker = WorkerProcess::spawn(sh("sleep 30"), "sh".to_string()).unwrap();
        let start = Instant::now();
        worker.terminate(Duration::from_millis(500)).await;
        assert!(!worker.is_running());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_terminate_kills_worker_ignoring_sigterm() {
        let mut worker = WorkerProcess::spawn(
            sh("trap '' TERM; echo ready; while true; do sleep 1; done"),
            "sh".to_string(),
        )
        .unwrap();
        assert_eq!(worker.next_line().await.unwrap().as_deref(), Some(&b"ready"[..]));

        worker.terminate(Duration::from_millis(200)).await;
        assert!(!worker.is_running());
    }

    #[tokio::test]
    async fn test_unterminated_last_line() {
        let mut worker =
            WorkerProcess::spawn(sh("printf 'DONE\\r\\nlast'"), "sh".to_string()).unwrap();
        assert_eq!(worker.next_line().await.unwrap().as_deref(), Some(&b"DONE"[..]));
        assert_eq!(worker.next_line().await.unwrap().as_deref(), Some(&b"last"[..]));
        assert_eq!(worker.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_terminate_kills_forked_children() {
        let mut worker = WorkerProcess::spawn(
            sh("sleep 30 & echo $!; wait"),
            "sh".to_string(),
        )
        .unwrap();
        let line = worker.next_line().await.unwrap().unwrap();
        let child: i32 = String::from_utf8(line).unwrap().trim().parse().unwrap();

        worker.terminate(Duration::from_millis(200)).await;
        assert!(!worker.is_running());

        // The forked sleep shares the worker's group and is gone as well.
        let deadline = Instant::now() + Duration::from_secs(5);
        while is_alive(child) {
            assert!(Instant::now() < deadline, "forked child {} survived", child);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Running and not a zombie awaiting its reaper.
    fn is_alive(pid: i32) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit_once(')')
                .map(|(_, rest)| !rest.trim_start().starts_with('Z'))
                .unwrap_or(false),
            Err(_) => false,
        }
    }
}
