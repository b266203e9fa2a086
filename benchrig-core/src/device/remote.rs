// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Remote device: workers run on a host reached through an out-of-process
//! transport (`ssh` by default).
//!
//! Options under `device.<name>.options`:
//! - `host` (required): transport target.
//! - `transport`: command prefix used to run a command on the host.
//! - `push`: command prefix used to copy an artifact to the host.
//! - `artifacts`: local paths pushed before every launch.
//! - `remoteDir`: destination directory for pushed artifacts.
//!
//! Transports like `ssh` join their arguments and re-split them in a remote
//! shell, so every word of the worker invocation is shell-quoted.

use std::borrow::Cow;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{split_args, ConfigResolver, DeviceConfig, VmConfig};
use crate::error::{DeviceError, InvalidConfigurationError, RigResult};

use super::process::{WorkerCommand, WorkerProcess};
use super::{default_vm_option, worker_slots};

/// Upper bound for the connection check and each artifact push.
const TRANSPORT_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_TRANSPORT: &str = "ssh";
const DEFAULT_PUSH: &str = "scp";
const DEFAULT_REMOTE_DIR: &str = "/tmp/benchrig";

/// Runs worker processes on a remote host.
#[derive(Debug)]
pub struct RemoteDevice {
    config: DeviceConfig,
    resolver: Arc<ConfigResolver>,
    host: String,
    transport: Vec<String>,
    push: Vec<String>,
    artifacts: Vec<PathBuf>,
    remote_dir: String,
    slots: usize,
    connected: AtomicBool,
}

impl RemoteDevice {
    pub fn new(config: DeviceConfig, resolver: Arc<ConfigResolver>) -> RigResult<Self> {
        let slots = worker_slots(&config)?;

        let host = config
            .option("host")
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| InvalidConfigurationError::MissingRequiredKey {
                key: format!("device.{}.options.host", config.name),
                context: format!("remote device '{}'", config.name),
            })?
            .to_string();

        let transport = command_prefix(&config, "transport", DEFAULT_TRANSPORT)?;
        let push = command_prefix(&config, "push", DEFAULT_PUSH)?;
        let artifacts = config
            .option("artifacts")
            .map(split_args)
            .unwrap_or_default()
            .into_iter()
            .map(PathBuf::from)
            .collect();
        let remote_dir = config
            .option("remoteDir")
            .unwrap_or(DEFAULT_REMOTE_DIR)
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            config,
            resolver,
            host,
            transport,
            push,
            artifacts,
            remote_dir,
            slots,
            connected: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn worker_slots(&self) -> usize {
        self.slots
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Check the transport by running `true` on the host.
    pub async fn connect(&self) -> Result<(), DeviceError> {
        let mut check = self.transport_command();
        check.arg("true");

        let status = run_bounded(check)
            .await
            .map_err(|reason| self.unavailable(reason))?;
        if !status.success() {
            return Err(self.unavailable(format!("connection check exited with {}", status)));
        }

        self.connected.store(true, Ordering::Release);
        tracing::info!(device = %self.config.name, host = %self.host, "Connected to remote device");
        Ok(())
    }

    /// The device's `defaultVm` if configured, otherwise a bare config whose
    /// worker is looked up on the remote `PATH`.
    pub fn default_vm_config(&self) -> RigResult<VmConfig> {
        if let Some(name) = default_vm_option(&self.config) {
            return self.resolver.vm_config(name);
        }
        let mut vm = VmConfig::named("default");
        vm.args = self.resolver.global_vm_args();
        Ok(vm)
    }

    /// Push artifacts, then launch the worker through the transport.
    pub async fn new_worker_process(
        &self,
        vm: &VmConfig,
        command: &WorkerCommand,
    ) -> Result<WorkerProcess, DeviceError> {
        if !self.is_connected() {
            return Err(self.unavailable("device is not connected".to_string()));
        }

        self.push_artifacts().await?;

        let program = vm.executable().to_string_lossy().into_owned();
        let mut process = self.transport_command();
        process.arg("env");
        for (key, value) in &command.env {
            process.arg(shell_quote(&format!("{}={}", key, value)).as_ref());
        }
        process.arg(shell_quote(&program).as_ref());
        for arg in &command.args {
            process.arg(shell_quote(arg).as_ref());
        }

        tracing::debug!(
            device = %self.config.name,
            host = %self.host,
            vm = %vm.name,
            program = %program,
            "Launching remote worker"
        );

        WorkerProcess::spawn(process, format!("{}:{}", self.host, program))
    }

    async fn push_artifacts(&self) -> Result<(), DeviceError> {
        for artifact in &self.artifacts {
            let mut push = Command::new(&self.push[0]);
            push.args(&self.push[1..])
                .arg(artifact)
                .arg(format!("{}:{}/", self.host, self.remote_dir));

            let status = run_bounded(push)
                .await
                .map_err(|reason| self.push_failed(artifact, reason))?;
            if !status.success() {
                return Err(self.push_failed(artifact, format!("push exited with {}", status)));
            }
            tracing::debug!(device = %self.config.name, artifact = %artifact.display(), "Pushed artifact");
        }
        Ok(())
    }

    fn transport_command(&self) -> Command {
        let mut command = Command::new(&self.transport[0]);
        command.args(&self.transport[1..]).arg(&self.host);
        command
    }

    fn unavailable(&self, reason: String) -> DeviceError {
        DeviceError::Unavailable {
            device: self.config.name.clone(),
            reason,
        }
    }

    fn push_failed(&self, artifact: &std::path::Path, reason: String) -> DeviceError {
        DeviceError::PushFailed {
            device: self.config.name.clone(),
            artifact: artifact.to_path_buf(),
            reason,
        }
    }
}

fn command_prefix(
    config: &DeviceConfig,
    option: &str,
    default: &str,
) -> Result<Vec<String>, InvalidConfigurationError> {
    let raw = config.option(option).unwrap_or(default);
    let tokens = split_args(raw);
    if tokens.is_empty() {
        return Err(InvalidConfigurationError::InvalidKeyValue {
            key: format!("device.{}.options.{}", config.name, option),
            value: raw.to_string(),
            reason: "command must not be empty".to_string(),
        });
    }
    Ok(tokens)
}

/// Quote `word` for a POSIX shell. Words made only of characters the shell
/// never interprets are passed through unchanged.
fn shell_quote(word: &str) -> Cow<'_, str> {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./=:,+@%".contains(c));
    if plain {
        Cow::Borrowed(word)
    } else {
        Cow::Owned(format!("'{}'", word.replace('\'', "'\\''")))
    }
}

async fn run_bounded(mut command: Command) -> Result<std::process::ExitStatus, String> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::inherit());
    let mut command = tokio::process::Command::from(command);
    command.kill_on_drop(true);

    let mut child = command.spawn().map_err(|e| e.to_string())?;
    match tokio::time::timeout(TRANSPORT_TIMEOUT, child.wait()).await {
        Ok(status) => status.map_err(|e| e.to_string()),
        Err(_) => {
            let _ = child.kill().await;
            Err(format!("timed out after {}s", TRANSPORT_TIMEOUT.as_secs()))
        }
    }
}
