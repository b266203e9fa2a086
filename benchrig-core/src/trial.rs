// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Trial execution.
//!
//! A [`TrialRunner`] runs one experiment to completion: it builds the worker
//! command, launches it on the device, streams and parses the worker's
//! output under a wall-clock bound, and retries transient failures. The
//! worker is terminated on every exit path.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::cancel::CancelSignal;
use crate::config::InstrumentConfig;
use crate::device::{Device, WorkerCommand, WorkerProcess};
use crate::error::{
    DeviceError, InvalidConfigurationError, RigError, RigResult, StateTransitionError, TrialError,
};
use crate::matrix::Experiment;
use crate::protocol::{parse_line, Measurement, WorkerEvent};
use crate::state::{TrialState, TrialStateMachine};

/// Instrument option: measurements a DONE-terminated attempt must contain.
pub const MIN_MEASUREMENTS_OPTION: &str = "minMeasurements";

pub const ENV_TRIAL_ID: &str = "BENCHRIG_TRIAL_ID";
pub const ENV_SCENARIO: &str = "BENCHRIG_SCENARIO";
pub const ENV_INSTRUMENT: &str = "BENCHRIG_INSTRUMENT";

/// Final classification of a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrialOutcome {
    Success,
    Failed,
    Timeout,
}

impl TrialOutcome {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Timeout => "TIMEOUT",
        }
    }
}

impl std::fmt::Display for TrialOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Outcome of running one experiment.
#[derive(Debug, Clone, Serialize)]
pub struct Trial {
    pub id: Uuid,
    pub run_id: Uuid,
    pub experiment: Experiment,
    pub trial_number: u32,
    /// Attempts used, including retries.
    pub attempts: u32,
    /// Measurements of the successful attempt only.
    pub measurements: Vec<Measurement>,
    pub outcome: TrialOutcome,
    pub diagnostics: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl Trial {
    pub fn is_success(&self) -> bool {
        self.outcome == TrialOutcome::Success
    }
}

/// The experiment being run, passed explicitly to everything that needs it.
#[derive(Debug, Clone)]
pub struct ExperimentContext {
    pub run_id: Uuid,
    pub trial_id: Uuid,
    pub trial_number: u32,
    pub attempt: u32,
    pub experiment: Arc<Experiment>,
}

impl ExperimentContext {
    pub fn new(run_id: Uuid, trial_number: u32, experiment: Arc<Experiment>) -> Self {
        Self {
            run_id,
            trial_id: Uuid::new_v4(),
            trial_number,
            attempt: 0,
            experiment,
        }
    }

    pub fn with_attempt(&self, attempt: u32) -> Self {
        Self {
            attempt,
            ..self.clone()
        }
    }

    /// Worker argument vector and environment for this experiment.
    pub fn worker_command(&self) -> WorkerCommand {
        let experiment = &self.experiment;
        let mut args = experiment.vm.args.clone();

        args.push("--scenario".to_string());
        args.push(experiment.scenario.name.clone());
        for (key, value) in &experiment.scenario.parameters {
            args.push("--parameter".to_string());
            args.push(format!("{}={}", key, value));
        }

        args.push("--instrument".to_string());
        args.push(experiment.instrument_name.clone());
        args.push("--instrument-class".to_string());
        args.push(experiment.instrument.class_name.clone());
        for (key, value) in &experiment.instrument.options {
            args.push("--instrument-option".to_string());
            args.push(format!("{}={}", key, value));
        }

        let env = BTreeMap::from([
            (ENV_TRIAL_ID.to_string(), self.trial_id.to_string()),
            (ENV_SCENARIO.to_string(), experiment.scenario.name.clone()),
            (ENV_INSTRUMENT.to_string(), experiment.instrument_name.clone()),
        ]);

        WorkerCommand { args, env }
    }
}

/// Timeout and retry bounds for one trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub kill_grace: Duration,
}

impl Default for TrialPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_retries: 1,
            kill_grace: Duration::from_millis(500),
        }
    }
}

/// Number of measurements the instrument requires. Defaults to 1.
pub fn min_measurements(instrument: &InstrumentConfig) -> Result<usize, InvalidConfigurationError> {
    match instrument.options.get(MIN_MEASUREMENTS_OPTION) {
        None => Ok(1),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| InvalidConfigurationError::InvalidKeyValue {
                key: format!("instrument options.{}", MIN_MEASUREMENTS_OPTION),
                value: raw.clone(),
                reason: "must be a non-negative integer".to_string(),
            }),
    }
}

/// Failure of one attempt: either the trial's own, or fatal to the run.
#[derive(Debug)]
enum AttemptError {
    Trial(TrialError),
    Fatal(RigError),
}

impl From<TrialError> for AttemptError {
    fn from(err: TrialError) -> Self {
        Self::Trial(err)
    }
}

impl From<StateTransitionError> for AttemptError {
    fn from(err: StateTransitionError) -> Self {
        Self::Fatal(err.into())
    }
}

/// Runs experiments on one device.
#[derive(Debug, Clone)]
pub struct TrialRunner {
    device: Arc<Device>,
    policy: TrialPolicy,
    cancel: CancelSignal,
}

impl TrialRunner {
    pub fn new(device: Arc<Device>, policy: TrialPolicy, cancel: CancelSignal) -> Self {
        Self {
            device,
            policy,
            cancel,
        }
    }

    pub fn policy(&self) -> &TrialPolicy {
        &self.policy
    }

    /// Run the experiment in `ctx` to a final [`Trial`].
    ///
    /// Trial-level failures are reported in the returned trial. `Err` is
    /// returned only for failures fatal to the whole run, such as a device
    /// that cannot be reached.
    pub async fn run(&mut self, ctx: &ExperimentContext) -> RigResult<Trial> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let label = ctx.experiment.label();
        let required = min_measurements(&ctx.experiment.instrument)?;
        let mut sm = TrialStateMachine::new(label.clone());
        let mut attempt = 0;

        let result = loop {
            attempt += 1;
            if self.cancel.is_cancelled() {
                break Err(TrialError::Cancelled);
            }

            sm.transition_to(TrialState::Launching)?;
            match self
                .attempt(&ctx.with_attempt(attempt), &mut sm, required)
                .await
            {
                Ok(measurements) => break Ok(measurements),
                Err(AttemptError::Fatal(err)) => {
                    tracing::error!(experiment = %label, attempt, error = %err, "Fatal device error");
                    return Err(err);
                }
                Err(AttemptError::Trial(err))
                    if err.is_transient() && attempt <= self.policy.max_retries =>
                {
                    tracing::warn!(experiment = %label, attempt, error = %err, "Attempt failed, retrying");
                }
                Err(AttemptError::Trial(err)) => break Err(err),
            }
        };

        let (measurements, outcome, diagnostics) = match result {
            Ok(measurements) => {
                sm.transition_to(TrialState::Succeeded)?;
                tracing::info!(
                    experiment = %label,
                    attempts = attempt,
                    measurements = measurements.len(),
                    "Trial succeeded"
                );
                (measurements, TrialOutcome::Success, None)
            }
            Err(err) => {
                sm.transition_to(TrialState::Failed)?;
                let outcome = match err {
                    TrialError::TimedOut { .. } => TrialOutcome::Timeout,
                    _ => TrialOutcome::Failed,
                };
                tracing::error!(
                    experiment = %label,
                    attempts = attempt,
                    outcome = %outcome,
                    error = %err,
                    "Trial failed"
                );
                (Vec::new(), outcome, Some(err.to_string()))
            }
        };

        Ok(Trial {
            id: ctx.trial_id,
            run_id: ctx.run_id,
            experiment: ctx.experiment.as_ref().clone(),
            trial_number: ctx.trial_number,
            attempts: attempt,
            measurements,
            outcome,
            diagnostics,
            started_at,
            duration_ms: clock.elapsed().as_millis() as u64,
        })
    }

    async fn attempt(
        &mut self,
        ctx: &ExperimentContext,
        sm: &mut TrialStateMachine,
        required: usize,
    ) -> Result<Vec<Measurement>, AttemptError> {
        let command = ctx.worker_command();
        let vm = &ctx.experiment.vm;

        let mut worker = match self.device.new_worker_process(vm, &command).await {
            Ok(worker) => worker,
            Err(DeviceError::SpawnFailed { program, reason }) => {
                sm.transition_to(TrialState::Crashed)?;
                return Err(TrialError::SpawnFailed {
                    reason: format!("{}: {}", program, reason),
                }
                .into());
            }
            Err(err) => return Err(AttemptError::Fatal(err.into())),
        };

        tracing::debug!(
            experiment = %ctx.experiment,
            attempt = ctx.attempt,
            pid = worker.pid().map(|p| p.value()),
            "Worker started"
        );
        sm.transition_to(TrialState::Running)?;

        let result = self.stream(&mut worker, sm, required).await;
        worker.terminate(self.policy.kill_grace).await;
        result
    }

    async fn stream(
        &mut self,
        worker: &mut WorkerProcess,
        sm: &mut TrialStateMachine,
        required: usize,
    ) -> Result<Vec<Measurement>, AttemptError> {
        let timeout_ms = self.policy.timeout.as_millis() as u64;
        let deadline = tokio::time::sleep(self.policy.timeout);
        tokio::pin!(deadline);

        let mut measurements = Vec::new();
        loop {
            let line = tokio::select! {
                line = worker.next_line() => line,
                _ = &mut deadline => {
                    sm.transition_to(TrialState::TimedOut)?;
                    return Err(TrialError::TimedOut { timeout_ms }.into());
                }
                _ = self.cancel.cancelled() => return Err(TrialError::Cancelled.into()),
            };

            let bytes = match line {
                Ok(Some(bytes)) => bytes,
                Ok(None) => break,
                Err(err) => {
                    sm.transition_to(TrialState::Crashed)?;
                    return Err(TrialError::Crashed {
                        status: format!("failed to read worker output: {}", err),
                    }
                    .into());
                }
            };
            let line = String::from_utf8(bytes).map_err(|err| TrialError::Protocol {
                line: String::from_utf8_lossy(err.as_bytes()).into_owned(),
                reason: "worker output is not valid UTF-8".to_string(),
            })?;

            match parse_line(&line)? {
                None => {}
                Some(WorkerEvent::Measurement(measurement)) => measurements.push(measurement),
                Some(WorkerEvent::Done) => {
                    sm.transition_to(TrialState::Parsing)?;
                    if measurements.len() < required {
                        return Err(TrialError::InsufficientMeasurements {
                            expected: required,
                            received: measurements.len(),
                        }
                        .into());
                    }
                    return Ok(measurements);
                }
                Some(WorkerEvent::Error(message)) => {
                    return Err(TrialError::WorkerReported { message }.into());
                }
            }
        }

        // Stdout closed without DONE.
        let status = tokio::select! {
            status = worker.wait() => status,
            _ = &mut deadline => {
                sm.transition_to(TrialState::TimedOut)?;
                return Err(TrialError::TimedOut { timeout_ms }.into());
            }
            _ = self.cancel.cancelled() => return Err(TrialError::Cancelled.into()),
        };

        match status {
            Ok(status) if status.success() => Err(TrialError::Protocol {
                line: String::new(),
                reason: "worker exited without DONE".to_string(),
            }
            .into()),
            Ok(status) => {
                sm.transition_to(TrialState::Crashed)?;
                Err(TrialError::Crashed {
                    status: status.to_string(),
                }
                .into())
            }
            Err(err) => {
                sm.transition_to(TrialState::Crashed)?;
                Err(TrialError::Crashed {
                    status: err.to_string(),
                }
                .into())
            }
        }
    }
}
