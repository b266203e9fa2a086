// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Run orchestration.
//!
//! The [`Orchestrator`] drives an experiment matrix through a fixed pool of
//! worker slots bound to one device. Each slot pulls the next work unit in
//! matrix order, so trials within a slot run in deterministic order.
//! Completed trials are aggregated and forwarded to the result processors
//! from a single task, one whole trial at a time, and a slot starts its next
//! experiment only after the processors are done with its last trial.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::cancel::CancelHandle;
use crate::device::Device;
use crate::error::{InvalidConfigurationError, RigError, RigResult};
use crate::matrix::{Experiment, ExperimentMatrix};
use crate::sink::SinkSet;
use crate::trial::{ExperimentContext, Trial, TrialOutcome, TrialPolicy, TrialRunner};

/// Knobs for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Wall-clock bound for each attempt.
    pub trial_timeout: Duration,
    /// Retries after a crash or timeout.
    pub max_retries: u32,
    /// Trials per experiment.
    pub trials: u32,
    /// Lowers the device's worker slot count. Values above the device's
    /// capacity are clamped to it.
    pub worker_slots: Option<usize>,
    /// Time a worker gets to exit after SIGTERM.
    pub kill_grace: Duration,
    /// Bound for each result processor call.
    pub sink_timeout: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            trial_timeout: Duration::from_secs(60),
            max_retries: 1,
            trials: 1,
            worker_slots: None,
            kill_grace: Duration::from_millis(500),
            sink_timeout: Duration::from_secs(10),
        }
    }
}

impl RunOptions {
    pub fn validate(&self) -> Result<(), InvalidConfigurationError> {
        let invalid = |field: &'static str, value: String, reason: &str| -> Result<(), InvalidConfigurationError> {
            Err(InvalidConfigurationError::InvalidRunOption {
                field,
                value,
                reason: reason.to_string(),
            })
        };

        if self.trial_timeout.is_zero() {
            return invalid("trial_timeout", "0".to_string(), "must be greater than zero");
        }
        if self.trials == 0 {
            return invalid("trials", "0".to_string(), "at least one trial is required");
        }
        if self.worker_slots == Some(0) {
            return invalid("worker_slots", "0".to_string(), "must be greater than zero");
        }
        if self.sink_timeout.is_zero() {
            return invalid("sink_timeout", "0".to_string(), "must be greater than zero");
        }
        Ok(())
    }

    pub fn trial_policy(&self) -> TrialPolicy {
        TrialPolicy {
            timeout: self.trial_timeout,
            max_retries: self.max_retries,
            kill_grace: self.kill_grace,
        }
    }
}

/// A trial that did not succeed.
#[derive(Debug, Clone, Serialize)]
pub struct TrialFailure {
    pub experiment: String,
    pub trial_number: u32,
    pub outcome: TrialOutcome,
    pub diagnostics: Option<String>,
}

/// Aggregate result of a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub experiments: usize,
    /// Trials that ran to a final outcome.
    pub trials: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    /// Attempts beyond the first, across all trials.
    pub retries: u64,
    /// Work units never started because the run was cancelled.
    pub skipped: usize,
    pub cancelled: bool,
    pub failures: Vec<TrialFailure>,
}

impl RunSummary {
    /// True iff every trial succeeded and the run was not cancelled.
    pub fn success(&self) -> bool {
        self.failed == 0 && self.timed_out == 0 && !self.cancelled
    }

    fn record(&mut self, trial: &Trial) {
        self.trials += 1;
        self.retries += u64::from(trial.attempts.saturating_sub(1));
        match trial.outcome {
            TrialOutcome::Success => self.succeeded += 1,
            TrialOutcome::Failed => self.failed += 1,
            TrialOutcome::Timeout => self.timed_out += 1,
        }
        if !trial.is_success() {
            self.failures.push(TrialFailure {
                experiment: trial.experiment.label(),
                trial_number: trial.trial_number,
                outcome: trial.outcome,
                diagnostics: trial.diagnostics.clone(),
            });
        }
    }
}

/// One trial of one experiment.
type WorkUnit = (Arc<Experiment>, u32);

enum SlotEvent {
    /// A finished trial and the sender that releases its slot once the
    /// result processors have it.
    Completed(Trial, oneshot::Sender<()>),
    Fatal(RigError),
}

/// Runs a matrix on one device.
#[derive(Debug)]
pub struct Orchestrator {
    device: Arc<Device>,
    options: RunOptions,
    sinks: SinkSet,
    cancel: CancelHandle,
    run_id: Uuid,
}

impl Orchestrator {
    pub fn new(device: Arc<Device>, options: RunOptions, sinks: SinkSet) -> RigResult<Self> {
        options.validate()?;
        Ok(Self {
            device,
            options,
            sinks,
            cancel: CancelHandle::new(),
            run_id: Uuid::new_v4(),
        })
    }

    /// Handle that cancels this run from elsewhere.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Number of slots used for a matrix of `units` work units. Never more
    /// than the device can run at once.
    pub fn slot_count(&self, units: usize) -> usize {
        let capacity = self.device.worker_slots().max(1);
        self.options
            .worker_slots
            .unwrap_or(capacity)
            .clamp(1, capacity)
            .min(units.max(1))
    }

    /// Run every experiment `trials` times.
    ///
    /// Trial failures are reported in the summary. `Err` means the run was
    /// aborted by a device-level failure. Result processors are closed on
    /// every path.
    pub async fn run(self, matrix: ExperimentMatrix) -> RigResult<RunSummary> {
        let mut queue: VecDeque<WorkUnit> = VecDeque::new();
        for experiment in matrix.iter() {
            for trial_number in 1..=self.options.trials {
                queue.push_back((Arc::clone(experiment), trial_number));
            }
        }
        let total = queue.len();
        let slots = self.slot_count(total);

        let Self {
            device,
            options,
            sinks,
            cancel,
            run_id,
        } = self;

        if let Err(err) = device.connect().await {
            tracing::error!(device = %device.name(), error = %err, "Device unavailable");
            sinks.shutdown().await;
            return Err(err.into());
        }

        if let Some(requested) = options.worker_slots.filter(|&n| n > device.worker_slots()) {
            tracing::warn!(
                device = %device.name(),
                requested,
                capacity = device.worker_slots(),
                "Requested worker slots exceed device capacity, clamping"
            );
        }

        let queue = Arc::new(Mutex::new(queue));

        tracing::info!(
            run_id = %run_id,
            device = %device.name(),
            experiments = matrix.len(),
            trials = total,
            slots,
            "Starting run"
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handles = Vec::with_capacity(slots);
        for slot in 0..slots {
            let mut runner =
                TrialRunner::new(Arc::clone(&device), options.trial_policy(), cancel.signal());
            let queue = Arc::clone(&queue);
            let tx = tx.clone();
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let next = queue
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .pop_front();
                    let Some((experiment, trial_number)) = next else {
                        break;
                    };

                    let ctx = ExperimentContext::new(run_id, trial_number, experiment);
                    match runner.run(&ctx).await {
                        Ok(trial) => {
                            let (done_tx, done_rx) = oneshot::channel();
                            if tx.send(SlotEvent::Completed(trial, done_tx)).is_err() {
                                break;
                            }
                            // Wait for the result processors before the next experiment.
                            let _ = done_rx.await;
                        }
                        Err(err) => {
                            cancel.cancel();
                            let _ = tx.send(SlotEvent::Fatal(err));
                            break;
                        }
                    }
                }
                tracing::debug!(slot, "Worker slot finished");
            }));
        }
        drop(tx);

        let mut summary = RunSummary {
            run_id,
            experiments: matrix.len(),
            ..RunSummary::default()
        };
        let mut fatal: Option<RigError> = None;

        while let Some(event) = rx.recv().await {
            match event {
                SlotEvent::Completed(trial, done) => {
                    let trial = Arc::new(trial);
                    sinks.dispatch(Arc::clone(&trial)).await;
                    let _ = done.send(());
                    summary.record(&trial);
                    tracing::info!(
                        experiment = %trial.experiment,
                        outcome = %trial.outcome,
                        progress = format!("{}/{}", summary.trials, total),
                        "Trial finished"
                    );
                }
                SlotEvent::Fatal(err) => {
                    if fatal.is_none() {
                        fatal = Some(err);
                    }
                }
            }
        }

        for handle in handles {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "Worker slot panicked");
            }
        }

        sinks.shutdown().await;

        if let Some(err) = fatal {
            tracing::error!(run_id = %run_id, error = %err, "Run aborted");
            return Err(err);
        }

        summary.skipped = queue.lock().unwrap_or_else(PoisonError::into_inner).len();
        summary.cancelled = cancel.is_cancelled();

        if summary.success() {
            tracing::info!(run_id = %run_id, trials = summary.trials, "Run succeeded");
        } else {
            tracing::warn!(
                run_id = %run_id,
                succeeded = summary.succeeded,
                failed = summary.failed,
                timed_out = summary.timed_out,
                skipped = summary.skipped,
                cancelled = summary.cancelled,
                "Run finished with failures"
            );
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_valid() {
        let options = RunOptions::default();
        assert!(options.validate().is_ok());
        let policy = options.trial_policy();
        assert_eq!(policy.timeout, Duration::from_secs(60));
        assert_eq!(policy.max_retries, 1);
    }

    #[test]
    fn test_invalid_options() {
        let zero_timeout = RunOptions {
            trial_timeout: Duration::ZERO,
            ..RunOptions::default()
        };
        assert!(zero_timeout.validate().is_err());

        let zero_trials = RunOptions {
            trials: 0,
            ..RunOptions::default()
        };
        assert!(zero_trials.validate().is_err());

        let zero_slots = RunOptions {
            worker_slots: Some(0),
            ..RunOptions::default()
        };
        assert!(zero_slots.validate().is_err());
    }

    fn orchestrator(device_entries: &[(&str, &str)], worker_slots: Option<usize>) -> Orchestrator {
        let resolver = Arc::new(crate::config::ConfigResolver::with_ambient_home(
            crate::store::ConfigStore::new(device_entries.iter().copied()),
            None,
        ));
        let device = Arc::new(Device::resolve(resolver, None).unwrap());
        let options = RunOptions {
            worker_slots,
            ..RunOptions::default()
        };
        Orchestrator::new(device, options, SinkSet::new(Duration::from_secs(1))).unwrap()
    }

    #[test]
    fn test_slot_count_clamped_to_device() {
        let single = orchestrator(&[("device.local.type", "local")], Some(4));
        assert_eq!(single.slot_count(10), 1);

        let quad = [
            ("device.local.type", "local"),
            ("device.local.options.workers", "4"),
        ];
        assert_eq!(orchestrator(&quad, None).slot_count(10), 4);
        assert_eq!(orchestrator(&quad, Some(2)).slot_count(10), 2);
        assert_eq!(orchestrator(&quad, Some(16)).slot_count(10), 4);
        assert_eq!(orchestrator(&quad, None).slot_count(3), 3);
    }

    #[test]
    fn test_summary_success() {
        let mut summary = RunSummary::default();
        assert!(summary.success());
        summary.timed_out = 1;
        assert!(!summary.success());
        summary.timed_out = 0;
        summary.cancelled = true;
        assert!(!summary.success());
    }
}
