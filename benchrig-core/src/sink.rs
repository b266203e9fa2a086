// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Result processors: pluggable consumers of completed trials.
//!
//! Processors are configured under `results.<name>.class` and looked up by
//! class in a [`ProcessorRegistry`]. A [`SinkSet`] fans each trial out to
//! every processor on a blocking thread, bounded by a timeout, and closes
//! them the same way at the end of a run. Sink failures are logged and never
//! fail a trial.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, TryLockError};
use std::time::Duration;

use crate::config::{ConfigResolver, ResultProcessorConfig};
use crate::error::{InvalidConfigurationError, RigResult, SinkError};
use crate::trial::Trial;

/// Default output file of the `json` processor.
pub const DEFAULT_JSON_FILE: &str = "benchrig-results.jsonl";

/// A consumer of completed trials. Called from a blocking thread.
pub trait ResultProcessor: Send {
    fn class_name(&self) -> &str;

    fn process_trial(&mut self, trial: &Trial) -> Result<(), SinkError>;

    fn close(&mut self) -> Result<(), SinkError>;
}

/// Builds a processor from its resolved configuration.
pub type ProcessorFactory =
    fn(&ResultProcessorConfig) -> Result<Box<dyn ResultProcessor>, SinkError>;

/// Writes one JSON object per trial, one per line.
pub struct JsonLinesProcessor {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonLinesProcessor {
    pub const CLASS: &'static str = "json";

    /// Open `path` for appending, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let open_err = |e: std::io::Error| SinkError::Open {
            class: Self::CLASS.to_string(),
            reason: format!("{}: {}", path.display(), e),
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(open_err)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(open_err)?;

        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn factory(config: &ResultProcessorConfig) -> Result<Box<dyn ResultProcessor>, SinkError> {
        let file = config
            .options
            .get("file")
            .map(String::as_str)
            .unwrap_or(DEFAULT_JSON_FILE);
        Ok(Box::new(Self::open(file)?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_err(&self, reason: impl std::fmt::Display) -> SinkError {
        SinkError::Write {
            class: Self::CLASS.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl ResultProcessor for JsonLinesProcessor {
    fn class_name(&self) -> &str {
        Self::CLASS
    }

    fn process_trial(&mut self, trial: &Trial) -> Result<(), SinkError> {
        let line = serde_json::to_string(trial).map_err(|e| self.write_err(e))?;
        writeln!(self.writer, "{}", line).map_err(|e| self.write_err(e))?;
        self.writer.flush().map_err(|e| self.write_err(e))
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.writer.flush().map_err(|e| SinkError::Close {
            class: Self::CLASS.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Emits one `tracing` event per trial.
#[derive(Debug, Default)]
pub struct LogProcessor {
    processed: u64,
}

impl LogProcessor {
    pub const CLASS: &'static str = "log";

    pub fn factory(_: &ResultProcessorConfig) -> Result<Box<dyn ResultProcessor>, SinkError> {
        Ok(Box::new(Self::default()))
    }
}

impl ResultProcessor for LogProcessor {
    fn class_name(&self) -> &str {
        Self::CLASS
    }

    fn process_trial(&mut self, trial: &Trial) -> Result<(), SinkError> {
        self.processed += 1;
        tracing::info!(
            trial_id = %trial.id,
            experiment = %trial.experiment,
            trial_number = trial.trial_number,
            outcome = %trial.outcome,
            attempts = trial.attempts,
            measurements = trial.measurements.len(),
            duration_ms = trial.duration_ms,
            diagnostics = trial.diagnostics.as_deref().unwrap_or(""),
            "Trial completed"
        );
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        tracing::info!(trials = self.processed, "Log result processor closed");
        Ok(())
    }
}

/// Maps processor classes to factories.
#[derive(Clone)]
pub struct ProcessorRegistry {
    factories: BTreeMap<String, ProcessorFactory>,
}

impl ProcessorRegistry {
    /// A registry with no classes.
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// A registry with the `json` and `log` classes.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(JsonLinesProcessor::CLASS, JsonLinesProcessor::factory);
        registry.register(LogProcessor::CLASS, LogProcessor::factory);
        registry
    }

    pub fn register(&mut self, class: impl Into<String>, factory: ProcessorFactory) {
        self.factories.insert(class.into(), factory);
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn contains(&self, class: &str) -> bool {
        self.factories.contains_key(class)
    }

    /// Check that every configured class is known, without opening anything.
    pub fn validate(&self, resolver: &ConfigResolver) -> RigResult<()> {
        for (name, class) in resolver.result_processor_entries() {
            if !self.contains(&class) {
                return Err(InvalidConfigurationError::UnknownResultProcessorClass { name, class }.into());
            }
        }
        Ok(())
    }

    /// Build one processor per configured class.
    pub fn build_all(&self, resolver: &ConfigResolver, timeout: Duration) -> RigResult<SinkSet> {
        self.validate(resolver)?;

        let mut sinks = SinkSet::new(timeout);
        for class in resolver.configured_result_processors() {
            let config = resolver.result_processor_config(&class)?;
            let Some(factory) = self.factories.get(&class) else {
                continue;
            };
            let processor = factory(&config)?;
            tracing::debug!(class = %class, "Result processor opened");
            sinks.push(processor);
        }
        Ok(sinks)
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("classes", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

type SharedProcessor = Arc<Mutex<Box<dyn ResultProcessor>>>;

/// The processors of one run.
pub struct SinkSet {
    sinks: Vec<(String, SharedProcessor)>,
    timeout: Duration,
    closed: AtomicBool,
}

impl SinkSet {
    pub fn new(timeout: Duration) -> Self {
        Self {
            sinks: Vec::new(),
            timeout,
            closed: AtomicBool::new(false),
        }
    }

    pub fn push(&mut self, processor: Box<dyn ResultProcessor>) {
        let class = processor.class_name().to_string();
        self.sinks.push((class, Arc::new(Mutex::new(processor))));
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.sinks.iter().map(|(class, _)| class.as_str())
    }

    /// Hand a completed trial to every processor. Returns the failures,
    /// which have already been logged.
    pub async fn dispatch(&self, trial: Arc<Trial>) -> Vec<SinkError> {
        let mut failures = Vec::new();
        for (class, processor) in &self.sinks {
            let shared = Arc::clone(&trial);
            let result = self
                .call(class, processor, move |p| p.process_trial(&shared))
                .await;
            if let Err(err) = result {
                tracing::warn!(class = %class, trial_id = %trial.id, error = %err, "Result processor failed");
                failures.push(err);
            }
        }
        failures
    }

    /// Close every processor, each bounded by the timeout. A processor still
    /// stuck in an earlier call is reported as timed out and left behind.
    pub async fn shutdown(self) -> Vec<SinkError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Vec::new();
        }

        let mut failures = Vec::new();
        for (class, processor) in &self.sinks {
            if let Err(err) = self.call(class, processor, |p| p.close()).await {
                tracing::warn!(class = %class, error = %err, "Result processor failed to close");
                failures.push(err);
            }
        }
        failures
    }

    /// Run `f` against one processor on a blocking thread under the timeout.
    async fn call<F>(&self, class: &str, processor: &SharedProcessor, f: F) -> Result<(), SinkError>
    where
        F: FnOnce(&mut dyn ResultProcessor) -> Result<(), SinkError> + Send + 'static,
    {
        let processor = Arc::clone(processor);
        let task = tokio::task::spawn_blocking(move || {
            let mut guard = processor.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut **guard)
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SinkError::Panicked {
                class: class.to_string(),
            }),
            Err(_) => Err(SinkError::TimedOut {
                class: class.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for SinkSet {
    /// Fallback for sets dropped without [`SinkSet::shutdown`]. Closes the
    /// processors that are not busy and skips the rest.
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::warn!(sinks = self.sinks.len(), "Result processors dropped without shutdown");

        for (class, processor) in &self.sinks {
            let mut guard = match processor.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => {
                    tracing::warn!(class = %class, "Result processor busy, not closed");
                    continue;
                }
            };
            if let Err(err) = guard.close() {
                tracing::warn!(class = %class, error = %err, "Result processor failed to close");
            }
        }
    }
}

impl std::fmt::Debug for SinkSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkSet")
            .field("classes", &self.classes().collect::<Vec<_>>())
            .field("timeout", &self.timeout)
            .field("closed", &self.is_closed())
            .finish()
    }
}
