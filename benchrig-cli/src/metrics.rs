// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Prometheus metrics result processor.
//!
//! Counts trials by outcome and records trial durations. On close the text
//! exposition of the default registry is written to `options.file`.

use std::path::PathBuf;

use benchrig_core::config::ResultProcessorConfig;
use benchrig_core::sink::ResultProcessor;
use benchrig_core::{SinkError, Trial};
use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec,
};

pub const DEFAULT_METRICS_FILE: &str = "benchrig-metrics.prom";

lazy_static! {
    pub static ref TRIALS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "benchrig_trials_total",
        "Total number of completed trials",
        &["instrument", "outcome"]
    )
    .unwrap();
    pub static ref TRIAL_ATTEMPTS: IntCounterVec = register_int_counter_vec!(
        "benchrig_trial_attempts_total",
        "Total number of worker launches, including retries",
        &["instrument"]
    )
    .unwrap();
    pub static ref TRIAL_DURATION: HistogramVec = register_histogram_vec!(
        "benchrig_trial_duration_seconds",
        "Wall-clock time of a trial including retries",
        &["instrument"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0]
    )
    .unwrap();
}

/// Feeds trials into the process-wide Prometheus registry.
pub struct MetricsProcessor {
    file: PathBuf,
}

impl MetricsProcessor {
    pub const CLASS: &'static str = "metrics";

    pub fn factory(config: &ResultProcessorConfig) -> Result<Box<dyn ResultProcessor>, SinkError> {
        // Force initialization of metrics
        lazy_static::initialize(&TRIALS_TOTAL);
        lazy_static::initialize(&TRIAL_ATTEMPTS);
        lazy_static::initialize(&TRIAL_DURATION);

        let file = config
            .options
            .get("file")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_METRICS_FILE));
        Ok(Box::new(Self { file }))
    }
}

impl ResultProcessor for MetricsProcessor {
    fn class_name(&self) -> &str {
        Self::CLASS
    }

    fn process_trial(&mut self, trial: &Trial) -> Result<(), SinkError> {
        let instrument = trial.experiment.instrument_name.as_str();
        TRIALS_TOTAL
            .with_label_values(&[instrument, trial.outcome.name()])
            .inc();
        TRIAL_ATTEMPTS
            .with_label_values(&[instrument])
            .inc_by(u64::from(trial.attempts));
        TRIAL_DURATION
            .with_label_values(&[instrument])
            .observe(trial.duration_ms as f64 / 1000.0);
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        std::fs::write(&self.file, render()).map_err(|e| SinkError::Close {
            class: Self::CLASS.to_string(),
            reason: format!("{}: {}", self.file.display(), e),
        })?;
        tracing::info!(file = %self.file.display(), "Metrics written");
        Ok(())
    }
}

fn render() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }

    String::from_utf8(buffer).unwrap_or_else(|_| String::from("Encoding error"))
}
