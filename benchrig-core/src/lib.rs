// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Benchrig Core Library
//!
//! Experiment orchestration engine for the benchrig benchmark runner.
//! Provides the layered configuration store and typed resolver, execution
//! devices, experiment matrix expansion, the trial runner with its worker
//! protocol, run orchestration, and result processors.

pub mod cancel;
pub mod config;
pub mod device;
pub mod error;
pub mod matrix;
pub mod orchestrator;
pub mod protocol;
pub mod sink;
pub mod state;
pub mod store;
pub mod trial;
pub mod types;

// Re-export commonly used types
pub use cancel::{CancelHandle, CancelSignal};
pub use config::{
    ConfigResolver, DeviceConfig, DeviceKind, InstrumentConfig, ResultProcessorConfig, VmConfig,
};
pub use device::{Device, WorkerCommand, WorkerProcess};
pub use error::{
    DeviceError, InvalidConfigurationError, MissingConfigurationError, RigError, RigResult,
    SinkError, StateTransitionError, TrialError,
};
pub use matrix::{Experiment, ExperimentMatrix, ExperimentMatrixBuilder, Scenario};
pub use orchestrator::{Orchestrator, RunOptions, RunSummary, TrialFailure};
pub use protocol::{Measurement, WorkerEvent};
pub use sink::{ProcessorRegistry, ResultProcessor, SinkSet};
pub use state::{TrialState, TrialStateMachine};
pub use store::{ConfigStore, ConfigStoreBuilder};
pub use trial::{ExperimentContext, Trial, TrialOutcome, TrialPolicy, TrialRunner};
pub use types::{EntityName, ProcessId};
