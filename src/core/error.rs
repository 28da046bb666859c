// This module defines error types for asmview using the thiserror crate. DriverError is the
// main error enum covering the hard failures of a compilation job: a tool binary that cannot
// be launched, filesystem errors while classifying artifacts or writing launcher scripts,
// protocol violations from the external parser, process timeouts, scheduler cancellation and
// configuration problems. Every variant can report the Stage it happened in so a caller can
// tell the user whether the compiler, the disassembler, the device classifier or the external
// parser failed. Recoverable conditions (a device disassembler exiting nonzero, a missing
// optimisation record) never reach this type; they are absorbed where they happen.

//! Error types for asmview.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Sub-stage of a job that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    PrimaryCompile,
    Disassembly,
    Classification,
    ExternalParser,
    OptimizationReport,
    Configuration,
    Scheduling,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::PrimaryCompile => "primary compile",
            Stage::Disassembly => "disassembly",
            Stage::Classification => "device classification",
            Stage::ExternalParser => "external parser",
            Stage::OptimizationReport => "optimization report",
            Stage::Configuration => "configuration",
            Stage::Scheduling => "scheduling",
        };
        f.write_str(name)
    }
}

/// Main error type for compilation jobs.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("{stage}: failed to run {}: {source}", tool.display())]
    Spawn {
        stage: Stage,
        tool: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{stage}: I/O error on {}: {source}", path.display())]
    Io {
        stage: Stage,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("external parser: {} violated the output protocol: {reason}", tool.display())]
    Protocol { tool: PathBuf, reason: String },

    #[error("{stage}: {} exceeded {limit_ms}ms", tool.display())]
    Timeout {
        stage: Stage,
        tool: PathBuf,
        limit_ms: u64,
    },

    #[error("{stage}: {reason}")]
    TaskAborted { stage: Stage, reason: String },

    #[error("scheduling: job cancelled after {limit_ms}ms")]
    Cancelled { limit_ms: u64 },

    #[error("configuration: {reason}")]
    Config { reason: String },

    #[error("configuration: unknown compiler '{id}'")]
    UnknownCompiler { id: String },
}

impl DriverError {
    /// The sub-stage this error belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            DriverError::Spawn { stage, .. }
            | DriverError::Io { stage, .. }
            | DriverError::Timeout { stage, .. }
            | DriverError::TaskAborted { stage, .. } => *stage,
            DriverError::Protocol { .. } => Stage::ExternalParser,
            DriverError::Cancelled { .. } => Stage::Scheduling,
            DriverError::Config { .. } | DriverError::UnknownCompiler { .. } => {
                Stage::Configuration
            }
        }
    }

    pub(crate) fn io(stage: Stage, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DriverError::Io {
            stage,
            path: path.into(),
            source,
        }
    }
}

/// Errors raised while loading the driver configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for DriverError {
    fn from(err: ConfigError) -> Self {
        DriverError::Config {
            reason: err.to_string(),
        }
    }
}

/// Result type alias for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;
