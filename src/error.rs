//! Custom error types for the application.
//!
//! This module defines the primary error type, `CyclerError`, for the whole crate.
//! Using the `thiserror` crate, it provides one consistent way to report the things
//! that can go wrong during a cycling run, from configuration problems to instrument
//! failures in the middle of a measurement.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically a malformed TOML file or an
//!   environment override that does not deserialize into the expected type.
//! - **`Configuration`**: Semantic errors in an otherwise well-formed configuration,
//!   e.g. `max_repeats = 0` or a low voltage bound above the high bound. These are
//!   reported before any instrument command is issued.
//! - **`Io`**: Wraps `std::io::Error` (trace directories, config files).
//! - **`Instrument`**: Session-level failures: querying the session, switching the cell,
//!   closing the connection.
//! - **`Measurement`**: A measurement engine call failed. Carries the stage that was
//!   running so the operator knows how far the run got.
//! - **`Storage`**: Trace persistence failed.
//!
//! Capability traits at the hardware boundary return `anyhow::Result`; the controller
//! converts those into `CyclerError` with the stage attached.

use std::fmt;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, CyclerError>;

/// Stage of a run in which a measurement engine was invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    /// Single-step galvanostatic conditioning before cycling
    Conditioning,
    /// Hybrid measurement for the given 0-based cycle index
    Cycle(u32),
    /// Potentiostatic voltage finish
    VoltageFinish,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStage::Conditioning => write!(f, "conditioning"),
            RunStage::Cycle(n) => write!(f, "cycle {n}"),
            RunStage::VoltageFinish => write!(f, "voltage finish"),
        }
    }
}

#[allow(missing_docs)]
#[derive(Error, Debug)]
pub enum CyclerError {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Instrument error: {0}")]
    Instrument(String),

    #[error("Measurement failed during {stage}: {message}")]
    Measurement { stage: RunStage, message: String },

    #[error("Storage error: {0}")]
    Storage(String),
}

impl CyclerError {
    /// Wrap a collaborator failure with the stage it occurred in.
    pub fn measurement(stage: RunStage, err: anyhow::Error) -> Self {
        CyclerError::Measurement {
            stage,
            message: format!("{err:#}"),
        }
    }

    /// Whether the error was raised before any instrument command was sent.
    pub fn is_precondition(&self) -> bool {
        matches!(self, CyclerError::Config(_) | CyclerError::Configuration(_))
    }
}
