//! # Charge Cycler Core Library
//!
//! Automates a galvanostatic charge/discharge cycling protocol on a potentiostat:
//! repeated hybrid measurements, per-cycle stop checks, and an optional
//! potentiostatic voltage finish. The binary (`main.rs`) is a thin CLI over this
//! library.
//!
//! ## Crate Structure
//!
//! - **`config`**: `RunConfig` loaded with figment (defaults, TOML, environment, CLI)
//!   and validated before any instrument command.
//! - **`data`**: CSV trace persistence.
//! - **`error`**: The `CyclerError` enum for centralized error handling.
//! - **`hardware`**: Async capability traits for the instrument and a simulated
//!   potentiostat.
//! - **`logging`**: `tracing-subscriber` initialization.
//! - **`output`**: Trace naming.
//! - **`procedures`**: The cycle controller, stop decision, current-sign handling,
//!   cell guard and run report.
//! - **`validation`**: Small parameter validators.

pub mod config;
pub mod data;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod output;
pub mod procedures;
pub mod validation;

pub use config::{ConfigOverrides, RunConfig};
pub use error::{AppResult, CyclerError};
pub use procedures::{CycleController, RunReport};
