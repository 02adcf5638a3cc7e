//! Potentiostat Capabilities
//!
//! Fine-grained capability traits for the instrument collaborators a cycling run
//! talks to. A concrete potentiostat implements all of them; tests and the
//! simulator can implement any subset:
//!
//! - [`CellControl`]: session query, cell on/off, session close
//! - [`ChronoMeasurement`]: multi-step current program (used for conditioning)
//! - [`HybridMeasurement`]: one hybrid cycle, returning its voltage summary
//! - [`PotentiostaticHold`]: voltage hold with current cutoff (voltage finish)
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Owns the instrument exclusively for the duration of a call
//!
//! Measurement calls open the session themselves when it is closed; only the
//! cycle controller closes it.
//!
//! # Example
//!
//! ```rust,ignore
//! async fn one_cycle<P>(pstat: &P, request: &HybridRequest) -> Result<HybridSummary>
//! where
//!     P: CellControl + HybridMeasurement,
//! {
//!     let summary = pstat.run_hybrid(request).await?;
//!     if summary.v_max > 1.0 {
//!         pstat.set_cell(CellState::Off).await?;
//!         pstat.close().await?;
//!     }
//!     Ok(summary)
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::procedures::polarity::CutoffBand;

/// Power state of the cell connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellState {
    /// Cell connected and regulated
    On,
    /// Cell disconnected
    Off,
}

/// Where a measurement persists its trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceDestination {
    /// Primary trace file
    pub result_file: PathBuf,
    /// Optional live-view mirror, overwritten on every measurement
    pub live_view_file: Option<PathBuf>,
}

/// Write-time decimation policy for long traces.
///
/// Samples before `min_points` are always kept; afterwards the engine keeps one
/// point per `coarse_window` samples unless the signal changes by more than
/// `threshold` fine windows (`fine_window` samples each).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecimationPolicy {
    /// Coarse sampling window (samples)
    pub coarse_window: u32,
    /// Fine sampling window (samples)
    pub fine_window: u32,
    /// Change threshold, in fine windows
    pub threshold: u32,
    /// Points recorded before decimation starts
    pub min_points: u32,
}

impl DecimationPolicy {
    /// Fixed policy applied to conditioning traces.
    pub const CONDITIONING: DecimationPolicy = DecimationPolicy {
        coarse_window: 20,
        fine_window: 10,
        threshold: 2,
        min_points: 1,
    };
}

/// Galvanostatic step program: an initial level followed by `n_steps` steps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepProgram {
    /// Current before the first step (A)
    pub initial_current: f64,
    /// Time at the initial level (s)
    pub initial_duration: f64,
    /// Current of each step (A)
    pub step_current: f64,
    /// Duration of each step (s)
    pub step_duration: f64,
    /// Sample interval (s)
    pub t_sample: f64,
    /// Number of steps
    pub n_steps: u32,
}

impl StepProgram {
    /// One second at 0 A, then a single step to `current` for `duration`.
    pub fn single_step(current: f64, duration: f64, t_sample: f64) -> Self {
        Self {
            initial_current: 0.0,
            initial_duration: 1.0,
            step_current: current,
            step_duration: duration,
            t_sample,
            n_steps: 1,
        }
    }

    /// Total programmed length in seconds.
    pub fn total_duration(&self) -> f64 {
        self.initial_duration + self.step_duration * f64::from(self.n_steps)
    }
}

/// Conditioning request for a [`ChronoMeasurement`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChronoRequest {
    /// Current program
    pub program: StepProgram,
    /// Keep the cell powered after the program ends
    pub leave_cell_on: bool,
    /// Decimation applied while writing (None = keep every sample)
    pub decimation: Option<DecimationPolicy>,
    /// Trace destination
    pub destination: TraceDestination,
}

/// One hybrid cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HybridRequest {
    /// Output identifier, unique per cycle when more than one cycle is configured
    pub identifier: String,
    /// Directory the engine writes its traces to
    pub data_path: PathBuf,
    /// DC current (A)
    pub i_init: f64,
    /// Galvanostatic step length (s)
    pub duration: f64,
    /// Sample interval (s)
    pub t_sample: f64,
    /// Rest performed by the engine before measuring, unless starting with the cell off (s)
    pub rest_time: f64,
    /// The cell is off and must be switched on before measuring
    pub start_with_cell_off: bool,
    /// Keep the cell powered after the measurement
    pub leave_cell_on: bool,
    /// Show an interactive plot (always false for unattended cycling)
    pub show_plot: bool,
    /// Experiment notes written with the trace
    pub exp_notes: Option<String>,
}

/// Voltage statistics of one hybrid cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HybridSummary {
    /// Minimum measured voltage (V)
    pub v_min: f64,
    /// Maximum measured voltage (V)
    pub v_max: f64,
    /// Voltage at the end of the cycle (V)
    pub v_end: f64,
}

/// Potentiostatic hold request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldRequest {
    /// Target voltage (V)
    pub v: f64,
    /// Maximum hold duration (s)
    pub duration: f64,
    /// Sample interval (s)
    pub t_sample: f64,
    /// Terminate once the measured current lies inside this band
    pub cutoff: CutoffBand,
    /// Trace destination
    pub destination: TraceDestination,
}

/// How a potentiostatic hold ended.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HoldOutcome {
    /// The current entered the cutoff band before the duration elapsed
    pub cutoff_reached: bool,
    /// Last measured current (A)
    pub final_current: f64,
    /// Hold length (s)
    pub elapsed_s: f64,
}

/// Capability: Session and Cell Power
///
/// # Contract
/// - `is_open` reports whether an instrument session is currently open
/// - `set_cell` switches the cell connection; requires an open session
/// - `close` ends the session; the cell should be switched off first
#[async_trait]
pub trait CellControl: Send + Sync {
    /// Whether an instrument session is open
    async fn is_open(&self) -> Result<bool>;

    /// Switch the cell on or off
    async fn set_cell(&self, state: CellState) -> Result<()>;

    /// Close the instrument session
    async fn close(&self) -> Result<()>;
}

/// Capability: Multi-step Current Program
#[async_trait]
pub trait ChronoMeasurement: Send + Sync {
    /// Run the program to completion and persist its trace.
    async fn run_chrono(&self, request: &ChronoRequest) -> Result<()>;
}

/// Capability: Hybrid Measurement
///
/// Returns the voltage summary of the cycle. Implementations must not rely on
/// state from earlier calls to compute it.
#[async_trait]
pub trait HybridMeasurement: Send + Sync {
    /// Run one hybrid cycle.
    async fn run_hybrid(&self, request: &HybridRequest) -> Result<HybridSummary>;
}

/// Capability: Potentiostatic Hold
///
/// Blocks until the duration elapses or the current enters the cutoff band.
#[async_trait]
pub trait PotentiostaticHold: Send + Sync {
    /// Hold the requested voltage.
    async fn run_hold(&self, request: &HoldRequest) -> Result<HoldOutcome>;
}

/// Composite trait: a complete potentiostat.
///
/// Blanket implementation - implement the individual capabilities and
/// `Potentiostat` comes for free.
pub trait Potentiostat: CellControl + ChronoMeasurement + HybridMeasurement + PotentiostaticHold {}

impl<T: CellControl + ChronoMeasurement + HybridMeasurement + PotentiostaticHold> Potentiostat for T {}
