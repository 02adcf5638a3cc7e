//! Cycling procedures.
//!
//! # Key Concepts
//!
//! - **CycleController**: owns one run (conditioning, hybrid cycles, voltage finish)
//! - **StopDecision**: the four per-cycle stop checks
//! - **CurrentSign / CutoffBand**: direction-aware comparisons and finish cutoffs
//! - **CellGuard**: guaranteed cell-off and session-close
//! - **RunReport**: structured record of a run

pub mod charge_hybrid;
pub mod panic_safety;
pub mod polarity;
pub mod result;
pub mod stop;

pub use charge_hybrid::{ControllerState, CycleController, CycleState};
pub use panic_safety::CellGuard;
pub use polarity::{orient, CurrentSign, CutoffBand};
pub use result::{CycleRecord, FinishRecord, RunReport, Termination};
pub use stop::{StopDecision, StopReason};
