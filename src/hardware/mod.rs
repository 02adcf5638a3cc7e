//! Instrument abstractions.
//!
//! `capabilities` defines what a potentiostat must offer a cycling run;
//! `mock` provides a simulated instrument implementing all of it.

pub mod capabilities;
pub mod mock;

pub use capabilities::{
    CellControl, CellState, ChronoMeasurement, HybridMeasurement, HybridSummary, Potentiostat,
    PotentiostaticHold,
};
pub use mock::{CellModel, InstrumentCall, SimulatedPotentiostat};
