//! Simulated Potentiostat
//!
//! Provides a simulated instrument for dry runs and tests without physical hardware.
//! All waits use `tokio::time::sleep`, so tests running on a paused clock complete
//! instantly while still observing realistic elapsed times.
//!
//! # Cell Model
//!
//! The cell is a first-order RC element: the open-circuit voltage moves by
//! `i·dt / C` while current flows, and the terminal voltage is `ocv + i·R`.
//! Both are bounded by the model's voltage limits. A potentiostatic hold drives
//! the current `(v - ocv) / R`, which decays exponentially with time constant `R·C`.
//!
//! # Test Hooks
//!
//! - Every command is recorded in order as an [`InstrumentCall`]
//! - Hybrid summaries can be scripted per cycle
//! - Failures can be injected into the Nth hybrid call, the hold, or session close

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};

use crate::data::trace::{write_trace, TraceSample};
use crate::hardware::capabilities::{
    CellControl, CellState, ChronoMeasurement, ChronoRequest, HoldOutcome, HoldRequest,
    HybridMeasurement, HybridRequest, HybridSummary, PotentiostaticHold, TraceDestination,
};
use crate::procedures::polarity::CutoffBand;

/// Upper bound on samples simulated per segment; longer segments use a coarser step.
pub const MAX_TRACE_POINTS: usize = 2000;

/// Electrical parameters of the simulated cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellModel {
    /// Capacitance (F)
    pub capacitance_f: f64,
    /// Series resistance (Ω)
    pub resistance_ohm: f64,
    /// Lowest reachable voltage (V)
    pub v_lower: f64,
    /// Highest reachable voltage (V)
    pub v_upper: f64,
    /// Open-circuit voltage at power-up (V)
    pub initial_ocv: f64,
}

impl Default for CellModel {
    fn default() -> Self {
        Self {
            capacitance_f: 50.0,
            resistance_ohm: 0.5,
            v_lower: -1.5,
            v_upper: 1.5,
            initial_ocv: 0.0,
        }
    }
}

impl CellModel {
    fn clamp(&self, v: f64) -> f64 {
        v.clamp(self.v_lower, self.v_upper)
    }
}

/// One recorded instrument interaction.
#[derive(Debug, Clone, PartialEq)]
pub enum InstrumentCall {
    /// A measurement opened the session
    SessionOpened,
    /// Cell switched on
    CellOn,
    /// Cell switched off
    CellOff,
    /// Session closed
    SessionClosed,
    /// Conditioning program started
    Conditioning {
        /// Step current (A)
        current: f64,
        /// Step duration (s)
        duration: f64,
        /// Cell left powered afterwards
        leave_cell_on: bool,
    },
    /// Hybrid cycle started
    Hybrid {
        /// Output identifier
        identifier: String,
        /// Cell had to be switched on first
        start_with_cell_off: bool,
        /// Cell left powered afterwards
        leave_cell_on: bool,
    },
    /// Potentiostatic hold started
    Hold {
        /// Target voltage (V)
        v: f64,
        /// Cutoff band
        cutoff: CutoffBand,
    },
}

struct SimState {
    session_open: bool,
    cell: CellState,
    ocv: f64,
    calls: Vec<InstrumentCall>,
    scripted: VecDeque<HybridSummary>,
    hybrid_count: u32,
    fail_hybrid_at: Option<u32>,
    fail_hold: bool,
    fail_close: bool,
}

impl SimState {
    fn ensure_open(&mut self) {
        if !self.session_open {
            self.session_open = true;
            self.calls.push(InstrumentCall::SessionOpened);
        }
    }

    fn switch_cell(&mut self, state: CellState) -> Result<()> {
        if !self.session_open {
            bail!("cannot switch cell {:?}: session is closed", state);
        }
        self.cell = state;
        self.calls.push(match state {
            CellState::On => InstrumentCall::CellOn,
            CellState::Off => InstrumentCall::CellOff,
        });
        Ok(())
    }

    /// Drive a constant current, appending samples from `t0`. Returns the segment length.
    fn drive_current(
        &mut self,
        model: &CellModel,
        current: f64,
        duration: f64,
        t_sample: f64,
        t0: f64,
        samples: &mut Vec<TraceSample>,
    ) -> f64 {
        if duration <= 0.0 {
            return 0.0;
        }
        let (steps, dt) = segment_steps(duration, t_sample);
        for k in 1..=steps {
            self.ocv = model.clamp(self.ocv + current * dt / model.capacitance_f);
            samples.push(TraceSample {
                time_s: t0 + dt * k as f64,
                voltage_v: model.clamp(self.ocv + current * model.resistance_ohm),
                current_a: current,
            });
        }
        duration
    }
}

/// Write a trace on the blocking pool, off the async workers.
async fn persist(
    destination: TraceDestination,
    samples: Vec<TraceSample>,
    notes: Option<String>,
) -> Result<usize> {
    let rows = tokio::task::spawn_blocking(move || {
        write_trace(&destination, &samples, notes.as_deref())
    })
    .await
    .context("trace writer task failed")??;
    Ok(rows)
}

fn segment_steps(duration: f64, t_sample: f64) -> (usize, f64) {
    let coarsest = duration / MAX_TRACE_POINTS as f64;
    let dt = t_sample.max(coarsest);
    let steps = ((duration / dt).ceil() as usize).clamp(1, MAX_TRACE_POINTS);
    (steps, duration / steps as f64)
}

fn summarize(samples: &[TraceSample]) -> Option<HybridSummary> {
    let last = samples.last()?;
    let (v_min, v_max) = samples
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), s| {
            (lo.min(s.voltage_v), hi.max(s.voltage_v))
        });
    Some(HybridSummary {
        v_min,
        v_max,
        v_end: last.voltage_v,
    })
}

/// Simulated potentiostat implementing every capability.
///
/// # Example
///
/// ```rust,ignore
/// let pstat = SimulatedPotentiostat::new().with_time_scale(100.0);
/// let summary = pstat.run_hybrid(&request).await?;
/// assert!(summary.v_max >= summary.v_min);
/// ```
pub struct SimulatedPotentiostat {
    state: Mutex<SimState>,
    model: CellModel,
    time_scale: f64,
}

impl SimulatedPotentiostat {
    /// Closed session, cell off, default cell model, real-time waits.
    pub fn new() -> Self {
        Self::with_model(CellModel::default())
    }

    /// Simulator with a custom cell model.
    pub fn with_model(model: CellModel) -> Self {
        Self {
            state: Mutex::new(SimState {
                session_open: false,
                cell: CellState::Off,
                ocv: model.initial_ocv,
                calls: Vec::new(),
                scripted: VecDeque::new(),
                hybrid_count: 0,
                fail_hybrid_at: None,
                fail_hold: false,
                fail_close: false,
            }),
            model,
            time_scale: 1.0,
        }
    }

    /// Run `factor` times faster than real time. Non-positive factors are ignored.
    pub fn with_time_scale(mut self, factor: f64) -> Self {
        if factor > 0.0 && factor.is_finite() {
            self.time_scale = factor;
        }
        self
    }

    /// Report these summaries for the next hybrid cycles instead of the model's.
    pub fn with_scripted_summaries(mut self, summaries: impl IntoIterator<Item = HybridSummary>) -> Self {
        self.state.get_mut().scripted.extend(summaries);
        self
    }

    /// Fail the hybrid call with this 0-based index.
    pub fn fail_hybrid_at(mut self, index: u32) -> Self {
        self.state.get_mut().fail_hybrid_at = Some(index);
        self
    }

    /// Fail every potentiostatic hold.
    pub fn fail_hold(mut self) -> Self {
        self.state.get_mut().fail_hold = true;
        self
    }

    /// Fail every session close.
    pub fn fail_close(mut self) -> Self {
        self.state.get_mut().fail_close = true;
        self
    }

    /// Start with an open session (as if a previous program left it open).
    pub fn with_open_session(mut self) -> Self {
        self.state.get_mut().session_open = true;
        self
    }

    /// Recorded calls, oldest first.
    pub async fn calls(&self) -> Vec<InstrumentCall> {
        self.state.lock().await.calls.clone()
    }

    /// Current cell power state.
    pub async fn cell_state(&self) -> CellState {
        self.state.lock().await.cell
    }

    /// Number of hybrid calls made so far, failed ones included.
    pub async fn hybrid_count(&self) -> u32 {
        self.state.lock().await.hybrid_count
    }

    /// Present open-circuit voltage of the model cell.
    pub async fn open_circuit_voltage(&self) -> f64 {
        self.state.lock().await.ocv
    }

    async fn wait(&self, simulated_s: f64) {
        if simulated_s > 0.0 {
            let real = Duration::try_from_secs_f64(simulated_s / self.time_scale)
                .unwrap_or(Duration::MAX);
            sleep(real).await;
        }
    }
}

impl Default for SimulatedPotentiostat {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CellControl for SimulatedPotentiostat {
    async fn is_open(&self) -> Result<bool> {
        Ok(self.state.lock().await.session_open)
    }

    async fn set_cell(&self, state: CellState) -> Result<()> {
        self.state.lock().await.switch_cell(state)
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.fail_close {
            bail!("simulated instrument fault while closing session");
        }
        state.session_open = false;
        state.calls.push(InstrumentCall::SessionClosed);
        tracing::debug!("Simulated session closed");
        Ok(())
    }
}

#[async_trait]
impl ChronoMeasurement for SimulatedPotentiostat {
    async fn run_chrono(&self, request: &ChronoRequest) -> Result<()> {
        let program = &request.program;
        let mut samples = Vec::new();

        let simulated_s = {
            let mut state = self.state.lock().await;
            state.ensure_open();
            state.calls.push(InstrumentCall::Conditioning {
                current: program.step_current,
                duration: program.step_duration,
                leave_cell_on: request.leave_cell_on,
            });
            state.switch_cell(CellState::On)?;

            let mut t = state.drive_current(
                &self.model,
                program.initial_current,
                program.initial_duration,
                program.t_sample,
                0.0,
                &mut samples,
            );
            for _ in 0..program.n_steps {
                t += state.drive_current(
                    &self.model,
                    program.step_current,
                    program.step_duration,
                    program.t_sample,
                    t,
                    &mut samples,
                );
            }
            t
        };

        if let Some(policy) = request.decimation {
            tracing::debug!(?policy, "Simulator records a fixed-resolution trace; decimation not applied");
        }
        persist(request.destination.clone(), samples, None).await?;
        self.wait(simulated_s).await;

        if !request.leave_cell_on {
            self.state.lock().await.switch_cell(CellState::Off)?;
        }
        Ok(())
    }
}

#[async_trait]
impl HybridMeasurement for SimulatedPotentiostat {
    async fn run_hybrid(&self, request: &HybridRequest) -> Result<HybridSummary> {
        let mut samples = Vec::new();

        let (summary, simulated_s) = {
            let mut state = self.state.lock().await;
            state.ensure_open();
            state.calls.push(InstrumentCall::Hybrid {
                identifier: request.identifier.clone(),
                start_with_cell_off: request.start_with_cell_off,
                leave_cell_on: request.leave_cell_on,
            });

            let index = state.hybrid_count;
            state.hybrid_count += 1;
            if state.fail_hybrid_at == Some(index) {
                bail!(
                    "simulated instrument fault during hybrid measurement '{}'",
                    request.identifier
                );
            }

            let mut rest = 0.0;
            if request.start_with_cell_off {
                state.switch_cell(CellState::On)?;
            } else {
                if state.cell == CellState::Off {
                    bail!(
                        "cell is off at the start of '{}' but the measurement expected it powered",
                        request.identifier
                    );
                }
                rest = request.rest_time;
            }

            let charge_s = state.drive_current(
                &self.model,
                request.i_init,
                request.duration,
                request.t_sample,
                rest,
                &mut samples,
            );
            let modelled = summarize(&samples)
                .ok_or_else(|| anyhow!("hybrid measurement '{}' produced no samples", request.identifier))?;
            let summary = state.scripted.pop_front().unwrap_or(modelled);
            (summary, rest + charge_s)
        };

        let destination = TraceDestination {
            result_file: request
                .data_path
                .join(format!("HYBRID_{}.DTA", request.identifier)),
            live_view_file: None,
        };
        persist(destination, samples, request.exp_notes.clone()).await?;
        self.wait(simulated_s).await;

        if !request.leave_cell_on {
            self.state.lock().await.switch_cell(CellState::Off)?;
        }

        tracing::debug!(
            identifier = %request.identifier,
            v_min = summary.v_min,
            v_max = summary.v_max,
            v_end = summary.v_end,
            "Simulated hybrid cycle complete"
        );
        Ok(summary)
    }
}

#[async_trait]
impl PotentiostaticHold for SimulatedPotentiostat {
    async fn run_hold(&self, request: &HoldRequest) -> Result<HoldOutcome> {
        let mut samples = Vec::new();

        let outcome = {
            let mut state = self.state.lock().await;
            state.ensure_open();
            state.calls.push(InstrumentCall::Hold {
                v: request.v,
                cutoff: request.cutoff,
            });
            if state.fail_hold {
                bail!("simulated instrument fault during potentiostatic hold");
            }
            state.switch_cell(CellState::On)?;

            let mut outcome = HoldOutcome {
                cutoff_reached: false,
                final_current: 0.0,
                elapsed_s: 0.0,
            };
            if request.duration > 0.0 {
                let (steps, dt) = segment_steps(request.duration, request.t_sample);
                for k in 1..=steps {
                    let current = (request.v - state.ocv) / self.model.resistance_ohm;
                    state.ocv = self
                        .model
                        .clamp(state.ocv + current * dt / self.model.capacitance_f);
                    let t = dt * k as f64;
                    samples.push(TraceSample {
                        time_s: t,
                        voltage_v: request.v,
                        current_a: current,
                    });
                    outcome.final_current = current;
                    outcome.elapsed_s = t;
                    if request.cutoff.contains(current) {
                        outcome.cutoff_reached = true;
                        break;
                    }
                }
            }
            outcome
        };

        persist(request.destination.clone(), samples, None).await?;
        self.wait(outcome.elapsed_s).await;
        self.state.lock().await.switch_cell(CellState::Off)?;
        Ok(outcome)
    }
}
