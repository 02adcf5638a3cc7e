//! Galvanostatic Charge/Discharge Cycling
//!
//! Drives one cycling run against a [`Potentiostat`]:
//! 1. Optional conditioning at the cycling current
//! 2. Up to `max_repeats` hybrid cycles, each followed by a stop decision
//! 3. Optional potentiostatic voltage finish
//!
//! # State Machine
//!
//! ```text
//! Running ──(stop check fires)──▶ Stopping ──▶ Done
//!    └──────(cycles exhausted)──────────────▶ Done
//! ```
//!
//! The cell is powered down and the session closed when cycling stops, when a
//! measurement fails, and when the run ends. Elapsed time is measured from the
//! start of [`CycleController::run`] and checked only between cycles.
//!
//! # Configuration
//!
//! ```toml
//! [hybrid]
//! i_init = 0.05
//! rest_time = 10.0
//!
//! [cycling]
//! max_repeats = 20
//! stop_v_min = -1.0
//! stop_v_max = 1.0
//!
//! [finish]
//! enabled = true
//! v = 0.9
//! ```

use std::sync::Arc;
use tokio::time::{sleep, Duration, Instant};
use tracing::{info, instrument};

use crate::config::RunConfig;
use crate::error::{AppResult, CyclerError, RunStage};
use crate::hardware::capabilities::{
    ChronoMeasurement, ChronoRequest, DecimationPolicy, HoldRequest, HybridMeasurement,
    HybridRequest, Potentiostat, PotentiostaticHold, StepProgram,
};
use crate::output::OutputPaths;
use crate::procedures::panic_safety::CellGuard;
use crate::procedures::polarity::{CurrentSign, CutoffBand};
use crate::procedures::result::{CycleRecord, FinishRecord, RunReport};
use crate::procedures::stop::StopDecision;

// =============================================================================
// Cycle State
// =============================================================================

/// Lifecycle of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Conditioning or cycling in progress (initial)
    Running,
    /// A stop check fired; cycling is over
    Stopping,
    /// Run finished (terminal)
    Done,
}

/// Power directives for one hybrid cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleState {
    /// Cycle index (0-based)
    pub cycle: u32,
    /// The engine must switch the cell on before measuring
    pub start_with_cell_off: bool,
    /// The engine keeps the cell powered afterwards
    pub leave_cell_on: bool,
}

impl CycleState {
    /// Directives for `cycle` of `max_repeats`.
    ///
    /// Only the first cycle of an unconditioned run starts with the cell off, and
    /// only the last configured cycle powers it down.
    pub fn for_cycle(cycle: u32, max_repeats: u32, conditioned: bool) -> Self {
        Self {
            cycle,
            start_with_cell_off: cycle == 0 && !conditioned,
            leave_cell_on: cycle.saturating_add(1) < max_repeats,
        }
    }
}

// =============================================================================
// Cycle Controller
// =============================================================================

/// Owner of one cycling run.
pub struct CycleController<P>
where
    P: Potentiostat + ?Sized + 'static,
{
    config: RunConfig,
    instrument: Arc<P>,
    paths: OutputPaths,
    sign: CurrentSign,
    state: ControllerState,
    started_at: Option<Instant>,
}

impl<P> CycleController<P>
where
    P: Potentiostat + ?Sized + 'static,
{
    /// Validate `config` and bind it to an instrument.
    ///
    /// An invalid configuration is rejected here, before any instrument command.
    pub fn new(config: RunConfig, instrument: Arc<P>) -> AppResult<Self> {
        config.validate()?;
        let paths = OutputPaths::new(&config.output, config.cycling.max_repeats);
        let sign = config.current_sign();
        Ok(Self {
            config,
            instrument,
            paths,
            sign,
            state: ControllerState::Running,
            started_at: None,
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Time since the run started (zero before it starts).
    pub fn elapsed(&self) -> Duration {
        self.started_at
            .map(|start| start.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    /// Execute the run. A controller runs once.
    #[instrument(skip(self), fields(i_init = self.config.hybrid.i_init, sign = %self.sign))]
    pub async fn run(&mut self) -> AppResult<RunReport> {
        if self.started_at.is_some() {
            return Err(CyclerError::Configuration(
                "cycle controller has already run".to_string(),
            ));
        }
        self.started_at = Some(Instant::now());

        let mut report = RunReport::start(self.sign);
        let result = self.execute(&mut report).await;
        self.state = ControllerState::Done;
        report.elapsed = self.elapsed();

        result?;
        info!("{}", report.summary());
        Ok(report)
    }

    async fn execute(&mut self, report: &mut RunReport) -> AppResult<()> {
        let guard = CellGuard::new(Arc::clone(&self.instrument), "cycling");
        if let Err(e) = self.condition_and_cycle(report).await {
            guard.release_logged().await;
            return Err(e);
        }

        let guard = if self.state == ControllerState::Stopping {
            guard.release().await?;
            CellGuard::new(Arc::clone(&self.instrument), "voltage finish")
        } else {
            guard
        };

        if self.config.finish.enabled {
            match self.voltage_finish().await {
                Ok(record) => report.finish = Some(record),
                Err(e) => {
                    guard.release_logged().await;
                    return Err(e);
                }
            }
        }

        guard.release().await?;
        Ok(())
    }

    async fn condition_and_cycle(&mut self, report: &mut RunReport) -> AppResult<()> {
        if self.config.conditioning_enabled() {
            self.condition().await?;
            report.conditioned = true;
        }

        let max_repeats = self.config.cycling.max_repeats;
        for cycle in 0..max_repeats {
            let state = CycleState::for_cycle(cycle, max_repeats, report.conditioned);
            let record = self.run_cycle(state).await?;

            let decision = StopDecision::evaluate(
                &record.summary,
                record.elapsed.as_secs_f64(),
                &self.config,
                self.sign,
            );
            report.cycles.push(record);

            if decision.should_stop() {
                decision.log(cycle);
                self.state = ControllerState::Stopping;
                report.record_stop(decision.into_reasons());
                break;
            }

            info!(
                "Resting for {:.1} s between cycles...",
                self.config.hybrid.rest_time
            );
        }
        Ok(())
    }

    async fn condition(&self) -> AppResult<()> {
        let condition = &self.config.condition;
        let i_init = self.config.hybrid.i_init;
        info!(
            "Conditioning at {:.3} A for {:.0} s...",
            i_init, condition.time
        );

        let request = ChronoRequest {
            program: StepProgram::single_step(i_init, condition.time, condition.t_sample),
            leave_cell_on: true,
            decimation: Some(DecimationPolicy::CONDITIONING),
            destination: self.paths.conditioning(),
        };
        self.instrument
            .run_chrono(&request)
            .await
            .map_err(|e| CyclerError::measurement(RunStage::Conditioning, e))
    }

    async fn run_cycle(&self, state: CycleState) -> AppResult<CycleRecord> {
        let cycle = state.cycle;
        let identifier = self.paths.cycle_identifier(cycle);
        info!(cycle, identifier = %identifier, "Beginning cycle {}", cycle);

        let hybrid = &self.config.hybrid;
        let request = HybridRequest {
            identifier,
            data_path: self.paths.data_path().to_path_buf(),
            i_init: hybrid.i_init,
            duration: hybrid.duration,
            t_sample: hybrid.t_sample,
            rest_time: hybrid.rest_time,
            start_with_cell_off: state.start_with_cell_off,
            leave_cell_on: state.leave_cell_on,
            show_plot: false,
            exp_notes: self.config.output.exp_notes.clone(),
        };

        let summary = self
            .instrument
            .run_hybrid(&request)
            .await
            .map_err(|e| CyclerError::measurement(RunStage::Cycle(cycle), e))?;
        let elapsed = self.elapsed();

        info!(
            cycle,
            identifier = %request.identifier,
            v_min = summary.v_min,
            v_max = summary.v_max,
            v_end = summary.v_end,
            elapsed_s = elapsed.as_secs_f64(),
            "Cycle complete"
        );

        Ok(CycleRecord {
            cycle,
            identifier: request.identifier,
            summary,
            elapsed,
        })
    }

    async fn voltage_finish(&self) -> AppResult<FinishRecord> {
        let finish = &self.config.finish;
        info!(
            "Resting for {:.1} s before voltage finish...",
            finish.rest_time
        );
        let rest = Duration::try_from_secs_f64(finish.rest_time).map_err(|e| {
            CyclerError::Configuration(format!("finish.rest_time {}: {e}", finish.rest_time))
        })?;
        sleep(rest).await;

        let cutoff = CutoffBand::for_finish(self.sign, finish.i_thresh, finish.i_max);
        info!(
            i_min = cutoff.i_min,
            i_max = cutoff.i_max,
            "Voltage finish current limits: {}",
            cutoff
        );

        let request = HoldRequest {
            v: finish.v,
            duration: finish.duration,
            t_sample: finish.t_sample,
            cutoff,
            destination: self.paths.voltage_finish(),
        };
        let outcome = self
            .instrument
            .run_hold(&request)
            .await
            .map_err(|e| CyclerError::measurement(RunStage::VoltageFinish, e))?;

        info!(
            cutoff_reached = outcome.cutoff_reached,
            final_current = outcome.final_current,
            elapsed_s = outcome.elapsed_s,
            "Voltage finish complete"
        );

        Ok(FinishRecord {
            v: finish.v,
            cutoff,
            outcome,
        })
    }
}
