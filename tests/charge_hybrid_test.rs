//! Integration tests for the cycle controller
//!
//! Every run goes against the simulated potentiostat on a paused tokio clock, so
//! rests and measurement durations complete instantly while elapsed-time checks
//! still see realistic values.

use charge_cycler::config::RunConfig;
use charge_cycler::error::{CyclerError, RunStage};
use charge_cycler::hardware::capabilities::{CellControl, CellState, HybridSummary};
use charge_cycler::hardware::mock::{InstrumentCall, SimulatedPotentiostat};
use charge_cycler::procedures::{
    CutoffBand, CycleController, RunReport, StopReason, Termination,
};
use std::path::Path;
use std::sync::Arc;
use tracing_test::traced_test;

// =============================================================================
// Helpers
// =============================================================================

fn base_config(dir: &Path, max_repeats: u32) -> RunConfig {
    let mut config = RunConfig::default();
    config.output.data_path = dir.to_path_buf();
    config.hybrid.i_init = 0.05;
    config.hybrid.duration = 30.0;
    config.hybrid.t_sample = 0.1;
    config.hybrid.rest_time = 10.0;
    config.cycling.max_repeats = max_repeats;
    config
}

fn summary(v_min: f64, v_max: f64, v_end: f64) -> HybridSummary {
    HybridSummary { v_min, v_max, v_end }
}

fn quiet(n: usize) -> Vec<HybridSummary> {
    vec![summary(-0.2, 0.2, 0.1); n]
}

/// (identifier, start_with_cell_off, leave_cell_on) of each hybrid call
fn hybrid_calls(calls: &[InstrumentCall]) -> Vec<(String, bool, bool)> {
    calls
        .iter()
        .filter_map(|call| match call {
            InstrumentCall::Hybrid {
                identifier,
                start_with_cell_off,
                leave_cell_on,
            } => Some((identifier.clone(), *start_with_cell_off, *leave_cell_on)),
            _ => None,
        })
        .collect()
}

fn hold_calls(calls: &[InstrumentCall]) -> Vec<(f64, CutoffBand)> {
    calls
        .iter()
        .filter_map(|call| match call {
            InstrumentCall::Hold { v, cutoff } => Some((*v, *cutoff)),
            _ => None,
        })
        .collect()
}

async fn run(config: RunConfig, pstat: &Arc<SimulatedPotentiostat>) -> Result<RunReport, CyclerError> {
    let mut controller = CycleController::new(config, Arc::clone(pstat))?;
    controller.run().await
}

async fn assert_powered_down(pstat: &SimulatedPotentiostat) {
    assert_eq!(pstat.cell_state().await, CellState::Off);
    assert!(!pstat.is_open().await.unwrap());
    let calls = pstat.calls().await;
    assert!(
        calls.ends_with(&[InstrumentCall::CellOff, InstrumentCall::SessionClosed]),
        "run did not end with cell off + close: {calls:?}"
    );
}

// =============================================================================
// Cycling loop
// =============================================================================

#[tokio::test(start_paused = true)]
async fn runs_every_cycle_when_nothing_stops() {
    for n in 1..=4u32 {
        let dir = tempfile::tempdir().unwrap();
        let pstat = Arc::new(SimulatedPotentiostat::new().with_scripted_summaries(quiet(n as usize)));

        let report = run(base_config(dir.path(), n), &pstat).await.unwrap();

        let hybrids = hybrid_calls(&pstat.calls().await);
        assert_eq!(hybrids.len(), n as usize);
        for (i, (_, _, leave_cell_on)) in hybrids.iter().enumerate() {
            assert_eq!(*leave_cell_on, i + 1 < n as usize, "cycle {i} of {n}");
        }
        assert_eq!(report.termination, Termination::Exhausted);
        assert!(report.stop_reasons.is_empty());
        assert_eq!(report.cycles_run(), n as usize);
        assert_powered_down(&pstat).await;
    }
}

#[tokio::test(start_paused = true)]
async fn cycle_identifiers_are_unique_when_repeating() {
    let dir = tempfile::tempdir().unwrap();
    let pstat = Arc::new(SimulatedPotentiostat::new().with_scripted_summaries(quiet(3)));

    run(base_config(dir.path(), 3), &pstat).await.unwrap();

    let ids: Vec<String> = hybrid_calls(&pstat.calls().await)
        .into_iter()
        .map(|(id, _, _)| id)
        .collect();
    assert_eq!(ids, ["run_Cycle0", "run_Cycle1", "run_Cycle2"]);
}

#[tokio::test(start_paused = true)]
async fn voltage_breach_stops_after_breaching_cycle() {
    let n = 5;
    for k in 0..n - 1 {
        for breach in [summary(-1.05, 0.2, -0.9), summary(-0.2, 1.02, 0.95)] {
            let dir = tempfile::tempdir().unwrap();
            let mut scripted = quiet(k);
            scripted.push(breach);
            let pstat = Arc::new(SimulatedPotentiostat::new().with_scripted_summaries(scripted));

            let report = run(base_config(dir.path(), n as u32), &pstat).await.unwrap();

            assert_eq!(pstat.hybrid_count().await, k as u32 + 1);
            assert_eq!(report.termination, Termination::Stopped);
            assert!(matches!(
                report.stop_reasons[0],
                StopReason::LowVoltage { .. } | StopReason::HighVoltage { .. }
            ));
            assert_powered_down(&pstat).await;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn single_cycle_without_conditioning_or_finish() {
    let dir = tempfile::tempdir().unwrap();
    let pstat = Arc::new(SimulatedPotentiostat::new());

    let report = run(base_config(dir.path(), 1), &pstat).await.unwrap();

    assert_eq!(
        pstat.calls().await,
        vec![
            InstrumentCall::SessionOpened,
            InstrumentCall::Hybrid {
                identifier: "run".into(),
                start_with_cell_off: true,
                leave_cell_on: false,
            },
            InstrumentCall::CellOn,
            InstrumentCall::CellOff,
            InstrumentCall::CellOff,
            InstrumentCall::SessionClosed,
        ]
    );
    assert!(!report.conditioned);
    assert!(report.finish.is_none());
}

#[tokio::test(start_paused = true)]
async fn conditioning_precedes_first_cycle_with_cell_on() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path(), 2);
    config.condition.time = 600.0;
    let pstat = Arc::new(SimulatedPotentiostat::new().with_scripted_summaries(quiet(2)));

    let report = run(config, &pstat).await.unwrap();

    let calls = pstat.calls().await;
    let conditioning: Vec<usize> = calls
        .iter()
        .enumerate()
        .filter(|(_, c)| matches!(c, InstrumentCall::Conditioning { .. }))
        .map(|(i, _)| i)
        .collect();
    let first_hybrid = calls
        .iter()
        .position(|c| matches!(c, InstrumentCall::Hybrid { .. }))
        .unwrap();
    assert_eq!(conditioning.len(), 1);
    assert!(conditioning[0] < first_hybrid);
    assert_eq!(
        calls[conditioning[0]],
        InstrumentCall::Conditioning {
            current: 0.05,
            duration: 600.0,
            leave_cell_on: true,
        }
    );

    let hybrids = hybrid_calls(&calls);
    assert!(!hybrids[0].1, "first cycle after conditioning must not power the cell on");
    assert!(report.conditioned);
    assert!(dir.path().join("Conditioning_run.DTA").exists());
    assert_powered_down(&pstat).await;
}

#[tokio::test(start_paused = true)]
async fn duration_budget_stops_at_cycle_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path(), 10);
    config.cycling.duration = 100.0;
    let pstat = Arc::new(SimulatedPotentiostat::new().with_scripted_summaries(quiet(10)));

    let report = run(config, &pstat).await.unwrap();

    // 30 s, then 40 s per cycle (10 s rest + 30 s charge): boundaries at 30, 70, 110 s
    assert_eq!(report.cycles_run(), 3);
    assert!(matches!(
        report.stop_reasons.as_slice(),
        [StopReason::DurationExceeded { .. }]
    ));
    assert!(report
        .cycles
        .windows(2)
        .all(|w| w[0].elapsed <= w[1].elapsed));
    assert_powered_down(&pstat).await;
}

// =============================================================================
// Voltage finish
// =============================================================================

#[tokio::test(start_paused = true)]
async fn finish_voltage_stop_then_hold_when_charging() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path(), 5);
    config.finish.enabled = true;
    config.finish.v = 0.9;
    let pstat = Arc::new(
        SimulatedPotentiostat::new()
            .with_scripted_summaries([summary(0.0, 0.5, 0.4), summary(0.4, 0.95, 0.92)]),
    );

    let report = run(config, &pstat).await.unwrap();

    assert_eq!(report.cycles_run(), 2);
    assert!(matches!(
        report.stop_reasons[0],
        StopReason::FinishVoltageReached { .. }
    ));

    let calls = pstat.calls().await;
    let first_close = calls
        .iter()
        .position(|c| *c == InstrumentCall::SessionClosed)
        .unwrap();
    let hold = calls
        .iter()
        .position(|c| matches!(c, InstrumentCall::Hold { .. }))
        .unwrap();
    assert!(first_close < hold, "stop path must power down before the finish");
    assert_eq!(
        hold_calls(&calls),
        vec![(0.9, CutoffBand { i_min: 0.005, i_max: 1.0 })]
    );
    assert!(report.finish.is_some());
    assert!(dir.path().join("PSTATIC-FINISH_run.DTA").exists());
    assert_powered_down(&pstat).await;
}

#[tokio::test(start_paused = true)]
async fn finish_band_is_mirrored_when_discharging() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path(), 3);
    config.hybrid.i_init = -0.05;
    config.finish.enabled = true;
    config.finish.v = -0.5;
    let pstat = Arc::new(
        SimulatedPotentiostat::new().with_scripted_summaries([summary(-0.6, 0.0, -0.55)]),
    );

    let report = run(config, &pstat).await.unwrap();

    assert_eq!(report.cycles_run(), 1);
    assert_eq!(
        hold_calls(&pstat.calls().await),
        vec![(-0.5, CutoffBand { i_min: -1.0, i_max: -0.005 })]
    );
    assert_powered_down(&pstat).await;
}

#[tokio::test(start_paused = true)]
async fn finish_runs_after_exhausting_cycles() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path(), 2);
    config.finish.enabled = true;
    config.finish.v = 0.9;
    let pstat = Arc::new(SimulatedPotentiostat::new().with_scripted_summaries(quiet(2)));

    let report = run(config, &pstat).await.unwrap();

    assert_eq!(report.termination, Termination::Exhausted);
    assert_eq!(hold_calls(&pstat.calls().await).len(), 1);
    assert!(report.finish.is_some());
    assert_powered_down(&pstat).await;
}

#[tokio::test(start_paused = true)]
async fn finish_not_reached_when_discharge_ends_above_target() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path(), 1);
    config.hybrid.i_init = -0.05;
    config.finish.enabled = true;
    config.finish.v = 0.0;
    let pstat = Arc::new(
        SimulatedPotentiostat::new().with_scripted_summaries([summary(-0.2, 0.2, 0.01)]),
    );

    let report = run(config, &pstat).await.unwrap();

    assert_eq!(report.termination, Termination::Exhausted);
}

// =============================================================================
// Error paths
// =============================================================================

#[tokio::test(start_paused = true)]
async fn hybrid_failure_powers_down_and_reports_stage() {
    let dir = tempfile::tempdir().unwrap();
    let pstat = Arc::new(
        SimulatedPotentiostat::new()
            .with_scripted_summaries(quiet(3))
            .fail_hybrid_at(1),
    );

    let err = run(base_config(dir.path(), 3), &pstat).await.unwrap_err();

    assert!(matches!(
        err,
        CyclerError::Measurement {
            stage: RunStage::Cycle(1),
            ..
        }
    ));
    assert_powered_down(&pstat).await;
}

#[tokio::test(start_paused = true)]
async fn hold_failure_powers_down() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path(), 1);
    config.finish.enabled = true;
    config.finish.v = 0.9;
    let pstat = Arc::new(
        SimulatedPotentiostat::new()
            .with_scripted_summaries(quiet(1))
            .fail_hold(),
    );

    let err = run(config, &pstat).await.unwrap_err();

    assert!(matches!(
        err,
        CyclerError::Measurement {
            stage: RunStage::VoltageFinish,
            ..
        }
    ));
    assert_powered_down(&pstat).await;
}

#[tokio::test(start_paused = true)]
async fn measurement_error_wins_over_cleanup_failure() {
    let dir = tempfile::tempdir().unwrap();
    let pstat = Arc::new(SimulatedPotentiostat::new().fail_hybrid_at(0).fail_close());

    let err = run(base_config(dir.path(), 2), &pstat).await.unwrap_err();

    assert!(matches!(err, CyclerError::Measurement { .. }));
    assert_eq!(pstat.cell_state().await, CellState::Off);
}

#[tokio::test]
async fn invalid_configuration_never_reaches_instrument() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path(), 3);
    config.cycling.stop_v_min = 1.5;
    config.cycling.stop_v_max = 1.0;
    let pstat = Arc::new(SimulatedPotentiostat::new());

    let err = run(config, &pstat).await.unwrap_err();

    assert!(err.is_precondition());
    assert!(pstat.calls().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn oversized_finish_rest_rejected_before_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path(), 1);
    config.finish.enabled = true;
    config.finish.rest_time = 1e20;
    let pstat = Arc::new(SimulatedPotentiostat::new());

    let err = run(config, &pstat).await.unwrap_err();

    assert!(err.is_precondition());
    assert!(err.to_string().contains("finish.rest_time"));
    assert!(pstat.calls().await.is_empty());
}

// =============================================================================
// Logging and outputs
// =============================================================================

#[tokio::test(start_paused = true)]
#[traced_test]
async fn stop_reasons_are_logged() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path(), 4);
    config.hybrid.i_init = -0.05;
    config.finish.enabled = true;
    config.finish.v = -0.5;
    let pstat = Arc::new(SimulatedPotentiostat::new().with_scripted_summaries([
        summary(-0.3, 0.1, -0.2),
        summary(-1.05, 0.0, -0.98),
    ]));

    run(config, &pstat).await.unwrap();

    assert!(logs_contain("Resting for 10.0 s between cycles..."));
    assert!(logs_contain(
        "STOPPING CHARGE/DISCHARGE: measured voltage -1.050 V is below low threshold (-1.000 V)"
    ));
    assert!(logs_contain(
        "STOPPING CHARGE/DISCHARGE: measured voltage -0.980 V has reached finishing voltage (-0.500 V)"
    ));
    assert!(logs_contain("Resting for 2.0 s before voltage finish..."));
    assert!(logs_contain("Voltage finish current limits: (-1.0000 A, -0.0050 A)"));
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn conditioning_banner_is_logged() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path(), 1);
    config.condition.time = 600.0;
    let pstat = Arc::new(SimulatedPotentiostat::new());

    run(config, &pstat).await.unwrap();

    assert!(logs_contain("Conditioning at 0.050 A for 600 s..."));
}

#[cfg(feature = "storage_csv")]
#[tokio::test(start_paused = true)]
async fn experiment_notes_reach_hybrid_trace() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path(), 1);
    config.output.exp_notes = Some("cell 7, 25 C".into());
    let pstat = Arc::new(SimulatedPotentiostat::new());

    run(config, &pstat).await.unwrap();

    let trace = std::fs::read_to_string(dir.path().join("HYBRID_run.DTA")).unwrap();
    assert!(trace.starts_with("# cell 7, 25 C\n"));
}

#[tokio::test(start_paused = true)]
async fn live_view_mirror_written_for_finish() {
    let dir = tempfile::tempdir().unwrap();
    let kst = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path(), 1);
    config.output.kst_path = Some(kst.path().to_path_buf());
    config.finish.enabled = true;
    config.finish.v = 0.9;
    let pstat = Arc::new(SimulatedPotentiostat::new().with_scripted_summaries(quiet(1)));

    run(config, &pstat).await.unwrap();

    if cfg!(feature = "storage_csv") {
        assert!(kst.path().join("Kst_IVT.DTA").exists());
    }
}
