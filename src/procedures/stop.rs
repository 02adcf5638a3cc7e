//! Stop decision evaluated after every hybrid cycle.
//!
//! Four independent checks run in a fixed order: low-voltage breach, high-voltage
//! breach, finish voltage reached (only with a voltage finish), and duration
//! exceeded. The run stops if any of them fires. Every check that fires is kept
//! and logged; the first one is the reported cause.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::RunConfig;
use crate::hardware::capabilities::HybridSummary;
use crate::procedures::polarity::{has_reached, CurrentSign};

/// One reason to stop cycling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopReason {
    /// Minimum cycle voltage at or below `stop_v_min`
    LowVoltage {
        /// Measured minimum (V)
        measured: f64,
        /// Configured bound (V)
        threshold: f64,
    },
    /// Maximum cycle voltage at or above `stop_v_max`
    HighVoltage {
        /// Measured maximum (V)
        measured: f64,
        /// Configured bound (V)
        threshold: f64,
    },
    /// End voltage reached the finish voltage in the direction of the current
    FinishVoltageReached {
        /// Measured end voltage (V)
        measured: f64,
        /// Finish voltage (V)
        target: f64,
    },
    /// Run time at or beyond the configured duration
    DurationExceeded {
        /// Seconds since run start
        elapsed_s: f64,
        /// Configured budget (s)
        duration_s: f64,
    },
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            StopReason::LowVoltage { measured, threshold } => write!(
                f,
                "STOPPING CHARGE/DISCHARGE: measured voltage {measured:.3} V is below low threshold ({threshold:.3} V)"
            ),
            StopReason::HighVoltage { measured, threshold } => write!(
                f,
                "STOPPING CHARGE/DISCHARGE: measured voltage {measured:.3} V is above high threshold ({threshold:.3} V)"
            ),
            StopReason::FinishVoltageReached { measured, target } => write!(
                f,
                "STOPPING CHARGE/DISCHARGE: measured voltage {measured:.3} V has reached finishing voltage ({target:.3} V)"
            ),
            StopReason::DurationExceeded { elapsed_s, duration_s } => write!(
                f,
                "STOPPING CHARGE/DISCHARGE: elapsed time {elapsed_s:.0} s has reached target duration ({duration_s:.0} s)"
            ),
        }
    }
}

/// Whether the run budget is spent. Monotonic in `elapsed_s`.
pub fn duration_exceeded(elapsed_s: f64, duration_s: f64) -> bool {
    elapsed_s >= duration_s
}

/// Outcome of the per-cycle checks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StopDecision {
    reasons: Vec<StopReason>,
}

impl StopDecision {
    /// Run all four checks against a cycle summary.
    pub fn evaluate(
        summary: &HybridSummary,
        elapsed_s: f64,
        config: &RunConfig,
        sign: CurrentSign,
    ) -> Self {
        let cycling = &config.cycling;
        let mut reasons = Vec::new();

        if summary.v_min <= cycling.stop_v_min {
            reasons.push(StopReason::LowVoltage {
                measured: summary.v_min,
                threshold: cycling.stop_v_min,
            });
        }

        if summary.v_max >= cycling.stop_v_max {
            reasons.push(StopReason::HighVoltage {
                measured: summary.v_max,
                threshold: cycling.stop_v_max,
            });
        }

        if config.finish.enabled && has_reached(sign, summary.v_end, config.finish.v) {
            reasons.push(StopReason::FinishVoltageReached {
                measured: summary.v_end,
                target: config.finish.v,
            });
        }

        if duration_exceeded(elapsed_s, cycling.duration) {
            reasons.push(StopReason::DurationExceeded {
                elapsed_s,
                duration_s: cycling.duration,
            });
        }

        Self { reasons }
    }

    /// Any check fired.
    pub fn should_stop(&self) -> bool {
        !self.reasons.is_empty()
    }

    /// The reported cause: the first check that fired.
    pub fn primary(&self) -> Option<&StopReason> {
        self.reasons.first()
    }

    /// All checks that fired, in evaluation order.
    pub fn reasons(&self) -> &[StopReason] {
        &self.reasons
    }

    /// Consume into the list of reasons.
    pub fn into_reasons(self) -> Vec<StopReason> {
        self.reasons
    }

    /// Log every fired check at `warn`.
    pub fn log(&self, cycle: u32) {
        for reason in &self.reasons {
            tracing::warn!(cycle, "{}", reason);
        }
    }
}
