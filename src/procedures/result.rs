//! Run Report
//!
//! Structured record of one cycling run: what ran, what each cycle measured,
//! why cycling ended, and how the voltage finish went.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::error::{AppResult, CyclerError};
use crate::hardware::capabilities::{HoldOutcome, HybridSummary};
use crate::procedures::polarity::{CurrentSign, CutoffBand};
use crate::procedures::stop::StopReason;

/// How the cycling loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// A stop check fired
    Stopped,
    /// All configured cycles ran
    Exhausted,
}

/// One completed hybrid cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRecord {
    /// Cycle index (0-based)
    pub cycle: u32,
    /// Output identifier used for the cycle
    pub identifier: String,
    /// Voltage summary reported by the engine
    pub summary: HybridSummary,
    /// Run time at the end of the cycle
    #[serde(with = "duration_serde")]
    pub elapsed: Duration,
}

/// Voltage finish outcome.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FinishRecord {
    /// Finish voltage (V)
    pub v: f64,
    /// Current band passed to the hold
    pub cutoff: CutoffBand,
    /// What the hold reported
    pub outcome: HoldOutcome,
}

/// Report of a complete run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique run ID
    pub run_id: Uuid,
    /// Wall-clock start time
    pub started_at: DateTime<Utc>,
    /// Direction of the cycling current
    pub current_sign: CurrentSign,
    /// A conditioning step preceded cycling
    pub conditioned: bool,
    /// Completed cycles, in order
    pub cycles: Vec<CycleRecord>,
    /// Every stop check that fired on the final cycle
    #[serde(default)]
    pub stop_reasons: Vec<StopReason>,
    /// How cycling ended
    pub termination: Termination,
    /// Voltage finish, when it ran
    #[serde(default)]
    pub finish: Option<FinishRecord>,
    /// Total run time
    #[serde(with = "duration_serde")]
    pub elapsed: Duration,
}

impl RunReport {
    /// Open a report at run start.
    pub fn start(current_sign: CurrentSign) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            current_sign,
            conditioned: false,
            cycles: Vec::new(),
            stop_reasons: Vec::new(),
            termination: Termination::Exhausted,
            finish: None,
            elapsed: Duration::ZERO,
        }
    }

    /// Number of hybrid cycles that completed.
    pub fn cycles_run(&self) -> usize {
        self.cycles.len()
    }

    /// Cycling ended on a stop check.
    pub fn stopped(&self) -> bool {
        self.termination == Termination::Stopped
    }

    /// Record that cycling ended on `reasons`.
    pub fn record_stop(&mut self, reasons: Vec<StopReason>) {
        self.termination = Termination::Stopped;
        self.stop_reasons = reasons;
    }

    /// One-line human readable summary.
    pub fn summary(&self) -> String {
        let ending = match self.stop_reasons.first() {
            Some(reason) if self.stopped() => format!("stopped: {reason}"),
            _ => "all cycles completed".to_string(),
        };
        let finish = match &self.finish {
            Some(f) if f.outcome.cutoff_reached => format!(
                ", finish reached cutoff after {:.0} s",
                f.outcome.elapsed_s
            ),
            Some(f) => format!(", finish held {:.0} s without cutoff", f.outcome.elapsed_s),
            None => String::new(),
        };
        format!(
            "Run {}: {} cycle(s), {}{} ({:.1} s)",
            self.run_id,
            self.cycles_run(),
            ending,
            finish,
            self.elapsed.as_secs_f64()
        )
    }

    /// Render as pretty JSON.
    pub fn to_json(&self) -> AppResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| CyclerError::Storage(format!("cannot serialize run report: {e}")))
    }
}

/// Serde helper for Duration
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs))
    }
}
