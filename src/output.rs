//! Output naming.
//!
//! Trace names are derived from the configured file suffix:
//! - hybrid cycles: `<suffix>` for a single cycle, `<suffix>_Cycle<n>` otherwise
//! - conditioning: `<data_path>/Conditioning_<suffix>.DTA`
//! - voltage finish: `<data_path>/PSTATIC-FINISH_<suffix>.DTA`
//! - live view: `<kst_path>/Kst_IVT.DTA`

use std::path::{Path, PathBuf};

use crate::config::OutputConfig;
use crate::hardware::capabilities::TraceDestination;

/// File name of the live-view mirror.
pub const LIVE_VIEW_FILE: &str = "Kst_IVT.DTA";

/// Path builder for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputPaths {
    data_path: PathBuf,
    suffix: String,
    live_view: Option<PathBuf>,
    max_repeats: u32,
}

impl OutputPaths {
    /// Paths for a run of up to `max_repeats` cycles.
    pub fn new(output: &OutputConfig, max_repeats: u32) -> Self {
        Self {
            data_path: output.data_path.clone(),
            suffix: output.file_suffix.clone(),
            live_view: output.kst_path.as_ref().map(|p| p.join(LIVE_VIEW_FILE)),
            max_repeats,
        }
    }

    /// Directory receiving all traces.
    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    /// Identifier for hybrid cycle `cycle`; unique per cycle when more than one is configured.
    pub fn cycle_identifier(&self, cycle: u32) -> String {
        if self.max_repeats > 1 {
            format!("{}_Cycle{}", self.suffix, cycle)
        } else {
            self.suffix.clone()
        }
    }

    /// Destination of the conditioning trace.
    pub fn conditioning(&self) -> TraceDestination {
        self.destination(format!("Conditioning_{}.DTA", self.suffix))
    }

    /// Destination of the voltage-finish trace.
    pub fn voltage_finish(&self) -> TraceDestination {
        self.destination(format!("PSTATIC-FINISH_{}.DTA", self.suffix))
    }

    fn destination(&self, file_name: String) -> TraceDestination {
        TraceDestination {
            result_file: self.data_path.join(file_name),
            live_view_file: self.live_view.clone(),
        }
    }
}
