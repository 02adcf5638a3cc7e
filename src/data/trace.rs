//! CSV trace persistence for simulated measurements.
//!
//! Each trace is a CSV file with a `time_s,voltage_v,current_a` header, optionally
//! preceded by `# `-prefixed note lines. A live-view mirror, when configured, gets
//! an identical copy that is overwritten by every measurement.

use serde::Serialize;
#[cfg(feature = "storage_csv")]
use std::fs::File;
#[cfg(feature = "storage_csv")]
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{AppResult, CyclerError};
use crate::hardware::capabilities::TraceDestination;

/// One sample of a measurement trace.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TraceSample {
    /// Seconds since the start of the measurement
    pub time_s: f64,
    /// Measured voltage (V)
    pub voltage_v: f64,
    /// Measured current (A)
    pub current_a: f64,
}

/// Streaming CSV writer for one trace file.
pub struct TraceWriter {
    path: PathBuf,
    #[cfg(feature = "storage_csv")]
    writer: csv::Writer<File>,
    rows: usize,
}

impl TraceWriter {
    /// Create the file (and its parent directory) and write the header.
    #[cfg(feature = "storage_csv")]
    pub fn create(path: &Path, notes: Option<&str>) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = File::create(path).map_err(|e| {
            CyclerError::Storage(format!("Failed to create trace '{}': {}", path.display(), e))
        })?;

        if let Some(notes) = notes {
            for line in notes.lines() {
                writeln!(file, "# {line}")?;
            }
        }

        let writer = csv::WriterBuilder::new().has_headers(true).from_writer(file);

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            rows: 0,
        })
    }

    /// Without CSV support traces are counted but not written.
    #[cfg(not(feature = "storage_csv"))]
    pub fn create(path: &Path, _notes: Option<&str>) -> AppResult<Self> {
        tracing::debug!(path = %path.display(), "storage_csv disabled, trace not persisted");
        Ok(Self {
            path: path.to_path_buf(),
            rows: 0,
        })
    }

    /// Append one sample.
    pub fn write(&mut self, sample: &TraceSample) -> AppResult<()> {
        #[cfg(feature = "storage_csv")]
        self.writer
            .serialize(sample)
            .map_err(|e| CyclerError::Storage(e.to_string()))?;
        self.rows += 1;
        Ok(())
    }

    /// Flush and return the number of samples written.
    pub fn finish(mut self) -> AppResult<usize> {
        #[cfg(feature = "storage_csv")]
        self.writer.flush()?;
        tracing::debug!(path = %self.path.display(), rows = self.rows, "Trace written");
        Ok(self.rows)
    }
}

/// Write a complete trace to its destination and live-view mirror.
pub fn write_trace(
    destination: &TraceDestination,
    samples: &[TraceSample],
    notes: Option<&str>,
) -> AppResult<usize> {
    let mut targets = vec![destination.result_file.as_path()];
    if let Some(mirror) = destination.live_view_file.as_deref() {
        targets.push(mirror);
    }

    let mut rows = 0;
    for target in targets {
        let mut writer = TraceWriter::create(target, notes)?;
        for sample in samples {
            writer.write(sample)?;
        }
        rows = writer.finish()?;
    }
    Ok(rows)
}
