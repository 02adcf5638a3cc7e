//! Cell Power Safety
//!
//! Ensures the cell is switched off and the instrument session closed whenever a
//! run stage ends, whether it ends by a stop decision, by exhausting its cycles, or
//! by a measurement error.
//!
//! # Problem
//!
//! A run that aborts between `set_cell(On)` and the final shutdown leaves the cell
//! powered indefinitely.
//!
//! # Solution
//!
//! [`CellGuard`] is a scoped acquisition of the instrument's power state:
//! - `release()` performs the async shutdown and disarms the guard
//! - dropping an armed guard (early return, panic) schedules the same shutdown
//!   on the current tokio runtime and logs at `error`
//!
//! # Example
//!
//! ```rust,ignore
//! let guard = CellGuard::new(pstat.clone(), "cycling");
//! let summary = pstat.run_hybrid(&request).await?; // guard drops and shuts down on error
//! guard.release().await?;
//! ```

use anyhow::Context;
use std::sync::Arc;

use crate::error::{AppResult, CyclerError};
use crate::hardware::capabilities::{CellControl, CellState};

/// Switch the cell off and close the session, if the session is open.
///
/// Returns whether anything had to be shut down. Both commands are attempted even
/// when the first fails; the first failure is reported.
pub async fn shut_down<C>(instrument: &C) -> anyhow::Result<bool>
where
    C: CellControl + ?Sized,
{
    if !instrument
        .is_open()
        .await
        .context("querying instrument session")?
    {
        return Ok(false);
    }

    let cell_off = instrument.set_cell(CellState::Off).await;
    let closed = instrument.close().await;
    cell_off.context("switching cell off")?;
    closed.context("closing instrument session")?;
    Ok(true)
}

/// Scoped guard guaranteeing cell-off and session-close.
pub struct CellGuard<C>
where
    C: CellControl + ?Sized + 'static,
{
    instrument: Arc<C>,
    name: String,
    armed: bool,
}

impl<C> CellGuard<C>
where
    C: CellControl + ?Sized + 'static,
{
    /// Arm a guard over `instrument`. `name` identifies the protected stage in logs.
    pub fn new(instrument: Arc<C>, name: impl Into<String>) -> Self {
        Self {
            instrument,
            name: name.into(),
            armed: true,
        }
    }

    /// Check if the guard is still armed.
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Shut the cell down now and disarm.
    ///
    /// Returns `true` if the session was open and has been closed.
    pub async fn release(mut self) -> AppResult<bool> {
        self.armed = false;
        let released = shut_down(self.instrument.as_ref()).await.map_err(|e| {
            CyclerError::Instrument(format!("releasing cell after {}: {e:#}", self.name))
        })?;
        if released {
            tracing::info!(stage = %self.name, "Cell switched off and session closed");
        }
        Ok(released)
    }

    /// Like [`release`](Self::release), but failures are logged instead of returned.
    ///
    /// Used on error paths so a cleanup failure never masks the original error.
    pub async fn release_logged(self) {
        let name = self.name.clone();
        if let Err(e) = self.release().await {
            tracing::error!(stage = %name, error = %e, "Cell shutdown failed");
        }
    }
}

impl<C> Drop for CellGuard<C>
where
    C: CellControl + ?Sized + 'static,
{
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        if std::thread::panicking() {
            tracing::error!(stage = %self.name, "Cell guard triggered during panic");
        } else {
            tracing::error!(stage = %self.name, "Cell guard dropped without release");
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let instrument = Arc::clone(&self.instrument);
                let name = std::mem::take(&mut self.name);
                handle.spawn(async move {
                    if let Err(e) = shut_down(instrument.as_ref()).await {
                        tracing::error!(stage = %name, error = %format!("{e:#}"), "Deferred cell shutdown failed");
                    }
                });
            }
            Err(_) => {
                tracing::error!(
                    stage = %self.name,
                    "No async runtime available; cell may still be powered"
                );
            }
        }
    }
}
