//! Trace storage.
pub mod trace;
