//! Reusable parameter validators used by [`crate::config::RunConfig::validate`].
//!
//! Each validator returns `Err(&'static str)` describing the problem; the caller
//! prefixes the offending field name.

use std::ops::RangeInclusive;
use std::time::Duration;

/// Validates that a value is a finite number.
///
/// # Arguments
///
/// * `value` - The value to validate.
///
/// # Returns
///
/// * `Ok(())` if the value is neither NaN nor infinite.
/// * `Err(&'static str)` otherwise.
pub fn is_finite(value: f64) -> Result<(), &'static str> {
    if value.is_finite() {
        Ok(())
    } else {
        Err("must be a finite number")
    }
}

/// Validates that a value is finite and strictly greater than zero.
pub fn is_positive(value: f64) -> Result<(), &'static str> {
    is_finite(value)?;
    if value > 0.0 {
        Ok(())
    } else {
        Err("must be greater than 0")
    }
}

/// Validates that a value is finite and not negative.
///
/// Used for durations and rest times where zero means "skip".
pub fn is_non_negative(value: f64) -> Result<(), &'static str> {
    is_finite(value)?;
    if value >= 0.0 {
        Ok(())
    } else {
        Err("must not be negative")
    }
}

/// Validates a time in seconds: not negative and representable as a [`Duration`].
pub fn is_duration(seconds: f64) -> Result<(), &'static str> {
    is_non_negative(seconds)?;
    Duration::try_from_secs_f64(seconds)
        .map(|_| ())
        .map_err(|_| "is too large to be a duration")
}

/// Validates that a value is finite and not zero.
pub fn is_non_zero(value: f64) -> Result<(), &'static str> {
    is_finite(value)?;
    if value != 0.0 {
        Ok(())
    } else {
        Err("must not be zero")
    }
}

/// Validates if a given value is within a specified numeric range.
///
/// # Arguments
///
/// * `value` - The value to validate.
/// * `range` - The inclusive range to validate against.
///
/// # Returns
///
/// * `Ok(())` if the value is within the range.
/// * `Err(&'static str)` if the value is outside the range.
pub fn is_in_range<T: PartialOrd>(value: T, range: RangeInclusive<T>) -> Result<(), &'static str> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err("is outside the allowed range")
    }
}

/// Validates that a lower bound is strictly below an upper bound.
pub fn is_ordered(low: f64, high: f64) -> Result<(), &'static str> {
    if low < high {
        Ok(())
    } else {
        Err("lower bound must be strictly below upper bound")
    }
}

/// Validates if a given string is not empty.
pub fn is_not_empty(value: &str) -> Result<(), &'static str> {
    if !value.trim().is_empty() {
        Ok(())
    } else {
        Err("cannot be empty")
    }
}

/// Validates that a string is usable as a file path component.
pub fn is_valid_path(path: &str) -> Result<(), &'static str> {
    is_not_empty(path)?;
    if path.contains('\0') {
        return Err("cannot contain null bytes");
    }
    Ok(())
}
