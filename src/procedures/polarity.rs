//! Current-sign orientation.
//!
//! The sign of the initial cycling current is fixed once per run. Every
//! direction-dependent comparison and cutoff goes through [`orient`], so a
//! discharge is handled by mirroring values rather than by separate branches.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of the cycling current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CurrentSign {
    /// Charging (current > 0)
    Positive,
    /// Discharging (current < 0)
    Negative,
}

impl CurrentSign {
    /// Sign of a current value. Zero is treated as positive; configuration
    /// validation rejects a zero initial current.
    pub fn of(current: f64) -> Self {
        if current < 0.0 {
            CurrentSign::Negative
        } else {
            CurrentSign::Positive
        }
    }

    /// `+1.0` or `-1.0`
    pub fn as_f64(self) -> f64 {
        match self {
            CurrentSign::Positive => 1.0,
            CurrentSign::Negative => -1.0,
        }
    }
}

impl fmt::Display for CurrentSign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CurrentSign::Positive => write!(f, "+"),
            CurrentSign::Negative => write!(f, "-"),
        }
    }
}

/// Multiply a value by the current sign.
pub fn orient(sign: CurrentSign, value: f64) -> f64 {
    value * sign.as_f64()
}

/// True once `measured` has moved in the direction of the current to at least `target`.
///
/// For a positive current this is `measured >= target`; for a negative current it is
/// `measured <= target`.
pub fn has_reached(sign: CurrentSign, measured: f64, target: f64) -> bool {
    orient(sign, measured) >= orient(sign, target)
}

/// Current window in which a potentiostatic hold terminates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CutoffBand {
    /// Lower current bound (A)
    pub i_min: f64,
    /// Upper current bound (A)
    pub i_max: f64,
}

impl CutoffBand {
    /// Band for a hold that follows cycling in the direction of `sign`.
    ///
    /// Both magnitudes are oriented with the sign and then ordered, so for a
    /// negative current the larger magnitude becomes `i_min`:
    /// `(+, 0.005, 1.0) -> [0.005, 1.0]`, `(-, 0.005, 1.0) -> [-1.0, -0.005]`.
    pub fn for_finish(sign: CurrentSign, i_thresh: f64, i_max: f64) -> Self {
        let near_zero = orient(sign, i_thresh.abs());
        let far = orient(sign, i_max.abs());
        Self {
            i_min: near_zero.min(far),
            i_max: near_zero.max(far),
        }
    }

    /// Whether a measured current lies inside the band (inclusive).
    pub fn contains(&self, current: f64) -> bool {
        current >= self.i_min && current <= self.i_max
    }
}

impl fmt::Display for CutoffBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.4} A, {:.4} A)", self.i_min, self.i_max)
    }
}
